//! The orchestration core of Concierge.
//!
//! One user turn runs as an explicit state machine:
//!
//! 1. **Receive** the user's message and append it to the session context
//! 2. **Ask the model** through the configured gateway
//! 3. **If function calls**: dispatch them, append the results, go back to 2
//! 4. **If text**: publish the final answer and finish
//!
//! A round-trip limit bounds the cycle; if the model keeps asking for calls
//! the turn ends with a fallback answer instead.

pub mod dispatcher;
pub mod loop_runner;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use dispatcher::FunctionDispatcher;
pub use loop_runner::{AgentLoop, TurnError};
pub use session::{Session, TurnOutcome, TurnStatus, UserTurn};
