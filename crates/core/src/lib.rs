//! # Concierge Core
//!
//! Domain types, traits, and error definitions for the Concierge
//! function-calling assistant. This crate has **no I/O dependencies**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here. Implementations live in their respective
//! crates. This enables:
//! - Swapping the model backend via configuration
//! - Easy testing with scripted gateways and counting handlers
//! - Clean dependency graph (all crates depend inward on core)

pub mod context;
pub mod error;
pub mod event;
pub mod function;
pub mod gateway;
pub mod message;
pub mod registry;
pub mod schema;
pub mod value;

// Re-export key types at crate root for ergonomics
pub use context::{ContextSnapshot, ContextWindow};
pub use error::{
    DispatchError, Error, ExecutionError, GatewayError, RegistryError, Result, ValidationError,
};
pub use event::{AssistantEvent, EventBus, EventKind, Subscription};
pub use function::{
    Arguments, CallStatus, FnHandler, FunctionCallRequest, FunctionCallResult, FunctionHandler,
    handler_fn,
};
pub use gateway::{LanguageModelGateway, ModelReply};
pub use message::{ConversationTurn, Role, TurnContent};
pub use registry::FunctionRegistry;
pub use schema::{FunctionDefinition, ParameterSpec, ParameterType};
pub use value::Value;
