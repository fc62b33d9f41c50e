//! The orchestration loop implementation.

use concierge_config::OrchestrationConfig;
use concierge_core::error::GatewayError;
use concierge_core::event::{AssistantEvent, EventBus};
use concierge_core::function::{FunctionCallRequest, FunctionCallResult};
use concierge_core::gateway::{LanguageModelGateway, ModelReply};
use concierge_core::message::ConversationTurn;
use concierge_core::registry::FunctionRegistry;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::FunctionDispatcher;
use crate::session::{Session, TurnOutcome, TurnStart, TurnStatus, UserTurn};

const DEFAULT_MAX_ROUND_TRIPS: u32 = 5;
const DEFAULT_FALLBACK_ANSWER: &str =
    "Sorry, I couldn't finish that request. Please try asking in a different way.";

/// Why a turn ended without an answer.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Nothing to process: the message is empty")]
    EmptyInput,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Turn cancelled")]
    Cancelled,
}

/// Where a turn is in its lifecycle.
enum LoopState {
    AwaitingModel,
    ExecutingFunctions {
        requests: Vec<FunctionCallRequest>,
        content: String,
    },
    Done {
        answer: String,
        status: TurnStatus,
    },
}

/// Drives one user turn: model round trips, function dispatch, events.
pub struct AgentLoop {
    gateway: Arc<dyn LanguageModelGateway>,

    dispatcher: Arc<FunctionDispatcher>,

    event_bus: EventBus,

    /// Maximum gateway calls per turn
    max_round_trips: u32,

    /// Answer used when the round-trip limit cuts a turn short
    fallback_answer: String,
}

impl AgentLoop {
    pub fn new(
        gateway: Arc<dyn LanguageModelGateway>,
        dispatcher: FunctionDispatcher,
        event_bus: EventBus,
    ) -> Self {
        Self {
            gateway,
            dispatcher: Arc::new(dispatcher),
            event_bus,
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            fallback_answer: DEFAULT_FALLBACK_ANSWER.into(),
        }
    }

    pub fn from_config(
        gateway: Arc<dyn LanguageModelGateway>,
        registry: Arc<FunctionRegistry>,
        event_bus: EventBus,
        config: &OrchestrationConfig,
    ) -> Self {
        Self::new(gateway, FunctionDispatcher::from_config(registry, config), event_bus)
            .with_max_round_trips(config.max_round_trips)
    }

    /// Set the maximum number of gateway calls per turn (at least one).
    pub fn with_max_round_trips(mut self, max: u32) -> Self {
        self.max_round_trips = max.max(1);
        self
    }

    pub fn with_fallback_answer(mut self, answer: impl Into<String>) -> Self {
        self.fallback_answer = answer.into();
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    /// Process a fresh message with no external cancellation.
    pub async fn process(
        &self,
        session: &mut Session,
        text: impl Into<String>,
    ) -> Result<TurnOutcome, TurnError> {
        self.process_with(session, text, &CancellationToken::new())
            .await
    }

    /// Process a fresh message, stopping early if `cancel` fires.
    pub async fn process_with(
        &self,
        session: &mut Session,
        text: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        self.run_turn(session, UserTurn::new(text), cancel).await
    }

    /// Process a user turn to completion.
    ///
    /// Retrying a turn id is safe: a finished turn returns its recorded
    /// outcome, and an interrupted one resumes without repeating the user
    /// turn or any function call whose result is already known.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        turn: UserTurn,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        if turn.text.trim().is_empty() {
            return Err(TurnError::EmptyInput);
        }

        match session.begin(&turn) {
            TurnStart::Finished(outcome) => {
                debug!(turn_id = %turn.id, "Turn already answered, returning recorded outcome");
                return Ok(outcome);
            }
            TurnStart::Resumed => info!(turn_id = %turn.id, "Resuming interrupted turn"),
            TurnStart::Fresh => info!(
                turn_id = %turn.id,
                session_id = %session.id(),
                context_len = session.context().len(),
                "Processing user turn"
            ),
        }

        let definitions = self.dispatcher.registry().list_definitions();
        let mut round_trips: u32 = 0;
        let mut partial_text: Option<String> = None;
        let mut state = LoopState::AwaitingModel;

        let (answer, status) = loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if cancel.is_cancelled() {
                        return Err(self.cancelled(&turn));
                    }
                    round_trips += 1;
                    debug!(turn_id = %turn.id, round_trip = round_trips, "Awaiting model");

                    let snapshot = session.context().snapshot();
                    let reply = tokio::select! {
                        _ = cancel.cancelled() => return Err(self.cancelled(&turn)),
                        reply = self.gateway.complete(&snapshot, &definitions) => reply,
                    };

                    match reply {
                        Err(err) => {
                            warn!(turn_id = %turn.id, round_trip = round_trips, error = %err, "Gateway call failed");
                            self.event_bus.publish(AssistantEvent::TurnFailed {
                                turn_id: turn.id.clone(),
                                error: err.to_string(),
                            });
                            return Err(TurnError::Gateway(err));
                        }
                        Ok(ModelReply::Text { content }) => LoopState::Done {
                            answer: content,
                            status: TurnStatus::Answered,
                        },
                        Ok(ModelReply::Calls { requests, content }) => {
                            let content = content.unwrap_or_default();
                            if !content.trim().is_empty() {
                                partial_text = Some(content.clone());
                            }

                            if round_trips >= self.max_round_trips {
                                // The model could never see these results.
                                warn!(
                                    turn_id = %turn.id,
                                    round_trips,
                                    pending_calls = requests.len(),
                                    "Round-trip limit reached, stopping"
                                );
                                LoopState::Done {
                                    answer: self.fallback_answer.clone(),
                                    status: TurnStatus::LimitExceeded,
                                }
                            } else {
                                LoopState::ExecutingFunctions { requests, content }
                            }
                        }
                    }
                }

                LoopState::ExecutingFunctions { requests, content } => {
                    let fresh = self.announce(session, &turn.id, &requests);
                    debug!(
                        turn_id = %turn.id,
                        requested = requests.len(),
                        dispatched = fresh.len(),
                        "Executing function calls"
                    );

                    // Dispatch reports into the session's sink from its own
                    // task, so calls that finish after a cancellation are
                    // still known when the turn is retried.
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let sink = session.completion_sink();
                    let turn_id = turn.id.clone();
                    let batch = tokio::spawn(async move {
                        let results = dispatcher.execute_all(&fresh).await;
                        sink.record(&turn_id, &results);
                        results
                    });

                    let results = tokio::select! {
                        _ = cancel.cancelled() => return Err(self.cancelled(&turn)),
                        joined = batch => match joined {
                            Ok(results) => results,
                            Err(err) => {
                                warn!(turn_id = %turn.id, error = %err, "Function dispatch task aborted");
                                return Err(TurnError::Cancelled);
                            }
                        },
                    };

                    for result in &results {
                        self.publish_result(result);
                    }
                    session.collect_completions(&turn.id);

                    // The request turn goes in first so every result has
                    // its originating call ahead of it.
                    let mut group = Vec::with_capacity(requests.len() + 1);
                    let result_turns: Vec<ConversationTurn> = requests
                        .iter()
                        .filter_map(|r| session.recorded_result(&turn.id, &r.call_id))
                        .cloned()
                        .map(ConversationTurn::function_result)
                        .collect();
                    group.push(ConversationTurn::assistant_calls(content, requests));
                    group.extend(result_turns);
                    session.append_group(group);

                    LoopState::AwaitingModel
                }

                LoopState::Done { answer, status } => break (answer, status),
            };
        };

        session.append(ConversationTurn::assistant(answer.clone()));
        match status {
            TurnStatus::Answered => {
                self.event_bus.publish(AssistantEvent::FinalAnswer {
                    text: answer.clone(),
                });
            }
            TurnStatus::LimitExceeded => {
                self.event_bus.publish(AssistantEvent::LoopLimitExceeded {
                    partial_text: partial_text.unwrap_or_else(|| answer.clone()),
                });
            }
        }

        let outcome = TurnOutcome {
            turn_id: turn.id.clone(),
            answer,
            status,
            round_trips,
            calls: session.results(&turn.id),
        };
        session.finish(outcome.clone());

        info!(
            turn_id = %turn.id,
            round_trips,
            calls = outcome.calls.len(),
            status = ?outcome.status,
            "Turn complete"
        );
        Ok(outcome)
    }

    /// Publish `FunctionCallStarted` for each request that still needs to
    /// run and return those requests. Calls already in the ledger are reused.
    fn announce(
        &self,
        session: &Session,
        turn_id: &str,
        requests: &[FunctionCallRequest],
    ) -> Vec<FunctionCallRequest> {
        let mut fresh: Vec<FunctionCallRequest> = Vec::with_capacity(requests.len());
        for request in requests {
            if session.recorded_result(turn_id, &request.call_id).is_some() {
                debug!(call_id = %request.call_id, function = %request.name, "Reusing recorded result");
                continue;
            }
            if fresh.iter().any(|r| r.call_id == request.call_id) {
                continue;
            }
            self.event_bus.publish(AssistantEvent::FunctionCallStarted {
                call_id: request.call_id.clone(),
                name: request.name.clone(),
                args: request.arguments.clone(),
            });
            fresh.push(request.clone());
        }
        fresh
    }

    fn publish_result(&self, result: &FunctionCallResult) {
        let event = if result.is_success() {
            AssistantEvent::FunctionCallCompleted {
                call_id: result.call_id.clone(),
                name: result.name.clone(),
                result: result.payload.clone(),
            }
        } else {
            AssistantEvent::FunctionCallFailed {
                call_id: result.call_id.clone(),
                name: result.name.clone(),
                error: result.payload.to_string(),
            }
        };
        self.event_bus.publish(event);
    }

    fn cancelled(&self, turn: &UserTurn) -> TurnError {
        info!(turn_id = %turn.id, "Turn cancelled, in-flight calls finish in the background");
        TurnError::Cancelled
    }
}
