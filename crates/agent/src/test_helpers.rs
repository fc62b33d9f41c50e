//! Shared test helpers for loop tests.

use async_trait::async_trait;
use concierge_core::context::ContextSnapshot;
use concierge_core::error::GatewayError;
use concierge_core::event::{AssistantEvent, Subscription};
use concierge_core::function::FunctionCallRequest;
use concierge_core::gateway::{LanguageModelGateway, ModelReply};
use concierge_core::message::ConversationTurn;
use concierge_core::schema::FunctionDefinition;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A gateway that plays back a fixed script of replies.
///
/// Each call to `complete` pops the next entry and records the context it
/// was given. Once the script runs out every call fails.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<ModelReply, GatewayError>>>,
    seen: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<ModelReply, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn replies(replies: Vec<ModelReply>) -> Self {
        Self::new(replies.into_iter().map(Ok).collect())
    }

    pub fn push(&self, reply: Result<ModelReply, GatewayError>) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn call_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// The context sent on the `n`-th call.
    pub fn context_at(&self, n: usize) -> Vec<ConversationTurn> {
        self.seen.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl LanguageModelGateway for ScriptedGateway {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        context: &ContextSnapshot,
        _functions: &[FunctionDefinition],
    ) -> Result<ModelReply, GatewayError> {
        self.seen.lock().unwrap().push(context.turns().to_vec());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GatewayError::Provider("script exhausted".into())))
    }
}

pub fn call(id: &str, name: &str, args: serde_json::Value) -> FunctionCallRequest {
    FunctionCallRequest::new(id, name, args)
}

/// Everything published so far.
pub fn drain(subscription: &mut Subscription) -> Vec<AssistantEvent> {
    let mut events = Vec::new();
    while let Some(event) = subscription.try_recv() {
        events.push((*event).clone());
    }
    events
}
