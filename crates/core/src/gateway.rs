//! Gateway trait: the abstraction over language-model backends.
//!
//! A gateway knows how to send the conversation plus the callable functions
//! to a model and parse the reply into either a final text or a set of
//! function calls. It performs no retries; retry policy belongs to callers.
//!
//! Implementations: OpenAI-compatible endpoints (OpenAI, Azure OpenAI,
//! local servers), scripted gateways in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextSnapshot;
use crate::error::GatewayError;
use crate::function::FunctionCallRequest;
use crate::schema::FunctionDefinition;

/// What the model answered with in one round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelReply {
    /// A final natural-language answer.
    Text { content: String },

    /// One or more function calls, plus any text the model emitted with them.
    Calls {
        requests: Vec<FunctionCallRequest>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn calls(requests: Vec<FunctionCallRequest>) -> Self {
        Self::Calls {
            requests,
            content: None,
        }
    }

    pub fn is_calls(&self) -> bool {
        matches!(self, Self::Calls { .. })
    }
}

/// Every model backend implements this trait. The orchestration loop calls
/// `complete()` without knowing which provider is behind it.
#[async_trait]
pub trait LanguageModelGateway: Send + Sync {
    /// A human-readable name for this gateway (e.g., "openai", "azure").
    fn name(&self) -> &str;

    /// Send the context and available functions; parse the model's reply.
    async fn complete(
        &self,
        context: &ContextSnapshot,
        functions: &[FunctionDefinition],
    ) -> Result<ModelReply, GatewayError>;
}
