//! Conversation turn domain types.
//!
//! These are the value objects that flow through the context window:
//! user speaks → loop appends a user turn → model answers or asks for calls →
//! each call result becomes a function-result turn → model answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::function::{FunctionCallRequest, FunctionCallResult};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// System instructions (assistant persona, rules)
    System,
    /// The end user
    User,
    /// The language model
    Assistant,
    /// The outcome of a function call
    FunctionResult,
}

/// What a turn carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TurnContent {
    Text(String),
    FunctionResult(FunctionCallResult),
}

/// A single entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Unique turn ID
    pub id: String,

    pub role: Role,

    pub content: TurnContent,

    /// Calls requested by the model in this (assistant) turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub function_calls: Vec<FunctionCallRequest>,

    /// Pinned turns are never evicted from the context window
    #[serde(default)]
    pub pinned: bool,

    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    fn build(role: Role, content: TurnContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            function_calls: Vec::new(),
            pinned: false,
            timestamp: Utc::now(),
        }
    }

    /// System prompt turn. Always pinned.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            pinned: true,
            ..Self::build(Role::System, TurnContent::Text(content.into()))
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::build(Role::User, TurnContent::Text(content.into()))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::build(Role::Assistant, TurnContent::Text(content.into()))
    }

    /// Assistant turn that requests function calls. `content` is whatever
    /// text the model produced alongside the calls (often empty).
    pub fn assistant_calls(content: impl Into<String>, calls: Vec<FunctionCallRequest>) -> Self {
        Self {
            function_calls: calls,
            ..Self::build(Role::Assistant, TurnContent::Text(content.into()))
        }
    }

    pub fn function_result(result: FunctionCallResult) -> Self {
        Self::build(Role::FunctionResult, TurnContent::FunctionResult(result))
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Text content, if this is a text turn.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text(t) => Some(t),
            TurnContent::FunctionResult(_) => None,
        }
    }

    pub fn result(&self) -> Option<&FunctionCallResult> {
        match &self.content {
            TurnContent::FunctionResult(r) => Some(r),
            TurnContent::Text(_) => None,
        }
    }

    pub fn requests_calls(&self) -> bool {
        !self.function_calls.is_empty()
    }
}
