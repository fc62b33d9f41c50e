//! Function handlers and the request/result types that flow through the
//! dispatcher.
//!
//! Handlers are what give the assistant the ability to act: look up the
//! weather, create a reminder, search the web. Each one is bound to a
//! [`FunctionDefinition`](crate::schema::FunctionDefinition) in the registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;

use crate::error::{DispatchError, ExecutionError};
use crate::value::Value;

/// Arguments that passed schema validation, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments(BTreeMap<String, Value>);

impl Arguments {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self(values)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// Fetch a string the schema marks as required.
    pub fn require_str(&self, name: &str) -> Result<&str, ExecutionError> {
        self.str(name)
            .ok_or_else(|| ExecutionError::new(format!("missing '{name}' argument")))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_value(self) -> Value {
        Value::Map(self.0)
    }
}

/// The executable half of a registered function.
///
/// Handlers receive arguments that already satisfy the function's schema.
/// Business failures are reported as [`ExecutionError`]; panics are caught
/// by the dispatcher and never reach the orchestration loop.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    async fn call(&self, args: Arguments) -> Result<Value, ExecutionError>;
}

/// Adapter turning an async closure into a [`FunctionHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

/// Wrap an async closure as a handler.
///
/// ```ignore
/// let handler = handler_fn(|args: Arguments| async move {
///     Ok::<_, ExecutionError>(Value::from(args.str("text").unwrap_or_default()))
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    FnHandler {
        f,
        _fut: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> FunctionHandler for FnHandler<F, Fut>
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    async fn call(&self, args: Arguments) -> Result<Value, ExecutionError> {
        (self.f)(args).await
    }
}

/// A model-issued request to invoke a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallRequest {
    /// Unique call ID (matches the model's tool_call.id)
    pub call_id: String,

    /// Name of the function to execute
    pub name: String,

    /// Raw, unvalidated arguments exactly as the model produced them
    pub arguments: serde_json::Value,
}

impl FunctionCallRequest {
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

/// The outcome of one function call, relayed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    /// The call ID this result answers
    pub call_id: String,

    /// Function that was (or would have been) invoked
    pub name: String,

    pub status: CallStatus,

    /// The handler's value on success, or a `String` describing the failure
    pub payload: Value,
}

impl FunctionCallResult {
    pub fn success(request: &FunctionCallRequest, value: Value) -> Self {
        Self {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            status: CallStatus::Success,
            payload: value,
        }
    }

    pub fn failure(request: &FunctionCallRequest, error: &DispatchError) -> Self {
        Self {
            call_id: request.call_id.clone(),
            name: request.name.clone(),
            status: CallStatus::Error,
            payload: Value::String(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CallStatus::Success
    }

    /// Text form sent to the model as the function-result message content.
    pub fn to_model_content(&self) -> String {
        match self.status {
            CallStatus::Success => self.payload.to_json_string(),
            CallStatus::Error => format!("Error: {}", self.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[tokio::test]
    async fn closure_handler_is_callable() {
        let handler = handler_fn(|args: Arguments| async move {
            let text = args.require_str("text")?;
            Ok::<_, ExecutionError>(Value::from(text.to_uppercase()))
        });

        let mut values = BTreeMap::new();
        values.insert("text".to_string(), Value::from("hola"));
        let out = handler.call(Arguments::new(values)).await.unwrap();
        assert_eq!(out, Value::from("HOLA"));

        let err = handler.call(Arguments::default()).await.unwrap_err();
        assert!(err.message.contains("text"));
    }

    #[test]
    fn model_content_for_success_is_json() {
        let req = FunctionCallRequest::new("call_1", "get_weather", serde_json::json!({}));
        let result = FunctionCallResult::success(
            &req,
            Value::map([("temperature", Value::from(18i64))]),
        );
        assert_eq!(result.to_model_content(), r#"{"temperature":18}"#);
    }

    #[test]
    fn model_content_for_failure_is_prefixed() {
        let req = FunctionCallRequest::new("call_1", "nope", serde_json::json!({}));
        let result = FunctionCallResult::failure(
            &req,
            &DispatchError::Unavailable(RegistryError::UnknownFunction("nope".into())),
        );
        assert!(!result.is_success());
        assert_eq!(result.to_model_content(), "Error: function not available");
    }
}
