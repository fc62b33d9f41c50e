//! Error types for the Concierge domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! rolls them up for callers that do not care which layer failed.

use thiserror::Error;

/// The top-level error type for all Concierge operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Function already registered: {0}")]
    DuplicateName(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid function definition: {0}")]
    InvalidDefinition(String),
}

/// A violated parameter-schema constraint. The `Display` text is what the
/// model sees in the failed call result, so it names the parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("arguments must be a JSON object, got {found}")]
    NotAnObject { found: String },

    #[error("missing required parameter '{param}'")]
    MissingParameter { param: String },

    #[error("unknown parameter '{param}'")]
    UnknownParameter { param: String },

    #[error("parameter '{param}' expects {expected}, got {found}")]
    TypeMismatch {
        param: String,
        expected: String,
        found: String,
    },

    #[error("parameter '{param}' must be one of [{allowed}], got {value}")]
    NotInEnum {
        param: String,
        value: String,
        allowed: String,
    },

    #[error("parameter '{param}' is out of range: {reason}")]
    OutOfRange { param: String, reason: String },
}

/// A business failure reported by a function handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Failures of the language-model round trip. None of these are retried by
/// the gateway itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Provider request failed: {0}")]
    Provider(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Why a single function call did not produce a value. Every variant is
/// converted into a failed call result; none reaches the loop's caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("function not available")]
    Unavailable(#[source] RegistryError),

    #[error("{0}")]
    Invalid(#[from] ValidationError),

    #[error("{0}")]
    Failed(#[from] ExecutionError),

    #[error("timeout")]
    Timeout { timeout_ms: u64 },

    #[error("function crashed: {0}")]
    Crashed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_displays_correctly() {
        let err = Error::Gateway(GatewayError::RateLimited {
            retry_after_secs: 7,
        });
        assert!(err.to_string().contains("retry after 7s"));
    }

    #[test]
    fn dispatch_payloads_match_wire_contract() {
        let unknown = DispatchError::Unavailable(RegistryError::UnknownFunction("x".into()));
        assert_eq!(unknown.to_string(), "function not available");

        let timeout = DispatchError::Timeout { timeout_ms: 5000 };
        assert_eq!(timeout.to_string(), "timeout");

        let failed = DispatchError::from(ExecutionError::new("no such city"));
        assert_eq!(failed.to_string(), "no such city");
    }

    #[test]
    fn validation_error_names_parameter() {
        let err = ValidationError::NotInEnum {
            param: "units".into(),
            value: "\"kelvin\"".into(),
            allowed: "\"metric\", \"imperial\"".into(),
        };
        let text = err.to_string();
        assert!(text.contains("units"));
        assert!(text.contains("kelvin"));
    }
}
