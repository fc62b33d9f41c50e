//! Function dispatcher: turns model-issued call requests into results.
//!
//! Every request goes through the same pipeline:
//!
//! 1. **Lookup** the handler in the registry
//! 2. **Validate** the raw arguments against the definition's schema
//! 3. **Invoke** the handler on its own task under a timeout
//!
//! Any failure along the way (unknown name, bad arguments, handler error,
//! timeout, panic) becomes a failed [`FunctionCallResult`]. Nothing a handler
//! does can propagate to the orchestration loop.

use concierge_config::OrchestrationConfig;
use concierge_core::error::DispatchError;
use concierge_core::function::{FunctionCallRequest, FunctionCallResult};
use concierge_core::registry::FunctionRegistry;
use concierge_core::value::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONCURRENT: usize = 4;

pub struct FunctionDispatcher {
    registry: Arc<FunctionRegistry>,
    timeout: Duration,
    permits: Arc<Semaphore>,
}

impl FunctionDispatcher {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
        }
    }

    pub fn from_config(registry: Arc<FunctionRegistry>, config: &OrchestrationConfig) -> Self {
        Self::new(registry)
            .with_timeout(Duration::from_millis(config.call_timeout_ms))
            .with_max_concurrent(config.max_concurrent_calls)
    }

    /// Per-call timeout. Timed-out calls are never retried.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Maximum number of handlers running at once.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute a single call. Always yields a result, never an error.
    pub async fn execute(&self, request: &FunctionCallRequest) -> FunctionCallResult {
        let start = Instant::now();
        match self.run(request).await {
            Ok(value) => {
                debug!(
                    call_id = %request.call_id,
                    function = %request.name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Function call succeeded"
                );
                FunctionCallResult::success(request, value)
            }
            Err(err) => {
                warn!(
                    call_id = %request.call_id,
                    function = %request.name,
                    error = %err,
                    "Function call failed"
                );
                FunctionCallResult::failure(request, &err)
            }
        }
    }

    /// Execute every request concurrently, bounded by the concurrency limit.
    ///
    /// Waits for the whole set. The returned results line up with `requests`
    /// and each carries the call id of the request it answers.
    pub async fn execute_all(&self, requests: &[FunctionCallRequest]) -> Vec<FunctionCallResult> {
        futures::future::join_all(requests.iter().map(|request| self.execute(request))).await
    }

    async fn run(&self, request: &FunctionCallRequest) -> Result<Value, DispatchError> {
        let handler = self
            .registry
            .get_handler(&request.name)
            .map_err(DispatchError::Unavailable)?;
        let args = self
            .registry
            .get_definition(&request.name)
            .map_err(DispatchError::Unavailable)?
            .validate(&request.arguments)?;

        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Crashed("dispatcher is shut down".into()))?;

        // The handler runs detached: if the caller goes away, the call still
        // stops at its own timeout and its result is simply dropped.
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            let _permit = permit;
            tokio::time::timeout(timeout, handler.call(args)).await
        });

        match task.await {
            Ok(Ok(outcome)) => outcome.map_err(DispatchError::from),
            Ok(Err(_elapsed)) => Err(DispatchError::Timeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Err(join_err) if join_err.is_panic() => {
                Err(DispatchError::Crashed(panic_message(join_err.into_panic())))
            }
            Err(join_err) => Err(DispatchError::Crashed(join_err.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::error::ExecutionError;
    use concierge_core::function::{Arguments, CallStatus, handler_fn};
    use concierge_core::schema::{FunctionDefinition, ParameterSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn weather_def() -> FunctionDefinition {
        FunctionDefinition::new("get_weather", "Current weather")
            .param(ParameterSpec::string("location", "City").required())
            .param(ParameterSpec::string("units", "Units").one_of(["metric", "imperial"]))
    }

    fn counting_registry(counter: Arc<AtomicUsize>) -> Arc<FunctionRegistry> {
        let mut registry = FunctionRegistry::new();
        registry
            .register(
                weather_def(),
                Arc::new(handler_fn(move |args: Arguments| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let location = args.require_str("location")?;
                        if location == "??" {
                            return Err(ExecutionError::new("unknown location '??'"));
                        }
                        Ok(Value::map([
                            ("location", Value::from(location)),
                            ("temperature", Value::from(18)),
                        ]))
                    }
                })),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn sleeper_registry() -> Arc<FunctionRegistry> {
        let mut registry = FunctionRegistry::new();
        registry
            .register(
                FunctionDefinition::new("sleep", "Sleep then echo")
                    .param(ParameterSpec::integer("ms", "Delay").required()),
                Arc::new(handler_fn(|args: Arguments| async move {
                    let ms = args.i64("ms").unwrap_or(0);
                    tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                    Ok::<_, ExecutionError>(Value::from(ms))
                })),
            )
            .unwrap();
        registry
            .register(
                FunctionDefinition::new("explode", "Always panics"),
                Arc::new(handler_fn(|_args: Arguments| async move {
                    if true {
                        panic!("boom");
                    }
                    Ok::<_, ExecutionError>(Value::Null)
                })),
            )
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn successful_call() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = FunctionDispatcher::new(counting_registry(counter.clone()));

        let request =
            FunctionCallRequest::new("call_1", "get_weather", serde_json::json!({"location": "Madrid"}));
        let result = dispatcher.execute(&request).await;

        assert_eq!(result.status, CallStatus::Success);
        assert_eq!(result.call_id, "call_1");
        assert_eq!(result.payload.get("temperature"), Some(&Value::from(18)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_function_is_unavailable() {
        let dispatcher = FunctionDispatcher::new(counting_registry(Arc::default()));
        let result = dispatcher
            .execute(&FunctionCallRequest::new("c", "launch_rocket", serde_json::json!({})))
            .await;
        assert_eq!(result.status, CallStatus::Error);
        assert_eq!(result.payload, Value::from("function not available"));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_the_handler() {
        let counter = Arc::new(AtomicUsize::new(0));
        let dispatcher = FunctionDispatcher::new(counting_registry(counter.clone()));

        let invalid = [
            serde_json::json!({}),
            serde_json::json!({"location": ["Madrid"]}),
            serde_json::json!({"location": "Madrid", "units": "kelvin"}),
            serde_json::json!({"location": "Madrid", "extra": true}),
            serde_json::json!("not json at all"),
        ];
        for (i, args) in invalid.into_iter().enumerate() {
            let request = FunctionCallRequest::new(format!("c{i}"), "get_weather", args);
            let result = dispatcher.execute(&request).await;
            assert_eq!(result.status, CallStatus::Error, "case {i}");
            assert!(!result.payload.to_string().is_empty());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let dispatcher = FunctionDispatcher::new(counting_registry(Arc::default()));
        let result = dispatcher
            .execute(&FunctionCallRequest::new(
                "c",
                "get_weather",
                serde_json::json!({"location": "??"}),
            ))
            .await;
        assert_eq!(result.status, CallStatus::Error);
        assert_eq!(result.payload, Value::from("unknown location '??'"));
        assert_eq!(result.to_model_content(), "Error: unknown location '??'");
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let dispatcher =
            FunctionDispatcher::new(sleeper_registry()).with_timeout(Duration::from_millis(20));
        let result = dispatcher
            .execute(&FunctionCallRequest::new("c", "sleep", serde_json::json!({"ms": 2000})))
            .await;
        assert_eq!(result.status, CallStatus::Error);
        assert_eq!(result.payload, Value::from("timeout"));
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let dispatcher = FunctionDispatcher::new(sleeper_registry());
        let result = dispatcher
            .execute(&FunctionCallRequest::new("c", "explode", serde_json::Value::Null))
            .await;
        assert_eq!(result.status, CallStatus::Error);
        assert_eq!(result.payload, Value::from("function crashed: boom"));
    }

    #[tokio::test]
    async fn concurrent_results_keep_their_call_ids() {
        let dispatcher = FunctionDispatcher::new(sleeper_registry()).with_max_concurrent(3);
        // Completion order is the reverse of request order.
        let requests: Vec<_> = [60, 30, 5]
            .into_iter()
            .enumerate()
            .map(|(i, ms)| FunctionCallRequest::new(format!("call_{i}"), "sleep", serde_json::json!({"ms": ms})))
            .collect();

        let results = dispatcher.execute_all(&requests).await;
        assert_eq!(results.len(), 3);
        for (request, result) in requests.iter().zip(&results) {
            assert_eq!(result.call_id, request.call_id);
            assert_eq!(result.payload, Value::from(request.arguments["ms"].as_i64().unwrap()));
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = FunctionRegistry::new();
        {
            let (in_flight, peak) = (in_flight.clone(), peak.clone());
            registry
                .register(
                    FunctionDefinition::new("work", "Tracks parallelism"),
                    Arc::new(handler_fn(move |_args: Arguments| {
                        let (in_flight, peak) = (in_flight.clone(), peak.clone());
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, ExecutionError>(Value::Null)
                        }
                    })),
                )
                .unwrap();
        }

        let dispatcher = FunctionDispatcher::new(Arc::new(registry)).with_max_concurrent(2);
        let requests: Vec<_> = (0..6)
            .map(|i| FunctionCallRequest::new(format!("c{i}"), "work", serde_json::json!({})))
            .collect();
        let results = dispatcher.execute_all(&requests).await;

        assert!(results.iter().all(FunctionCallResult::is_success));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn from_config_uses_orchestration_settings() {
        let config = OrchestrationConfig {
            call_timeout_ms: 1500,
            ..OrchestrationConfig::default()
        };
        let dispatcher = FunctionDispatcher::from_config(Arc::new(FunctionRegistry::new()), &config);
        assert_eq!(dispatcher.timeout(), Duration::from_millis(1500));
    }
}
