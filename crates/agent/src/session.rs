//! Per-user session state: the context window plus a ledger of turns.
//!
//! The ledger makes turn processing idempotent. A caller that retries a
//! turn id gets the cached outcome if the turn finished, and otherwise
//! resumes it without running any function call twice. Only the most
//! recent turns are remembered.

use concierge_config::AppConfig;
use concierge_core::context::ContextWindow;
use concierge_core::function::FunctionCallResult;
use concierge_core::message::ConversationTurn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Turn ids remembered for retries.
const DEFAULT_LEDGER_TURNS: usize = 32;

/// One utterance from the user, identified so retries can be recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTurn {
    pub id: String,
    pub text: String,
}

impl UserTurn {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
        }
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// How a turn reached DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The model produced a final answer
    Answered,
    /// The round-trip limit cut the turn short
    LimitExceeded,
}

/// The result of processing one user turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub turn_id: String,
    pub answer: String,
    pub status: TurnStatus,
    /// Gateway calls made by the attempt that finished the turn
    pub round_trips: u32,
    /// Every function result of the turn, in execution order
    pub calls: Vec<FunctionCallResult>,
}

#[derive(Debug, Default)]
struct LedgerEntry {
    results: Vec<FunctionCallResult>,
    index: HashMap<String, usize>,
    outcome: Option<TurnOutcome>,
}

/// Results written by dispatch tasks, keyed by turn id.
///
/// Dispatch runs detached from the turn, so a call can finish after its turn
/// was cancelled. The result still lands here and the session folds it into
/// the ledger when the turn is retried.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompletionSink {
    inner: Arc<Mutex<HashMap<String, Vec<FunctionCallResult>>>>,
}

impl CompletionSink {
    pub(crate) fn record(&self, turn_id: &str, results: &[FunctionCallResult]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .entry(turn_id.to_string())
            .or_default()
            .extend_from_slice(results);
    }

    fn take(&self, turn_id: &str) -> Vec<FunctionCallResult> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(turn_id).unwrap_or_default()
    }

    fn retain(&self, keep: impl Fn(&str) -> bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.retain(|turn_id, _| keep(turn_id.as_str()));
    }

    fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Where a turn stands when processing (re)starts.
pub(crate) enum TurnStart {
    Fresh,
    Resumed,
    Finished(TurnOutcome),
}

pub struct Session {
    id: String,
    context: ContextWindow,
    ledger: HashMap<String, LedgerEntry>,
    /// Ledger turn ids, oldest first
    ledger_order: VecDeque<String>,
    ledger_limit: usize,
    completions: CompletionSink,
}

impl Session {
    pub fn new(capacity: usize, system_prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            context: ContextWindow::with_system_prompt(capacity, system_prompt),
            ledger: HashMap::new(),
            ledger_order: VecDeque::new(),
            ledger_limit: DEFAULT_LEDGER_TURNS,
            completions: CompletionSink::default(),
        }
    }

    /// How many recent turn ids are remembered for retries (at least one).
    pub fn with_ledger_limit(mut self, limit: usize) -> Self {
        self.ledger_limit = limit.max(1);
        self
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.orchestration.context_window, config.system_prompt.clone())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &ContextWindow {
        &self.context
    }

    /// Cached outcome of a finished turn.
    pub fn outcome(&self, turn_id: &str) -> Option<&TurnOutcome> {
        self.ledger.get(turn_id).and_then(|e| e.outcome.as_ref())
    }

    /// Forget the conversation but keep the system prompt.
    pub fn reset(&mut self) {
        self.context.clear();
        self.ledger.clear();
        self.ledger_order.clear();
        self.completions.clear();
    }

    /// Register the turn, appending the user turn only the first time.
    pub(crate) fn begin(&mut self, turn: &UserTurn) -> TurnStart {
        if let Some(entry) = self.ledger.get(&turn.id) {
            if let Some(outcome) = &entry.outcome {
                return TurnStart::Finished(outcome.clone());
            }
            self.collect_completions(&turn.id);
            return TurnStart::Resumed;
        }
        self.ledger.insert(turn.id.clone(), LedgerEntry::default());
        self.ledger_order.push_back(turn.id.clone());
        self.forget_old_turns();
        self.context.append(ConversationTurn::user(turn.text.clone()));
        TurnStart::Fresh
    }

    fn forget_old_turns(&mut self) {
        while self.ledger_order.len() > self.ledger_limit {
            if let Some(oldest) = self.ledger_order.pop_front() {
                self.ledger.remove(&oldest);
            }
        }
        let ledger = &self.ledger;
        self.completions.retain(|turn_id| ledger.contains_key(turn_id));
    }

    pub(crate) fn completion_sink(&self) -> CompletionSink {
        self.completions.clone()
    }

    /// Move results written by dispatch tasks into the turn's ledger.
    pub(crate) fn collect_completions(&mut self, turn_id: &str) {
        for result in self.completions.take(turn_id) {
            self.record_result(turn_id, result);
        }
    }

    pub(crate) fn recorded_result(&self, turn_id: &str, call_id: &str) -> Option<&FunctionCallResult> {
        let entry = self.ledger.get(turn_id)?;
        entry.index.get(call_id).map(|&i| &entry.results[i])
    }

    pub(crate) fn record_result(&mut self, turn_id: &str, result: FunctionCallResult) {
        let Some(entry) = self.ledger.get_mut(turn_id) else {
            return;
        };
        if entry.index.contains_key(&result.call_id) {
            return;
        }
        entry.index.insert(result.call_id.clone(), entry.results.len());
        entry.results.push(result);
    }

    pub(crate) fn results(&self, turn_id: &str) -> Vec<FunctionCallResult> {
        self.ledger
            .get(turn_id)
            .map(|e| e.results.clone())
            .unwrap_or_default()
    }

    pub(crate) fn finish(&mut self, outcome: TurnOutcome) {
        if let Some(entry) = self.ledger.get_mut(&outcome.turn_id) {
            entry.outcome = Some(outcome);
        }
    }

    pub(crate) fn append(&mut self, turn: ConversationTurn) {
        self.context.append(turn);
    }

    pub(crate) fn append_group(&mut self, turns: Vec<ConversationTurn>) {
        self.context.append_group(turns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::function::FunctionCallRequest;
    use concierge_core::message::Role;
    use concierge_core::value::Value;

    #[test]
    fn begin_appends_user_turn_once() {
        let mut session = Session::new(10, "You are helpful.");
        let turn = UserTurn::with_id("t1", "hello");

        assert!(matches!(session.begin(&turn), TurnStart::Fresh));
        assert!(matches!(session.begin(&turn), TurnStart::Resumed));

        let users = session
            .context()
            .iter()
            .filter(|t| t.role == Role::User)
            .count();
        assert_eq!(users, 1);
    }

    #[test]
    fn finished_turn_returns_cached_outcome() {
        let mut session = Session::new(10, "sys");
        let turn = UserTurn::with_id("t1", "hello");
        session.begin(&turn);
        session.finish(TurnOutcome {
            turn_id: "t1".into(),
            answer: "hi".into(),
            status: TurnStatus::Answered,
            round_trips: 1,
            calls: vec![],
        });

        match session.begin(&turn) {
            TurnStart::Finished(outcome) => assert_eq!(outcome.answer, "hi"),
            _ => panic!("expected cached outcome"),
        }
        assert_eq!(session.outcome("t1").map(|o| o.round_trips), Some(1));
    }

    #[test]
    fn results_are_recorded_once_per_call_id() {
        let mut session = Session::new(10, "sys");
        session.begin(&UserTurn::with_id("t1", "weather?"));
        let request = FunctionCallRequest::new("call_1", "get_weather", serde_json::json!({}));
        session.record_result("t1", FunctionCallResult::success(&request, Value::from(1)));
        session.record_result("t1", FunctionCallResult::success(&request, Value::from(2)));

        assert_eq!(session.results("t1").len(), 1);
        assert_eq!(
            session.recorded_result("t1", "call_1").map(|r| &r.payload),
            Some(&Value::from(1))
        );
        assert!(session.recorded_result("t2", "call_1").is_none());
    }

    #[test]
    fn reset_keeps_system_prompt() {
        let mut session = Session::new(10, "sys");
        session.begin(&UserTurn::new("hello"));
        session.reset();
        assert_eq!(session.context().len(), 1);
        assert_eq!(session.context().iter().next().map(|t| t.role), Some(Role::System));
    }

    #[test]
    fn ledger_forgets_oldest_turns_past_its_limit() {
        let mut session = Session::new(10, "sys").with_ledger_limit(2);
        for id in ["t1", "t2", "t3"] {
            let turn = UserTurn::with_id(id, "hello");
            session.begin(&turn);
            session.finish(TurnOutcome {
                turn_id: id.into(),
                answer: format!("answer {id}"),
                status: TurnStatus::Answered,
                round_trips: 1,
                calls: vec![],
            });
        }

        assert!(session.outcome("t1").is_none());
        assert!(session.outcome("t2").is_some());
        assert!(session.outcome("t3").is_some());
        assert_eq!(session.ledger.len(), 2);
        assert_eq!(session.ledger_order, ["t2", "t3"]);
    }

    #[test]
    fn late_completions_are_folded_in_on_resume() {
        let mut session = Session::new(10, "sys");
        let turn = UserTurn::with_id("t1", "remind me");
        session.begin(&turn);

        let request = FunctionCallRequest::new("call_1", "create_reminder", serde_json::json!({}));
        session
            .completion_sink()
            .record("t1", &[FunctionCallResult::success(&request, Value::from("ok"))]);
        assert!(session.recorded_result("t1", "call_1").is_none());

        assert!(matches!(session.begin(&turn), TurnStart::Resumed));
        assert!(session.recorded_result("t1", "call_1").is_some());
    }

    #[test]
    fn completions_for_forgotten_turns_are_dropped() {
        let mut session = Session::new(10, "sys").with_ledger_limit(1);
        session.begin(&UserTurn::with_id("t1", "first"));
        let request = FunctionCallRequest::new("call_1", "get_weather", serde_json::json!({}));
        let sink = session.completion_sink();
        sink.record("t1", &[FunctionCallResult::success(&request, Value::from(1))]);

        session.begin(&UserTurn::with_id("t2", "second"));
        assert!(sink.take("t1").is_empty());
    }

    #[test]
    fn generated_turn_ids_are_unique() {
        assert_ne!(UserTurn::new("a").id, UserTurn::new("a").id);
    }
}
