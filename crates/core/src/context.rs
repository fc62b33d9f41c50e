//! Bounded conversation history.
//!
//! The window keeps the most recent turns up to a configured capacity.
//! Pinned turns (the system prompt) are kept forever and do not count
//! towards the capacity. Eviction is FIFO over the unpinned turns, and an
//! assistant turn that requested calls leaves together with its results.

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::message::{ConversationTurn, Role};

/// Immutable copy of the window handed to the gateway.
///
/// Cheap to clone; later appends to the window are not visible through it.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    turns: Arc<[ConversationTurn]>,
}

impl ContextSnapshot {
    pub fn new(turns: Vec<ConversationTurn>) -> Self {
        Self {
            turns: turns.into(),
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }
}

impl Deref for ContextSnapshot {
    type Target = [ConversationTurn];

    fn deref(&self) -> &Self::Target {
        &self.turns
    }
}

#[derive(Debug, Clone)]
pub struct ContextWindow {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ContextWindow {
    /// `capacity` is the number of unpinned turns retained.
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Window seeded with a pinned system prompt.
    pub fn with_system_prompt(capacity: usize, prompt: impl Into<String>) -> Self {
        let mut window = Self::new(capacity);
        window.append(ConversationTurn::system(prompt));
        window
    }

    /// Add a turn at the tail, evicting from the head as needed.
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        self.enforce_capacity();
    }

    /// Add an assistant call turn and its results in one step.
    ///
    /// Capacity is enforced once, after the whole group is in, so eviction
    /// only ever removes older turns or the group as a whole. A group larger
    /// than the capacity cannot be held and is dropped.
    pub fn append_group(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        let before = self.turns.len();
        self.turns.extend(turns);
        let added = self.turns.len() - before;
        let unpinned = self.turns.iter().skip(before).filter(|t| !t.pinned).count();
        if unpinned > self.capacity {
            warn!(
                group = added,
                capacity = self.capacity,
                "Function call group does not fit in the context window"
            );
        }
        self.enforce_capacity();
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot::new(self.turns.iter().cloned().collect())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total turns held, pinned included.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Turns that count towards the capacity.
    pub fn unpinned_len(&self) -> usize {
        self.turns.iter().filter(|t| !t.pinned).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    /// Drop every unpinned turn.
    pub fn clear(&mut self) {
        self.turns.retain(|t| t.pinned);
    }

    fn enforce_capacity(&mut self) {
        let mut evicted = 0usize;
        while self.unpinned_len() > self.capacity {
            if !self.evict_oldest_unpinned() {
                break;
            }
            evicted += 1 + self.evict_orphaned_results();
        }
        evicted += self.evict_orphaned_results();

        if evicted > 0 {
            debug!(evicted, remaining = self.turns.len(), "Context window trimmed");
        }
    }

    /// A function result whose requesting assistant turn is gone cannot be
    /// rendered to the model, so results at the head of the history go too.
    fn evict_orphaned_results(&mut self) -> usize {
        let mut evicted = 0;
        while self
            .oldest_unpinned()
            .is_some_and(|t| t.role == Role::FunctionResult)
        {
            self.evict_oldest_unpinned();
            evicted += 1;
        }
        evicted
    }

    fn oldest_unpinned(&self) -> Option<&ConversationTurn> {
        self.turns.iter().find(|t| !t.pinned)
    }

    fn evict_oldest_unpinned(&mut self) -> bool {
        match self.turns.iter().position(|t| !t.pinned) {
            Some(index) => {
                self.turns.remove(index);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{FunctionCallRequest, FunctionCallResult};
    use crate::value::Value;
    use proptest::prelude::*;

    fn call_pair(id: &str) -> (ConversationTurn, ConversationTurn) {
        let req = FunctionCallRequest::new(id, "get_weather", serde_json::json!({}));
        let result = FunctionCallResult::success(&req, Value::from(18i64));
        (
            ConversationTurn::assistant_calls("", vec![req]),
            ConversationTurn::function_result(result),
        )
    }

    #[test]
    fn evicts_oldest_first() {
        let mut window = ContextWindow::with_system_prompt(3, "system");
        for i in 0..5 {
            window.append(ConversationTurn::user(format!("msg {i}")));
        }
        let texts: Vec<_> = window.iter().filter_map(|t| t.text()).collect();
        assert_eq!(texts, ["system", "msg 2", "msg 3", "msg 4"]);
        assert_eq!(window.unpinned_len(), 3);
    }

    #[test]
    fn system_prompt_survives_eviction() {
        let mut window = ContextWindow::with_system_prompt(1, "system");
        for i in 0..10 {
            window.append(ConversationTurn::user(format!("msg {i}")));
        }
        assert_eq!(window.len(), 2);
        assert_eq!(window.iter().next().unwrap().role, Role::System);
    }

    #[test]
    fn orphaned_results_are_evicted_with_their_request() {
        let mut window = ContextWindow::with_system_prompt(3, "system");
        let (calls, result) = call_pair("call_1");
        window.append(ConversationTurn::user("weather?"));
        window.append(calls);
        window.append(result);
        // These two appends push out the user turn and then the call turn,
        // which would leave the result orphaned at the head.
        window.append(ConversationTurn::assistant("18 degrees"));
        window.append(ConversationTurn::user("thanks"));

        let roles: Vec<_> = window.iter().map(|t| t.role).collect();
        assert_eq!(roles, [Role::System, Role::Assistant, Role::User]);
    }

    fn call_group(prefix: &str, n: usize) -> Vec<ConversationTurn> {
        let requests: Vec<_> = (0..n)
            .map(|i| FunctionCallRequest::new(format!("{prefix}_{i}"), "get_weather", serde_json::json!({})))
            .collect();
        let results = requests
            .iter()
            .map(|req| ConversationTurn::function_result(FunctionCallResult::success(req, Value::from(18i64))));
        std::iter::once(ConversationTurn::assistant_calls("", requests.clone()))
            .chain(results)
            .collect()
    }

    /// Every result in the window has its requesting call turn ahead of it.
    fn results_are_anchored(window: &ContextWindow) -> bool {
        let mut open: Vec<String> = Vec::new();
        for turn in window.iter() {
            open.extend(turn.function_calls.iter().map(|c| c.call_id.clone()));
            if let Some(result) = turn.result() {
                if !open.contains(&result.call_id) {
                    return false;
                }
            }
        }
        true
    }

    #[test]
    fn call_group_evicts_older_turns_and_stays_whole() {
        let mut window = ContextWindow::with_system_prompt(5, "system");
        window.append(ConversationTurn::user("hello"));
        window.append(ConversationTurn::assistant("hi"));
        window.append(ConversationTurn::user("weather in three cities?"));
        window.append_group(call_group("call", 3));

        let roles: Vec<_> = window.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            [
                Role::System,
                Role::User,
                Role::Assistant,
                Role::FunctionResult,
                Role::FunctionResult,
                Role::FunctionResult,
            ]
        );
        assert_eq!(window.iter().nth(1).and_then(|t| t.text()), Some("weather in three cities?"));
        assert!(results_are_anchored(&window));
    }

    #[test]
    fn oversized_call_group_never_leaves_results_at_head() {
        let mut window = ContextWindow::with_system_prompt(3, "system");
        window.append(ConversationTurn::user("weather in four cities?"));
        window.append_group(call_group("call", 4));

        assert!(window.unpinned_len() <= 3);
        assert!(window.iter().all(|t| t.role != Role::FunctionResult));
        assert!(results_are_anchored(&window));
    }

    #[test]
    fn evicting_a_call_turn_takes_its_results() {
        let mut window = ContextWindow::with_system_prompt(4, "system");
        window.append_group(call_group("call", 2));
        window.append(ConversationTurn::assistant("done"));
        // Pushes out the call turn; both results must follow it.
        window.append(ConversationTurn::user("thanks"));

        let roles: Vec<_> = window.iter().map(|t| t.role).collect();
        assert_eq!(roles, [Role::System, Role::Assistant, Role::User]);
    }

    #[test]
    fn snapshot_is_isolated_from_later_appends() {
        let mut window = ContextWindow::with_system_prompt(5, "system");
        window.append(ConversationTurn::user("first"));
        let snapshot = window.snapshot();
        window.append(ConversationTurn::user("second"));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn clear_keeps_pinned() {
        let mut window = ContextWindow::with_system_prompt(5, "system");
        window.append(ConversationTurn::user("hola"));
        window.clear();
        assert_eq!(window.len(), 1);
        assert!(window.iter().all(|t| t.pinned));
    }

    #[derive(Debug, Clone)]
    enum Op {
        User,
        Assistant,
        Calls,
        Group(usize),
        Pinned,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => Just(Op::User),
            3 => Just(Op::Assistant),
            2 => Just(Op::Calls),
            2 => (1usize..14).prop_map(Op::Group),
            1 => Just(Op::Pinned),
        ]
    }

    proptest! {
        #[test]
        fn eviction_respects_capacity_pins_and_call_groups(
            capacity in 1usize..12,
            ops in prop::collection::vec(op(), 0..80),
        ) {
            let mut window = ContextWindow::with_system_prompt(capacity, "system");
            let mut pinned_ids = vec![window.iter().next().unwrap().id.clone()];

            for (i, op) in ops.into_iter().enumerate() {
                match op {
                    Op::User => window.append(ConversationTurn::user(format!("u{i}"))),
                    Op::Assistant => window.append(ConversationTurn::assistant(format!("a{i}"))),
                    Op::Calls => {
                        let (calls, result) = call_pair(&format!("call_{i}"));
                        window.append(calls);
                        window.append(result);
                    }
                    Op::Group(n) => window.append_group(call_group(&format!("group_{i}"), n)),
                    Op::Pinned => {
                        let turn = ConversationTurn::user(format!("p{i}")).pinned();
                        pinned_ids.push(turn.id.clone());
                        window.append(turn);
                    }
                }

                prop_assert!(window.unpinned_len() <= capacity);
                prop_assert!(
                    window.iter().find(|t| !t.pinned).is_none_or(|t| t.role != Role::FunctionResult)
                );
                prop_assert!(results_are_anchored(&window));
                for id in &pinned_ids {
                    prop_assert!(window.iter().any(|t| &t.id == id));
                }
            }
        }
    }
}
