//! Topic-based event bus with wildcard subscriptions and bounded history.
//!
//! Topics are dot-separated strings (`task.started`). Subscriptions accept
//! literal names, glob patterns with a wildcard segment (`task.*`), or the
//! global wildcard `*`. [`EventBus::emit`] invokes matching handlers
//! synchronously in subscription order; a failing handler is logged and does
//! not prevent subsequent handlers from running.
//!
//! The bus holds handlers only until [`EventBus::unsubscribe`] — after that
//! the handler is fully detached and dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use glob::Pattern;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;

/// Emitted when a plugin finishes loading.
pub const PLUGIN_LOADED: &str = "plugin.loaded";
/// Emitted when a plugin is unloaded.
pub const PLUGIN_UNLOADED: &str = "plugin.unloaded";
/// Emitted when a task begins executing.
pub const TASK_STARTED: &str = "task.started";
/// Emitted when a task completes successfully.
pub const TASK_COMPLETED: &str = "task.completed";
/// Emitted when a task fails.
pub const TASK_FAILED: &str = "task.failed";
/// Emitted when a task is cancelled.
pub const TASK_CANCELLED: &str = "task.cancelled";
/// Emitted when a session is created.
pub const SESSION_STARTED: &str = "session.started";
/// Emitted when a session is shut down.
pub const SESSION_ENDED: &str = "session.ended";

/// A single emitted event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Topic name (e.g. `task.started`).
    pub name: String,
    /// Event payload.
    pub data: Value,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Handler invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum TopicFilter {
    Literal(String),
    Glob(Pattern),
}

impl TopicFilter {
    fn parse(pattern: &str) -> Self {
        if pattern.contains('*') {
            // fnmatch-style: `*` spans segments, matching the original
            // subscription semantics. An invalid pattern degrades to a
            // literal match.
            Pattern::new(pattern).map_or_else(
                |_| Self::Literal(pattern.to_owned()),
                Self::Glob,
            )
        } else {
            Self::Literal(pattern.to_owned())
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == name,
            Self::Glob(glob) => glob.matches(name),
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: TopicFilter,
    handler: EventHandler,
}

struct BusState {
    subscriptions: Vec<Subscription>,
    history: VecDeque<Event>,
}

/// Process-wide pub/sub bus shared by the executor, plugins, and controller.
pub struct EventBus {
    state: Mutex<BusState>,
    next_id: AtomicU64,
    max_history: usize,
}

impl EventBus {
    /// Default bounded-history length.
    pub const DEFAULT_MAX_HISTORY: usize = 1000;

    /// Create a bus with the default history bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(Self::DEFAULT_MAX_HISTORY)
    }

    /// Create a bus with a custom history bound.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            state: Mutex::new(BusState {
                subscriptions: Vec::new(),
                history: VecDeque::with_capacity(max_history.min(64)),
            }),
            next_id: AtomicU64::new(1),
            max_history,
        }
    }

    /// Subscribe a handler to a topic pattern.
    ///
    /// Patterns may be literal (`task.started`), segment-globbed
    /// (`task.*`), or the global wildcard (`*`).
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().expect("event bus lock poisoned");
        state.subscriptions.push(Subscription {
            id,
            filter: TopicFilter::parse(pattern),
            handler: Arc::new(handler),
        });
        id
    }

    /// Remove a subscription, fully detaching its handler.
    ///
    /// Returns `true` if the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().expect("event bus lock poisoned");
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.id != id);
        state.subscriptions.len() != before
    }

    /// Emit an event, invoking all matching handlers synchronously in
    /// subscription order.
    ///
    /// Handler errors are logged at `warn` and do not stop dispatch.
    pub fn emit(&self, name: &str, data: Value) {
        let event = Event {
            name: name.to_owned(),
            data,
            timestamp: Utc::now(),
        };

        // Snapshot matching handlers so user code runs outside the lock.
        let handlers: Vec<EventHandler> = {
            let mut state = self.state.lock().expect("event bus lock poisoned");
            if state.history.len() == self.max_history {
                state.history.pop_front();
            }
            state.history.push_back(event.clone());
            state
                .subscriptions
                .iter()
                .filter(|s| s.filter.matches(name))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        for handler in handlers {
            if let Err(err) = handler(&event) {
                warn!(topic = name, error = %err, "event handler failed");
            }
        }
    }

    /// Return the most recent events, oldest first.
    ///
    /// `filter` restricts to a topic pattern; `limit` caps the count.
    #[must_use]
    pub fn history(&self, filter: Option<&str>, limit: Option<usize>) -> Vec<Event> {
        let state = self.state.lock().expect("event bus lock poisoned");
        let matcher = filter.map(TopicFilter::parse);
        let matched: Vec<Event> = state
            .history
            .iter()
            .filter(|e| matcher.as_ref().is_none_or(|m| m.matches(&e.name)))
            .cloned()
            .collect();
        let limit = limit.unwrap_or(matched.len());
        let skip = matched.len().saturating_sub(limit);
        matched.into_iter().skip(skip).collect()
    }

    /// Count subscriptions; with `name`, count only those matching it.
    #[must_use]
    pub fn subscriber_count(&self, name: Option<&str>) -> usize {
        let state = self.state.lock().expect("event bus lock poisoned");
        match name {
            Some(topic) => state
                .subscriptions
                .iter()
                .filter(|s| s.filter.matches(topic))
                .count(),
            None => state.subscriptions.len(),
        }
    }

    /// Drop every subscription and the full history.
    pub fn clear_all(&self) {
        let mut state = self.state.lock().expect("event bus lock poisoned");
        state.subscriptions.clear();
        state.history.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("event bus lock poisoned");
        f.debug_struct("EventBus")
            .field("subscriptions", &state.subscriptions.len())
            .field("history_len", &state.history.len())
            .field("max_history", &self.max_history)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_literal_subscription() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.subscribe(TASK_STARTED, move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(TASK_STARTED, json!({}));
        bus.emit(TASK_COMPLETED, json!({}));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_segment_subscription() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.subscribe("task.*", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(TASK_STARTED, json!({}));
        bus.emit(TASK_FAILED, json!({}));
        bus.emit(SESSION_STARTED, json!({}));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_global_wildcard_sees_everything() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.subscribe("*", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(TASK_STARTED, json!({}));
        bus.emit(SESSION_ENDED, json!({}));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        bus.subscribe("*", |_| Err(crate::Error::internal("handler boom")));
        bus.subscribe("*", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.emit(TASK_STARTED, json!({}));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handlers_run_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order1 = Arc::clone(&order);
        let order2 = Arc::clone(&order);
        bus.subscribe("*", move |_| {
            order1.lock().expect("lock poisoned").push("first");
            Ok(())
        });
        bus.subscribe("*", move |_| {
            order2.lock().expect("lock poisoned").push("second");
            Ok(())
        });

        bus.emit(TASK_STARTED, json!({}));
        assert_eq!(
            *order.lock().expect("lock poisoned"),
            vec!["first", "second"]
        );
    }

    #[test]
    fn test_unsubscribe_detaches_handler() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let id = bus.subscribe("*", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));

        bus.emit(TASK_STARTED, json!({}));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(bus.subscriber_count(None), 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::with_max_history(3);
        for i in 0..5 {
            bus.emit("tick", json!({ "i": i }));
        }
        let history = bus.history(None, None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].data["i"], 2);
        assert_eq!(history[2].data["i"], 4);
    }

    #[test]
    fn test_history_filter_and_limit() {
        let bus = EventBus::new();
        bus.emit(TASK_STARTED, json!({"n": 1}));
        bus.emit(SESSION_STARTED, json!({}));
        bus.emit(TASK_COMPLETED, json!({"n": 2}));

        let tasks = bus.history(Some("task.*"), None);
        assert_eq!(tasks.len(), 2);

        let last = bus.history(Some("task.*"), Some(1));
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].name, TASK_COMPLETED);
    }

    #[test]
    fn test_subscriber_count_by_topic() {
        let bus = EventBus::new();
        bus.subscribe("task.*", |_| Ok(()));
        bus.subscribe(TASK_STARTED, |_| Ok(()));
        bus.subscribe(SESSION_STARTED, |_| Ok(()));

        assert_eq!(bus.subscriber_count(Some(TASK_STARTED)), 2);
        assert_eq!(bus.subscriber_count(None), 3);

        bus.clear_all();
        assert_eq!(bus.subscriber_count(None), 0);
    }
}
