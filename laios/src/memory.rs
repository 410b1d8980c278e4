//! Memory collaborator interface and the default in-memory store.
//!
//! The runtime treats memory as best-effort: episode storage failures are
//! logged and execution continues; recall failures fall back to empty
//! results. Real deployments substitute a vector store behind the same
//! [`Memory`] trait.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Episode;

/// A long-term memory entry returned by recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier.
    pub id: String,
    /// Stored text.
    pub text: String,
    /// Caller-supplied metadata.
    pub metadata: Value,
    /// Storage timestamp.
    pub created_at: DateTime<Utc>,
}

/// Storage backend for episodes and long-term facts.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Store a long-term fact. Returns its id.
    ///
    /// # Errors
    ///
    /// Backend-specific storage failures.
    async fn store_long_term(&self, text: &str, metadata: Option<Value>) -> Result<String>;

    /// Recall the `k` entries most relevant to `query`.
    ///
    /// # Errors
    ///
    /// Backend-specific retrieval failures.
    async fn recall_long_term(&self, query: &str, k: usize) -> Result<Vec<MemoryEntry>>;

    /// Store an episode. Returns its id.
    ///
    /// # Errors
    ///
    /// Backend-specific storage failures.
    async fn store_episode(&self, episode: Episode) -> Result<String>;

    /// Fetch an episode by id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when no episode has this id.
    async fn get_episode(&self, id: &str) -> Result<Episode>;
}

/// Default process-local store backed by hash maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<Vec<MemoryEntry>>,
    episodes: Mutex<HashMap<String, Episode>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored episodes.
    #[must_use]
    pub fn episode_count(&self) -> usize {
        self.episodes.lock().expect("memory lock poisoned").len()
    }
}

#[async_trait]
impl Memory for InMemoryStore {
    async fn store_long_term(&self, text: &str, metadata: Option<Value>) -> Result<String> {
        let entry = MemoryEntry {
            id: Uuid::new_v4().to_string(),
            text: text.to_owned(),
            metadata: metadata.unwrap_or(Value::Null),
            created_at: Utc::now(),
        };
        let id = entry.id.clone();
        self.entries.lock().expect("memory lock poisoned").push(entry);
        Ok(id)
    }

    async fn recall_long_term(&self, query: &str, k: usize) -> Result<Vec<MemoryEntry>> {
        // Token-overlap scoring stands in for vector similarity.
        let query_tokens: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_owned)
            .collect();

        let entries = self.entries.lock().expect("memory lock poisoned");
        let mut scored: Vec<(usize, &MemoryEntry)> = entries
            .iter()
            .map(|entry| {
                let lowered = entry.text.to_lowercase();
                let score = query_tokens
                    .iter()
                    .filter(|token| lowered.contains(token.as_str()))
                    .count();
                (score, entry)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, e)| e.clone()).collect())
    }

    async fn store_episode(&self, episode: Episode) -> Result<String> {
        let id = episode.id.clone();
        self.episodes
            .lock()
            .expect("memory lock poisoned")
            .insert(id.clone(), episode);
        Ok(id)
    }

    async fn get_episode(&self, id: &str) -> Result<Episode> {
        self.episodes
            .lock()
            .expect("memory lock poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: "episode",
                name: id.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Goal, Plan, TaskResult};

    #[tokio::test]
    async fn test_episode_store_get_round_trip() {
        let store = InMemoryStore::new();
        let plan = Plan::new(Goal::new("remember me"));
        let episode = Episode::new("session", plan, vec![TaskResult::ok("t", None, 0.1)]);
        let original_id = episode.id.clone();

        let stored_id = store.store_episode(episode).await.expect("store");
        assert_eq!(stored_id, original_id);

        let fetched = store.get_episode(&stored_id).await.expect("get");
        assert_eq!(fetched.id, original_id);
        assert_eq!(fetched.session_id, "session");
        assert_eq!(fetched.results.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_episode_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get_episode("nope").await.expect_err("missing");
        assert!(matches!(err, Error::NotFound { kind: "episode", .. }));
    }

    #[tokio::test]
    async fn test_recall_ranks_by_overlap() {
        let store = InMemoryStore::new();
        store
            .store_long_term("the user prefers rust for systems work", None)
            .await
            .expect("store");
        store
            .store_long_term("the weather was cloudy", None)
            .await
            .expect("store");
        store
            .store_long_term("rust systems programming notes", None)
            .await
            .expect("store");

        let recalled = store
            .recall_long_term("rust systems", 2)
            .await
            .expect("recall");
        assert_eq!(recalled.len(), 2);
        assert!(recalled.iter().all(|e| e.text.contains("rust")));

        let nothing = store.recall_long_term("quantum", 5).await.expect("recall");
        assert!(nothing.is_empty());
    }
}
