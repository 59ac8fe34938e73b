use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use serde::{Deserialize, Serialize};
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::ApiError;
use crate::models::user::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};
use crate::models::{GameSession, HistoryEntry, Riddle, SessionOwner};

pub const SESSIONS_COLLECTION: &str = "game_sessions";

/// Storage contract shared by the anonymous (in-memory) and persisted
/// (MongoDB) session variants. Callers commit whole sessions: a turn is
/// prepared on a copy and written back in one `update`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a fully-formed session (its first riddle already fetched).
    async fn create(&self, session: &GameSession) -> Result<(), ApiError>;

    async fn get(&self, session_id: &str) -> Result<Option<GameSession>, ApiError>;

    /// Whole-session replace. Returns `false` when the id is unknown;
    /// callers surface that as session-not-found, never as a crash.
    async fn update(&self, session: &GameSession) -> Result<bool, ApiError>;

    /// No error if the session does not exist.
    async fn delete(&self, session_id: &str) -> Result<(), ApiError>;
}

type LockMap = HashMap<String, Arc<Mutex<()>>>;

/// Per-session-id lock registry. Every mutating transition runs under
/// the session's lock so concurrent double-submits serialize instead of
/// both scoring against the same riddle. Entries are reference-counted:
/// the guard removes its entry on drop once no other task is waiting,
/// so the registry never accumulates stale ids.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<StdMutex<LockMap>>,
}

pub struct SessionGuard {
    _permit: OwnedMutexGuard<()>,
    registry: Arc<StdMutex<LockMap>>,
    session_id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut map = match self.registry.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = map.get(&self.session_id) {
            // One clone in the map, one held through this guard; anything
            // more means another task is queued on the same session.
            if Arc::strong_count(entry) == 2 {
                map.remove(&self.session_id);
            }
        }
    }
}

impl SessionLocks {
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut map = match self.locks.lock() {
                Ok(map) => map,
                Err(poisoned) => poisoned.into_inner(),
            };
            map.entry(session_id.to_string()).or_default().clone()
        };

        SessionGuard {
            _permit: lock.lock_owned().await,
            registry: self.locks.clone(),
            session_id: session_id.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Volatile store for anonymous play. Sessions vanish on process restart
/// or explicit deletion; idle ones are swept by the TTL eviction task.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, GameSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Removes sessions idle longer than `ttl` and returns their ids so
    /// the caller can drop the matching lock entries.
    pub async fn evict_expired(&self, ttl: std::time::Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, session)| session.updated_at < cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(session) = sessions.remove(id) {
                // Evicting an active session takes it out of play, same
                // as end/reset would.
                if session.active {
                    crate::metrics::SESSIONS_ACTIVE.dec();
                }
                crate::metrics::ANONYMOUS_SESSIONS_EVICTED_TOTAL
                    .with_label_values(&["idle"])
                    .inc();
            }
        }

        expired
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &GameSession) -> Result<(), ApiError> {
        self.sessions
            .write()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<GameSession>, ApiError> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn update(&self, session: &GameSession) -> Result<bool, ApiError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.session_id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), ApiError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// Session row persisted in the "game_sessions" collection. History is
/// embedded so a whole turn commits with one document write; the current
/// riddle is an opaque JSON blob (write-once-read-once per turn).
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "_id")]
    pub session_id: String,
    pub user_id: Option<String>,
    pub score: i64,
    pub total_answered: i64,
    pub correct_answers: i64,
    pub active: bool,
    pub current_riddle: Option<String>,
    pub history: Vec<HistoryEntryDocument>,
    #[serde(rename = "startedAt", with = "bson_datetime_as_chrono")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        rename = "endedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntryDocument {
    pub question: String,
    pub user_answer: Option<String>,
    pub correct_answer: String,
    pub is_correct: Option<bool>,
    #[serde(rename = "askedAt", with = "bson_datetime_as_chrono")]
    pub asked_at: DateTime<Utc>,
}

impl SessionDocument {
    pub fn from_session(session: &GameSession) -> Result<Self, ApiError> {
        let current_riddle = match &session.current_riddle {
            Some(riddle) => Some(
                serde_json::to_string(riddle)
                    .context("Failed to serialize current riddle")
                    .map_err(ApiError::Internal)?,
            ),
            None => None,
        };

        let user_id = match &session.owner {
            SessionOwner::User(id) => Some(id.clone()),
            SessionOwner::Anonymous => None,
        };

        Ok(Self {
            session_id: session.session_id.clone(),
            user_id,
            score: i64::from(session.score),
            total_answered: i64::from(session.total_answered),
            correct_answers: i64::from(session.correct_answers),
            active: session.active,
            current_riddle,
            history: session
                .history
                .iter()
                .map(|entry| HistoryEntryDocument {
                    question: entry.question.clone(),
                    user_answer: entry.user_answer.clone(),
                    correct_answer: entry.correct_answer.clone(),
                    is_correct: entry.is_correct,
                    asked_at: entry.asked_at,
                })
                .collect(),
            started_at: session.started_at,
            updated_at: session.updated_at,
            ended_at: session.ended_at,
        })
    }

    pub fn into_session(self) -> Result<GameSession, ApiError> {
        let current_riddle = match self.current_riddle {
            Some(blob) => Some(
                serde_json::from_str::<Riddle>(&blob)
                    .context("Failed to deserialize current riddle")
                    .map_err(ApiError::Internal)?,
            ),
            None => None,
        };

        let owner = match self.user_id {
            Some(id) => SessionOwner::User(id),
            None => SessionOwner::Anonymous,
        };

        Ok(GameSession {
            session_id: self.session_id,
            owner,
            score: self.score.max(0) as u32,
            total_answered: self.total_answered.max(0) as u32,
            correct_answers: self.correct_answers.max(0) as u32,
            active: self.active,
            current_riddle,
            history: self
                .history
                .into_iter()
                .map(|entry| HistoryEntry {
                    question: entry.question,
                    user_answer: entry.user_answer,
                    correct_answer: entry.correct_answer,
                    is_correct: entry.is_correct,
                    asked_at: entry.asked_at,
                })
                .collect(),
            started_at: self.started_at,
            updated_at: self.updated_at,
            ended_at: self.ended_at,
        })
    }
}

/// Durable store for user-owned sessions; rows survive restarts and are
/// cascade-deleted with the owning user.
pub struct MongoSessionStore {
    collection: Collection<SessionDocument>,
}

impl MongoSessionStore {
    pub fn new(mongo: Database) -> Self {
        Self {
            collection: mongo.collection(SESSIONS_COLLECTION),
        }
    }
}

#[async_trait]
impl SessionStore for MongoSessionStore {
    async fn create(&self, session: &GameSession) -> Result<(), ApiError> {
        let document = SessionDocument::from_session(session)?;
        self.collection
            .insert_one(&document)
            .await
            .context("Failed to insert game session")
            .map_err(ApiError::Internal)?;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<GameSession>, ApiError> {
        let document = self
            .collection
            .find_one(doc! { "_id": session_id })
            .await
            .context("Failed to query game session")
            .map_err(ApiError::Internal)?;

        document.map(SessionDocument::into_session).transpose()
    }

    async fn update(&self, session: &GameSession) -> Result<bool, ApiError> {
        let document = SessionDocument::from_session(session)?;
        let result = self
            .collection
            .replace_one(doc! { "_id": &session.session_id }, &document)
            .await
            .context("Failed to update game session")
            .map_err(ApiError::Internal)?;

        Ok(result.matched_count > 0)
    }

    async fn delete(&self, session_id: &str) -> Result<(), ApiError> {
        self.collection
            .delete_one(doc! { "_id": session_id })
            .await
            .context("Failed to delete game session")
            .map_err(ApiError::Internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GameSession, Riddle, SessionOwner};

    fn sample_session(owner: SessionOwner) -> GameSession {
        GameSession::started(
            owner,
            Riddle {
                question: "What runs but never walks?".to_string(),
                answer: "a loop".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn memory_store_create_get_roundtrip() {
        let store = MemorySessionStore::new();
        let session = sample_session(SessionOwner::Anonymous);

        store.create(&session).await.unwrap();
        let loaded = store.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert_eq!(loaded.history.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_get_unknown_is_none() {
        let store = MemorySessionStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_update_unknown_signals_not_found() {
        let store = MemorySessionStore::new();
        let session = sample_session(SessionOwner::Anonymous);
        assert!(!store.update(&session).await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_delete_is_silent_for_unknown() {
        let store = MemorySessionStore::new();
        store.delete("missing").await.unwrap();
    }

    #[tokio::test]
    async fn eviction_removes_only_idle_sessions() {
        let store = MemorySessionStore::new();

        let mut stale = sample_session(SessionOwner::Anonymous);
        stale.updated_at = Utc::now() - chrono::Duration::hours(48);
        let fresh = sample_session(SessionOwner::Anonymous);

        store.create(&stale).await.unwrap();
        store.create(&fresh).await.unwrap();

        let removed = store
            .evict_expired(std::time::Duration::from_secs(86400))
            .await;

        assert_eq!(removed, vec![stale.session_id.clone()]);
        assert!(store.get(&stale.session_id).await.unwrap().is_none());
        assert!(store.get(&fresh.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn eviction_releases_active_gauge() {
        let store = MemorySessionStore::new();

        let mut active_stale = sample_session(SessionOwner::Anonymous);
        active_stale.updated_at = Utc::now() - chrono::Duration::hours(48);
        let mut ended_stale = sample_session(SessionOwner::Anonymous);
        ended_stale.active = false;
        ended_stale.current_riddle = None;
        ended_stale.updated_at = Utc::now() - chrono::Duration::hours(48);

        store.create(&active_stale).await.unwrap();
        store.create(&ended_stale).await.unwrap();

        let before = crate::metrics::SESSIONS_ACTIVE.get();
        let removed = store
            .evict_expired(std::time::Duration::from_secs(86400))
            .await;
        let after = crate::metrics::SESSIONS_ACTIVE.get();

        assert_eq!(removed.len(), 2);
        // Only the session that was still in play releases the gauge.
        assert_eq!(after, before - 1);
    }

    #[tokio::test]
    async fn lock_registry_drops_entries_after_use() {
        let locks = SessionLocks::default();
        {
            let _guard = locks.acquire("session-a").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);

        // Locking a session that never existed leaves nothing behind
        // either.
        drop(locks.acquire("never-started").await);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn contended_lock_entry_is_dropped_by_last_holder() {
        let locks = SessionLocks::default();

        let first = locks.acquire("session-a").await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("session-a").await;
            })
        };

        tokio::task::yield_now().await;
        drop(first);
        contender.await.unwrap();

        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn session_document_roundtrip_preserves_state() {
        let mut session = sample_session(SessionOwner::User("64f000000000000000000000".to_string()));
        session.score = 3;
        session.total_answered = 5;
        session.correct_answers = 3;

        let document = SessionDocument::from_session(&session).unwrap();
        assert!(document.current_riddle.is_some());
        assert_eq!(document.user_id.as_deref(), Some("64f000000000000000000000"));

        let restored = document.into_session().unwrap();
        assert_eq!(restored.score, 3);
        assert_eq!(restored.total_answered, 5);
        assert_eq!(restored.current_riddle, session.current_riddle);
        assert_eq!(restored.history.len(), 1);
        assert_eq!(restored.owner, session.owner);
    }

    #[test]
    fn ended_session_document_has_no_riddle_blob() {
        let mut session = sample_session(SessionOwner::Anonymous);
        session.active = false;
        session.current_riddle = None;
        session.ended_at = Some(Utc::now());

        let document = SessionDocument::from_session(&session).unwrap();
        assert!(document.current_riddle.is_none());
        let restored = document.into_session().unwrap();
        assert!(!restored.active);
        assert!(restored.current_riddle.is_none());
    }
}
