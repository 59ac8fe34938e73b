use std::sync::Arc;

use chrono::Utc;

use crate::error::ApiError;
use crate::metrics::{ANSWERS_SUBMITTED_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL};
use crate::models::{GameSession, HistoryEntry, SessionOwner};
use crate::services::generator::RiddleSource;
use crate::services::session_store::{SessionLocks, SessionStore};

/// The game state machine. Sessions move NotStarted -> Active -> Ended;
/// nothing leads out of Ended, a fresh start always creates a brand-new
/// session. All mutating transitions run under the per-session lock.
#[derive(Clone)]
pub struct GameService {
    store: Arc<dyn SessionStore>,
    riddles: Arc<dyn RiddleSource>,
    locks: SessionLocks,
}

#[derive(Debug)]
pub struct StartOutcome {
    pub session_id: String,
    pub question: String,
}

#[derive(Debug)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub correct_answer: String,
    pub next_question: String,
    pub score: u32,
    pub total_answered: u32,
    pub correct_answers: u32,
}

#[derive(Debug)]
pub struct EndOutcome {
    pub final_score: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub success_rate: f64,
    /// True only on the Active -> Ended transition, so callers can
    /// aggregate stats exactly once.
    pub just_ended: bool,
}

impl GameService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        riddles: Arc<dyn RiddleSource>,
        locks: SessionLocks,
    ) -> Self {
        Self {
            store,
            riddles,
            locks,
        }
    }

    /// Start a new game: fetch the first riddle, then create the session.
    /// A generator failure means no session is created at all.
    pub async fn start(&self, owner: SessionOwner) -> Result<StartOutcome, ApiError> {
        let riddle = self.riddles.generate().await?;

        let session = GameSession::started(owner, riddle);
        let question = session.history[0].question.clone();
        self.store.create(&session).await?;

        SESSIONS_TOTAL.with_label_values(&["started"]).inc();
        SESSIONS_ACTIVE.inc();
        tracing::info!("Session started: {}", session.session_id);

        Ok(StartOutcome {
            session_id: session.session_id,
            question,
        })
    }

    /// One turn: score the submitted answer against the current riddle
    /// and issue the next one. The turn is atomic — the next riddle is
    /// fetched before any mutation, and the scoring update plus the new
    /// history entry commit in a single store write, or not at all.
    pub async fn answer(
        &self,
        session_id: &str,
        owner: &SessionOwner,
        submitted: &str,
    ) -> Result<AnswerOutcome, ApiError> {
        let _guard = self.locks.acquire(session_id).await;

        let mut session = self.fetch_owned(session_id, owner).await?;
        if !session.active {
            return Err(ApiError::SessionInactive);
        }
        let current = session
            .current_riddle
            .clone()
            .ok_or(ApiError::SessionInactive)?;

        let correct = normalize_answer(submitted) == normalize_answer(&current.answer);

        // Fetch the replacement riddle before touching session state so a
        // generator failure leaves the session exactly as it was.
        let next = self.riddles.generate().await?;

        if let Some(entry) = session.history.last_mut() {
            entry.user_answer = Some(submitted.to_string());
            entry.is_correct = Some(correct);
        }
        session.total_answered += 1;
        if correct {
            session.score += 1;
            session.correct_answers += 1;
        }
        session.history.push(HistoryEntry::pending(&next));
        session.current_riddle = Some(next);
        session.updated_at = Utc::now();

        if !self.store.update(&session).await? {
            return Err(ApiError::SessionNotFound);
        }

        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&[if correct { "true" } else { "false" }])
            .inc();
        tracing::info!(
            "Answer processed: session={}, correct={}, score={}",
            session_id,
            correct,
            session.score
        );

        Ok(AnswerOutcome {
            correct,
            correct_answer: current.answer,
            next_question: session.history[session.history.len() - 1].question.clone(),
            score: session.score,
            total_answered: session.total_answered,
            correct_answers: session.correct_answers,
        })
    }

    /// Current session snapshot, for score and history views.
    pub async fn snapshot(
        &self,
        session_id: &str,
        owner: &SessionOwner,
    ) -> Result<GameSession, ApiError> {
        self.fetch_owned(session_id, owner).await
    }

    /// End the game. Idempotent: ending an already-ended session is a
    /// no-op success returning the same final snapshot.
    pub async fn end(&self, session_id: &str, owner: &SessionOwner) -> Result<EndOutcome, ApiError> {
        let _guard = self.locks.acquire(session_id).await;

        let mut session = self.fetch_owned(session_id, owner).await?;

        let just_ended = session.active;
        if just_ended {
            session.active = false;
            // An ended session holds no pending riddle; the last history
            // entry keeps the question for the record.
            session.current_riddle = None;
            session.ended_at = Some(Utc::now());
            session.updated_at = Utc::now();

            if !self.store.update(&session).await? {
                return Err(ApiError::SessionNotFound);
            }

            SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
            SESSIONS_ACTIVE.dec();
            tracing::info!(
                "Session ended: {} (score {}/{})",
                session_id,
                session.score,
                session.total_answered
            );
        }

        Ok(EndOutcome {
            final_score: session.score,
            total_questions: session.total_answered,
            correct_answers: session.correct_answers,
            success_rate: success_rate(
                u64::from(session.correct_answers),
                u64::from(session.total_answered),
            ),
            just_ended,
        })
    }

    /// Remove the session entirely, whatever its state. No error if it
    /// did not exist.
    pub async fn reset(&self, session_id: &str, owner: &SessionOwner) -> Result<(), ApiError> {
        let _guard = self.locks.acquire(session_id).await;

        if let Some(session) = self.store.get(session_id).await? {
            if session.owner != *owner {
                return Err(ApiError::SessionNotFound);
            }
            self.store.delete(session_id).await?;
            SESSIONS_TOTAL.with_label_values(&["reset"]).inc();
            if session.active {
                SESSIONS_ACTIVE.dec();
            }
            tracing::info!("Session reset: {}", session_id);
        }

        Ok(())
    }

    async fn fetch_owned(
        &self,
        session_id: &str,
        owner: &SessionOwner,
    ) -> Result<GameSession, ApiError> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(ApiError::SessionNotFound)?;

        // An owned session is only visible to its owner.
        if session.owner != *owner {
            return Err(ApiError::SessionNotFound);
        }

        Ok(session)
    }
}

/// Success rate as a percentage rounded to two decimals; 0.0 before any
/// answer. Always recomputed from the counters, never stored.
pub fn success_rate(correct: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((correct as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
}

/// Both sides of the comparison are trimmed and lowercased; equality is
/// exact after that — no fuzzy matching, no partial credit.
pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Riddle;
    use crate::services::session_store::MemorySessionStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Scripted riddle source: hands out queued riddles first, then
    /// generated placeholders; can be told to fail the next call.
    struct StubSource {
        queue: Mutex<VecDeque<Riddle>>,
        fail_next: AtomicBool,
        counter: AtomicU32,
    }

    impl StubSource {
        fn new(riddles: Vec<Riddle>) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(riddles.into()),
                fail_next: AtomicBool::new(false),
                counter: AtomicU32::new(0),
            })
        }

        fn fail_next_call(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RiddleSource for StubSource {
        async fn generate(&self) -> Result<Riddle, ApiError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(ApiError::UpstreamTimeout);
            }
            if let Some(riddle) = self.queue.lock().await.pop_front() {
                return Ok(riddle);
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(Riddle {
                question: format!("generated question {}", n),
                answer: format!("answer{}", n),
            })
        }
    }

    fn keyboard_riddle() -> Riddle {
        Riddle {
            question: "I have keys but no locks, space but no room. What am I?".to_string(),
            answer: "keyboard".to_string(),
        }
    }

    fn service_with(source: Arc<StubSource>) -> (GameService, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::new());
        let service = GameService::new(store.clone(), source, SessionLocks::default());
        (service, store)
    }

    #[tokio::test]
    async fn start_creates_active_session_with_seeded_history() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source);

        let outcome = service.start(SessionOwner::Anonymous).await.unwrap();
        assert_eq!(outcome.question, keyboard_riddle().question);

        let session = store.get(&outcome.session_id).await.unwrap().unwrap();
        assert!(session.active);
        assert_eq!(session.score, 0);
        assert_eq!(session.history.len(), 1);
        assert!(session.history[0].is_correct.is_none());
    }

    #[tokio::test]
    async fn start_fails_without_creating_session_when_generator_fails() {
        let source = StubSource::new(vec![]);
        source.fail_next_call();
        let (service, store) = service_with(source);

        let err = service.start(SessionOwner::Anonymous).await.unwrap_err();
        assert!(matches!(err, ApiError::UpstreamTimeout));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn correct_answer_is_case_and_whitespace_insensitive() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source);

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        let outcome = service
            .answer(&started.session_id, &SessionOwner::Anonymous, " Keyboard ")
            .await
            .unwrap();

        assert!(outcome.correct);
        assert_eq!(outcome.score, 1);
        assert_eq!(outcome.correct_answers, 1);
        assert_eq!(outcome.total_answered, 1);

        let session = store.get(&started.session_id).await.unwrap().unwrap();
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].is_correct, Some(true));
        assert!(session.history[1].is_correct.is_none());
    }

    #[tokio::test]
    async fn wrong_answer_continues_play() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source);

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        let outcome = service
            .answer(&started.session_id, &SessionOwner::Anonymous, "mouse")
            .await
            .unwrap();

        assert!(!outcome.correct);
        assert_eq!(outcome.score, 0);
        assert_eq!(outcome.total_answered, 1);
        assert_eq!(outcome.correct_answer, "keyboard");
        assert!(!outcome.next_question.is_empty());

        // The game does not end on a wrong answer.
        let session = store.get(&started.session_id).await.unwrap().unwrap();
        assert!(session.active);
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].is_correct, Some(false));
    }

    #[tokio::test]
    async fn answer_without_session_is_not_found() {
        let source = StubSource::new(vec![]);
        let (service, store) = service_with(source);

        let err = service
            .answer("no-such-session", &SessionOwner::Anonymous, "keyboard")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SessionNotFound));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn answer_after_end_is_rejected() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, _) = service_with(source);

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        service
            .end(&started.session_id, &SessionOwner::Anonymous)
            .await
            .unwrap();

        let err = service
            .answer(&started.session_id, &SessionOwner::Anonymous, "keyboard")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SessionInactive));
    }

    #[tokio::test]
    async fn generator_failure_mid_turn_rolls_back_everything() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source.clone());

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        source.fail_next_call();

        let err = service
            .answer(&started.session_id, &SessionOwner::Anonymous, "keyboard")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::UpstreamTimeout));

        // The whole turn aborted: no scoring, no history mutation.
        let session = store.get(&started.session_id).await.unwrap().unwrap();
        assert_eq!(session.total_answered, 0);
        assert_eq!(session.score, 0);
        assert_eq!(session.history.len(), 1);
        assert!(session.history[0].user_answer.is_none());
        assert!(session.history[0].is_correct.is_none());
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source);

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        service
            .answer(&started.session_id, &SessionOwner::Anonymous, "keyboard")
            .await
            .unwrap();

        let first = service
            .end(&started.session_id, &SessionOwner::Anonymous)
            .await
            .unwrap();
        assert!(first.just_ended);
        assert_eq!(first.final_score, 1);

        // Ending discards the pending riddle but keeps its history row.
        let session = store.get(&started.session_id).await.unwrap().unwrap();
        assert!(!session.active);
        assert!(session.current_riddle.is_none());
        assert_eq!(session.history.len(), 2);

        let second = service
            .end(&started.session_id, &SessionOwner::Anonymous)
            .await
            .unwrap();
        assert!(!second.just_ended);
        assert_eq!(second.final_score, 1);
        assert_eq!(second.total_questions, 1);
        assert_eq!(second.success_rate, 100.0);
    }

    #[tokio::test]
    async fn reset_removes_session_and_tolerates_unknown_ids() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source);

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        service
            .reset(&started.session_id, &SessionOwner::Anonymous)
            .await
            .unwrap();
        assert!(store.get(&started.session_id).await.unwrap().is_none());

        // Resetting again (or a session that never existed) is fine.
        service
            .reset(&started.session_id, &SessionOwner::Anonymous)
            .await
            .unwrap();
        service
            .reset("never-existed", &SessionOwner::Anonymous)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn counters_keep_invariant_over_mixed_answers() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source);

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        let answers = ["keyboard", "wrong", "also wrong", "answer2"];
        for submitted in answers {
            let outcome = service
                .answer(&started.session_id, &SessionOwner::Anonymous, submitted)
                .await
                .unwrap();
            assert!(outcome.correct_answers <= outcome.total_answered);
        }

        let session = store.get(&started.session_id).await.unwrap().unwrap();
        assert_eq!(session.total_answered, 4);
        assert!(session.correct_answers <= session.total_answered);
        // History covers every riddle ever issued, including the pending one.
        assert_eq!(session.history.len(), 5);
    }

    #[tokio::test]
    async fn concurrent_answers_serialize_per_session() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, store) = service_with(source);

        let started = service.start(SessionOwner::Anonymous).await.unwrap();
        let id = started.session_id.clone();

        let a = service.answer(&id, &SessionOwner::Anonymous, "keyboard");
        let b = service.answer(&id, &SessionOwner::Anonymous, "keyboard");
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        let session = store.get(&id).await.unwrap().unwrap();
        // Exactly one turn won against the first riddle; the other
        // scored against its replacement. No duplicate or skipped rows.
        assert_eq!(session.total_answered, 2);
        assert_eq!(session.history.len(), 3);
        assert!(session.history[0].is_correct.is_some());
        assert!(session.history[1].is_correct.is_some());
        assert!(session.history[2].is_correct.is_none());
        // Only the first answer could match "keyboard".
        assert_eq!(session.correct_answers, 1);
    }

    #[tokio::test]
    async fn session_is_invisible_to_other_owners() {
        let source = StubSource::new(vec![keyboard_riddle()]);
        let (service, _) = service_with(source);

        let owner = SessionOwner::User("user-a".to_string());
        let started = service.start(owner.clone()).await.unwrap();

        let err = service
            .snapshot(&started.session_id, &SessionOwner::User("user-b".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SessionNotFound));

        let err = service
            .snapshot(&started.session_id, &SessionOwner::Anonymous)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SessionNotFound));

        assert!(service.snapshot(&started.session_id, &owner).await.is_ok());
    }

    #[test]
    fn success_rate_rounds_to_two_decimals() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(1, 1), 100.0);
        assert_eq!(success_rate(1, 3), 33.33);
        assert_eq!(success_rate(2, 3), 66.67);
        assert_eq!(success_rate(1, 2), 50.0);
    }

    #[test]
    fn normalize_answer_trims_and_lowercases() {
        assert_eq!(normalize_answer(" Keyboard "), "keyboard");
        assert_eq!(normalize_answer("STACK overflow"), "stack overflow");
        assert_eq!(normalize_answer("recursion"), "recursion");
    }
}
