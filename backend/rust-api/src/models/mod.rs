use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

pub mod stats;
pub mod user;

/// A question/answer pair sourced from the external generator.
/// Immutable once generated; the answer is the ground truth (1-3 words).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Riddle {
    pub question: String,
    pub answer: String,
}

/// One row of a session's question history. `user_answer` and
/// `is_correct` stay unset until the riddle is answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub question: String,
    pub user_answer: Option<String>,
    pub correct_answer: String,
    pub is_correct: Option<bool>,
    pub asked_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn pending(riddle: &Riddle) -> Self {
        Self {
            question: riddle.question.clone(),
            user_answer: None,
            correct_answer: riddle.answer.clone(),
            is_correct: None,
            asked_at: Utc::now(),
        }
    }
}

/// Who a session belongs to. Anonymous sessions live only in process
/// memory; user-owned sessions are persisted and outlive the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "user_id")]
pub enum SessionOwner {
    Anonymous,
    User(String),
}

/// One player's continuous play-through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSession {
    pub session_id: String,
    pub owner: SessionOwner,
    pub score: u32,
    pub total_answered: u32,
    pub correct_answers: u32,
    pub active: bool,
    pub current_riddle: Option<Riddle>,
    pub history: Vec<HistoryEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl GameSession {
    /// A fresh active session seeded with its first riddle. The riddle
    /// must already have been fetched; a session never exists without
    /// a history entry for every riddle issued to it.
    pub fn started(owner: SessionOwner, first_riddle: Riddle) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            owner,
            score: 0,
            total_answered: 0,
            correct_answers: 0,
            active: true,
            history: vec![HistoryEntry::pending(&first_riddle)],
            current_riddle: Some(first_riddle),
            started_at: now,
            updated_at: now,
            ended_at: None,
        }
    }
}

// ---- Game endpoint DTOs ----

#[derive(Debug, Deserialize, Validate)]
pub struct AnswerRequest {
    #[validate(length(min = 1, max = 200, message = "Answer must be between 1 and 200 characters"))]
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub question: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub correct: bool,
    pub question: String,
    pub score: u32,
    pub total_answered: u32,
    pub correct_answers: u32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub score: u32,
    pub total_answered: u32,
    pub correct_answers: u32,
    pub success_rate: f64,
    pub active: bool,
    pub current_question: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub total_questions: usize,
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
pub struct EndResponse {
    pub final_score: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub success_rate: f64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riddle() -> Riddle {
        Riddle {
            question: "I have keys but no locks. What am I?".to_string(),
            answer: "keyboard".to_string(),
        }
    }

    #[test]
    fn started_session_seeds_history_with_pending_entry() {
        let session = GameSession::started(SessionOwner::Anonymous, riddle());
        assert!(session.active);
        assert_eq!(session.score, 0);
        assert_eq!(session.history.len(), 1);
        let entry = &session.history[0];
        assert_eq!(entry.question, riddle().question);
        assert_eq!(entry.correct_answer, "keyboard");
        assert!(entry.user_answer.is_none());
        assert!(entry.is_correct.is_none());
    }

    #[test]
    fn session_ids_are_unique() {
        let a = GameSession::started(SessionOwner::Anonymous, riddle());
        let b = GameSession::started(SessionOwner::Anonymous, riddle());
        assert_ne!(a.session_id, b.session_id);
    }
}
