use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono;

/// Lifetime aggregate stored in MongoDB "user_stats" collection,
/// one row per user, created zeroed at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStats {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub user_id: String,
    #[serde(default)]
    pub total_games_played: i64,
    #[serde(default)]
    pub total_questions_answered: i64,
    #[serde(default)]
    pub total_correct_answers: i64,
    #[serde(default)]
    pub highest_score: i64,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl UserStats {
    pub fn zeroed(user_id: &str) -> Self {
        Self {
            id: None,
            user_id: user_id.to_string(),
            total_games_played: 0,
            total_questions_answered: 0,
            total_correct_answers: 0,
            highest_score: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Aggregate view returned to the client; `overall_success_rate` is
/// always derived from the counters, never stored.
#[derive(Debug, Serialize)]
pub struct UserStatsResponse {
    pub total_games_played: i64,
    pub total_questions_answered: i64,
    pub total_correct_answers: i64,
    pub highest_score: i64,
    pub overall_success_rate: f64,
}

/// A completed game as listed under /api/v1/stats/games.
#[derive(Debug, Serialize)]
pub struct GameSummary {
    pub session_id: String,
    pub score: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub success_rate: f64,
    pub ended_at: Option<DateTime<Utc>>,
}
