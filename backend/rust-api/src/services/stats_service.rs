use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};

use crate::error::ApiError;
use crate::models::stats::{GameSummary, UserStats, UserStatsResponse};
use crate::services::game_service::success_rate;
use crate::services::session_store::{SessionDocument, SESSIONS_COLLECTION};
use crate::utils::time::chrono_to_bson;

const STATS_COLLECTION: &str = "user_stats";

/// Lifetime aggregates for registered users, maintained as a single
/// upserted row per user. Counters only ever grow; rates are derived on
/// read.
#[derive(Clone)]
pub struct StatsService {
    mongo: Database,
}

impl StatsService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn stats(&self) -> Collection<UserStats> {
        self.mongo.collection(STATS_COLLECTION)
    }

    fn sessions(&self) -> Collection<SessionDocument> {
        self.mongo.collection(SESSIONS_COLLECTION)
    }

    /// Make sure the user's stats row exists, zeroed. Called at
    /// registration and defensively before reads.
    pub async fn ensure_row(&self, user_id: &str) -> Result<(), ApiError> {
        let zeroed = UserStats::zeroed(user_id);
        self.stats()
            .update_one(
                doc! { "user_id": user_id },
                doc! {
                    "$setOnInsert": {
                        "user_id": &zeroed.user_id,
                        "total_games_played": zeroed.total_games_played,
                        "total_questions_answered": zeroed.total_questions_answered,
                        "total_correct_answers": zeroed.total_correct_answers,
                        "highest_score": zeroed.highest_score,
                        "updatedAt": chrono_to_bson(zeroed.updated_at),
                    }
                },
            )
            .upsert(true)
            .await
            .context("Failed to ensure user stats row")
            .map_err(ApiError::Internal)?;
        Ok(())
    }

    /// Fold one completed game into the aggregate. Only called on the
    /// Active -> Ended transition, so a game is never counted twice.
    pub async fn record_game_end(
        &self,
        user_id: &str,
        score: u32,
        total_answered: u32,
        correct_answers: u32,
    ) -> Result<(), ApiError> {
        self.stats()
            .update_one(
                doc! { "user_id": user_id },
                doc! {
                    "$inc": {
                        "total_games_played": 1_i64,
                        "total_questions_answered": i64::from(total_answered),
                        "total_correct_answers": i64::from(correct_answers),
                    },
                    "$max": { "highest_score": i64::from(score) },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                    "$setOnInsert": { "user_id": user_id },
                },
            )
            .upsert(true)
            .await
            .context("Failed to record game end in user stats")
            .map_err(ApiError::Internal)?;

        tracing::info!(
            "Stats updated for user {}: +1 game, +{} questions, +{} correct",
            user_id,
            total_answered,
            correct_answers
        );
        Ok(())
    }

    pub async fn get_stats(&self, user_id: &str) -> Result<UserStatsResponse, ApiError> {
        self.ensure_row(user_id).await?;

        let stats = self
            .stats()
            .find_one(doc! { "user_id": user_id })
            .await
            .context("Failed to load user stats")
            .map_err(ApiError::Internal)?
            .unwrap_or_else(|| UserStats::zeroed(user_id));

        Ok(UserStatsResponse {
            total_games_played: stats.total_games_played,
            total_questions_answered: stats.total_questions_answered,
            total_correct_answers: stats.total_correct_answers,
            highest_score: stats.highest_score,
            overall_success_rate: success_rate(
                stats.total_correct_answers.max(0) as u64,
                stats.total_questions_answered.max(0) as u64,
            ),
        })
    }

    /// Completed games for the user, most recently ended first.
    pub async fn list_completed_games(&self, user_id: &str) -> Result<Vec<GameSummary>, ApiError> {
        let cursor = self
            .sessions()
            .find(doc! { "user_id": user_id, "active": false })
            .sort(doc! { "endedAt": -1 })
            .await
            .context("Failed to query completed games")
            .map_err(ApiError::Internal)?;

        let documents: Vec<SessionDocument> = cursor
            .try_collect()
            .await
            .context("Failed to read completed games cursor")
            .map_err(ApiError::Internal)?;

        Ok(documents
            .into_iter()
            .map(|document| {
                let total = document.total_answered.max(0) as u32;
                let correct = document.correct_answers.max(0) as u32;
                GameSummary {
                    session_id: document.session_id,
                    score: document.score.max(0) as u32,
                    total_questions: total,
                    correct_answers: correct,
                    success_rate: success_rate(u64::from(correct), u64::from(total)),
                    ended_at: document.ended_at,
                }
            })
            .collect())
    }
}
