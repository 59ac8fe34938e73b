use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Extension, Json};

use crate::error::ApiError;
use crate::middlewares::auth::JwtClaims;
use crate::services::stats_service::StatsService;
use crate::services::AppState;

/// GET /api/v1/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = StatsService::new(state.mongo.clone())
        .get_stats(&claims.sub)
        .await?;
    Ok(Json(stats))
}

/// GET /api/v1/stats/games
pub async fn list_games(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let games = StatsService::new(state.mongo.clone())
        .list_completed_games(&claims.sub)
        .await?;
    Ok(Json(games))
}
