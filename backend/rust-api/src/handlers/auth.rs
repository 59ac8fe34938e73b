use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use validator::Validate;

use crate::error::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::user::{LoginRequest, RegisterRequest, UserProfile};
use crate::services::auth_service::AuthService;
use crate::services::AppState;

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.mongo_client.clone(),
        state.mongo.clone(),
        &state.config.jwt_secret,
    )
}

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;

    let response = auth_service(&state).register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;

    let response = auth_service(&state).login(request).await?;
    Ok(Json(response))
}

/// GET /api/v1/auth/me
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth_service(&state).get_user_by_id(&claims.sub).await?;
    Ok(Json(UserProfile::from(user)))
}

/// DELETE /api/v1/auth/me
pub async fn delete_me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    auth_service(&state).delete_account(&claims.sub).await?;
    Ok(StatusCode::NO_CONTENT)
}
