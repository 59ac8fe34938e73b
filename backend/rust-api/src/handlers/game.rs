use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use validator::Validate;

use crate::error::ApiError;
use crate::extractors::AppJson;
use crate::middlewares::auth::JwtClaims;
use crate::models::{
    AnswerRequest, AnswerResponse, EndResponse, HistoryResponse, ScoreResponse, SessionOwner,
    StartResponse,
};
use crate::services::game_service::{success_rate, GameService};
use crate::services::session_store::{MongoSessionStore, SessionStore};
use crate::services::stats_service::StatsService;
use crate::services::AppState;

/// Session transport is an HTTP-only cookie, so the browser carries the
/// id between calls without the frontend touching it.
const SESSION_COOKIE: &str = "session_id";

fn session_cookie(session_id: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session_id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::hours(24))
        .build()
}

fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}

fn session_id_from(jar: &CookieJar) -> Result<String, ApiError> {
    jar.get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::SessionNotFound)
}

fn owner_from(claims: &Option<Extension<JwtClaims>>) -> SessionOwner {
    match claims {
        Some(Extension(claims)) => SessionOwner::User(claims.sub.clone()),
        None => SessionOwner::Anonymous,
    }
}

/// Authenticated players get the persisted store; anonymous ones the
/// in-memory store.
fn game_service(state: &AppState, claims: &Option<Extension<JwtClaims>>) -> GameService {
    let store: Arc<dyn SessionStore> = match claims {
        Some(_) => Arc::new(MongoSessionStore::new(state.mongo.clone())),
        None => state.anonymous_sessions.clone(),
    };
    GameService::new(store, state.riddles.clone(), state.session_locks.clone())
}

/// POST /api/v1/game/start
pub async fn start_game(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<JwtClaims>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let service = game_service(&state, &claims);
    let outcome = service.start(owner_from(&claims)).await?;

    let jar = jar.add(session_cookie(outcome.session_id));
    Ok((
        jar,
        Json(StartResponse {
            question: outcome.question,
            message: "Game started! Good luck!".to_string(),
        }),
    ))
}

/// POST /api/v1/game/answer
pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<JwtClaims>>,
    jar: CookieJar,
    AppJson(request): AppJson<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;
    let session_id = session_id_from(&jar)?;

    let service = game_service(&state, &claims);
    let outcome = service
        .answer(&session_id, &owner_from(&claims), &request.answer)
        .await?;

    let message = if outcome.correct {
        "Correct! Here's your next riddle.".to_string()
    } else {
        format!(
            "Wrong! The correct answer was '{}'. Try this next one!",
            outcome.correct_answer
        )
    };

    Ok(Json(AnswerResponse {
        correct: outcome.correct,
        question: outcome.next_question,
        score: outcome.score,
        total_answered: outcome.total_answered,
        correct_answers: outcome.correct_answers,
        message,
    }))
}

/// GET /api/v1/game/score
pub async fn get_score(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<JwtClaims>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = session_id_from(&jar)?;

    let service = game_service(&state, &claims);
    let session = service.snapshot(&session_id, &owner_from(&claims)).await?;

    Ok(Json(ScoreResponse {
        score: session.score,
        total_answered: session.total_answered,
        correct_answers: session.correct_answers,
        success_rate: success_rate(
            u64::from(session.correct_answers),
            u64::from(session.total_answered),
        ),
        active: session.active,
        current_question: session
            .current_riddle
            .map(|riddle| riddle.question),
    }))
}

/// GET /api/v1/game/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<JwtClaims>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = session_id_from(&jar)?;

    let service = game_service(&state, &claims);
    let session = service.snapshot(&session_id, &owner_from(&claims)).await?;

    Ok(Json(HistoryResponse {
        session_id: session.session_id,
        total_questions: session.history.len(),
        history: session.history,
    }))
}

/// POST /api/v1/game/end
pub async fn end_game(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<JwtClaims>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = session_id_from(&jar)?;

    let service = game_service(&state, &claims);
    let outcome = service.end(&session_id, &owner_from(&claims)).await?;

    // Aggregate into lifetime stats exactly once per game, and only for
    // registered players.
    if outcome.just_ended {
        if let Some(Extension(claims)) = &claims {
            StatsService::new(state.mongo.clone())
                .record_game_end(
                    &claims.sub,
                    outcome.final_score,
                    outcome.total_questions,
                    outcome.correct_answers,
                )
                .await?;
        }
    }

    // The browser forgets the session; the row itself stays around for
    // stats and history until reset or eviction.
    let jar = jar.add(removal_cookie());
    Ok((
        jar,
        Json(EndResponse {
            final_score: outcome.final_score,
            total_questions: outcome.total_questions,
            correct_answers: outcome.correct_answers,
            success_rate: outcome.success_rate,
            message: "Game ended successfully! Thanks for playing!".to_string(),
        }),
    ))
}

/// DELETE /api/v1/game/reset
pub async fn reset_game(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<JwtClaims>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let session_id = session_id_from(&jar)?;

    let service = game_service(&state, &claims);
    service.reset(&session_id, &owner_from(&claims)).await?;

    let jar = jar.add(removal_cookie());
    Ok((
        StatusCode::OK,
        jar,
        Json(serde_json::json!({ "message": "Game reset. Start a new game anytime!" })),
    ))
}
