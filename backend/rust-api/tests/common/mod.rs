use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use tokio::sync::Mutex;

use riddlegame_api::error::ApiError;
use riddlegame_api::models::Riddle;
use riddlegame_api::services::generator::RiddleSource;
use riddlegame_api::{config::Config, create_router, services::AppState};

/// Riddle source with a fixed script. Queued items are handed out in
/// order; `Err` entries become upstream timeouts; an exhausted script
/// falls back to numbered placeholder riddles.
pub struct ScriptedRiddles {
    script: Mutex<VecDeque<Result<Riddle, ()>>>,
    fallback_counter: Mutex<u32>,
}

impl ScriptedRiddles {
    pub fn new(script: Vec<Result<Riddle, ()>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback_counter: Mutex::new(0),
        })
    }
}

#[async_trait]
impl RiddleSource for ScriptedRiddles {
    async fn generate(&self) -> Result<Riddle, ApiError> {
        if let Some(next) = self.script.lock().await.pop_front() {
            return next.map_err(|_| ApiError::UpstreamTimeout);
        }
        let mut counter = self.fallback_counter.lock().await;
        *counter += 1;
        Ok(Riddle {
            question: format!("Placeholder question {}?", counter),
            answer: format!("placeholder{}", counter),
        })
    }
}

pub fn keyboard_riddle() -> Riddle {
    Riddle {
        question: "I have keys but no locks, space but no room. What am I?".to_string(),
        answer: "keyboard".to_string(),
    }
}

/// Build the full router around a scripted riddle source. The MongoDB
/// client connects lazily, so anonymous-path tests never need a live
/// database.
pub async fn create_test_app(riddles: Arc<dyn RiddleSource>) -> Router {
    // Initialize tracing for tests
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = Config {
        mongo_uri: "mongodb://localhost:27017".to_string(),
        mongo_database: "riddlegame_test".to_string(),
        jwt_secret: "test-secret".to_string(),
        ai_api_url: "http://localhost:0/unused".to_string(),
        ai_api_key: String::new(),
        ai_model: "test-model".to_string(),
        anonymous_session_ttl_secs: 86400,
    };

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to build test MongoDB client");

    let app_state = Arc::new(AppState::new(config, mongo_client, riddles));

    create_router(app_state)
}
