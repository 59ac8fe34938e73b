use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use riddlegame_api::services::generator::RiddleGenerator;
use riddlegame_api::{config::Config, create_router, services::AppState};

const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "riddlegame_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Riddle Game API");

    // Load configuration
    let config = Config::load().expect("Failed to load configuration");
    tracing::info!(
        "Configuration loaded for environment: {:?}",
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    // Initialize database connection
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to MongoDB");
    tracing::info!("MongoDB connected");

    let riddles = Arc::new(RiddleGenerator::from_config(&config));

    // Build application state
    let app_state = Arc::new(AppState::new(config, mongo_client, riddles));

    // Sweep idle anonymous sessions in the background
    spawn_eviction_task(app_state.clone());

    // Build router
    let app = create_router(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();

    tracing::info!("Server listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}

fn spawn_eviction_task(app_state: Arc<AppState>) {
    let ttl = Duration::from_secs(app_state.config.anonymous_session_ttl_secs);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(EVICTION_SWEEP_INTERVAL);
        // First tick fires immediately; skip it.
        interval.tick().await;

        loop {
            interval.tick().await;

            let evicted = app_state.anonymous_sessions.evict_expired(ttl).await;

            if !evicted.is_empty() {
                tracing::info!("Evicted {} idle anonymous session(s)", evicted.len());
            }
        }
    });
}
