use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub ai_api_url: String,
    pub ai_api_key: String,
    pub ai_model: String,
    /// Idle TTL for anonymous in-memory sessions, seconds.
    pub anonymous_session_ttl_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from .env if present
        dotenvy::dotenv().ok();

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let config_builder = config::Config::builder()
            .add_source(
                config::File::with_name(&format!("config/{}", env)).required(false), // Allow missing config file, fallback to ENV
            )
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "riddlegame".to_string());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: JWT_SECRET must be set in production!");
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            });

        let ai_api_url = settings
            .get_string("ai.api_url")
            .or_else(|_| env::var("AI_API_URL"))
            .unwrap_or_else(|_| "https://ai-api.amalitech-dev.net/api/v2/".to_string());

        let ai_api_key = settings
            .get_string("ai.api_key")
            .or_else(|_| env::var("AI_API_KEY"))
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .unwrap_or_else(|_| {
                if env == "prod" {
                    panic!("FATAL: AI_API_KEY must be set in production!");
                }
                eprintln!("WARNING: AI_API_KEY not set, riddle generation will fail");
                String::new()
            });

        let ai_model = settings
            .get_string("ai.model")
            .or_else(|_| env::var("AI_MODEL"))
            .unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let anonymous_session_ttl_secs = settings
            .get_string("game.anonymous_session_ttl_secs")
            .ok()
            .or_else(|| env::var("ANONYMOUS_SESSION_TTL_SECS").ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(86400); // 24 hours, matches the session cookie max-age

        Ok(Config {
            mongo_uri,
            mongo_database,
            jwt_secret,
            ai_api_url,
            ai_api_key,
            ai_model,
            anonymous_session_ttl_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_falls_back_to_defaults() {
        std::env::remove_var("MONGO_URI");
        std::env::remove_var("ANONYMOUS_SESSION_TTL_SECS");
        let config = Config::load().expect("config should load without env");
        assert_eq!(config.mongo_uri, "mongodb://localhost:27017");
        assert_eq!(config.mongo_database, "riddlegame");
        assert_eq!(config.ai_model, "gpt-4o-mini");
        assert_eq!(config.anonymous_session_ttl_secs, 86400);
    }

    #[test]
    #[serial]
    fn env_overrides_ttl() {
        std::env::set_var("ANONYMOUS_SESSION_TTL_SECS", "600");
        let config = Config::load().expect("config should load");
        assert_eq!(config.anonymous_session_ttl_secs, 600);
        std::env::remove_var("ANONYMOUS_SESSION_TTL_SECS");
    }
}
