use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::Config;
use crate::error::ApiError;
use crate::metrics::record_riddle_generation;
use crate::models::Riddle;

const SYSTEM_PROMPT: &str = "You are a programming riddle generator.";

const USER_PROMPT: &str = r#"
Generate a short programming riddle in strict JSON format:
{
  "question": "...",
  "answer": "..."
}
The 'answer' must be only 1-3 words. No explanation, no extra text.
"#;

/// Hard deadline for one generation call. No retry: callers see the
/// failure immediately and abort the in-flight transition.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

const TEMPERATURE: f64 = 0.7;

/// Source of riddles. The production implementation talks to the AI
/// provider; tests substitute scripted sources.
#[async_trait]
pub trait RiddleSource: Send + Sync {
    async fn generate(&self) -> Result<Riddle, ApiError>;
}

pub struct RiddleGenerator {
    http_client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl RiddleGenerator {
    pub fn from_config(config: &Config) -> Self {
        Self {
            http_client: Client::new(),
            api_url: config.ai_api_url.clone(),
            api_key: config.ai_api_key.clone(),
            model: config.ai_model.clone(),
        }
    }

    async fn request_riddle(&self) -> Result<Riddle, ApiError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": USER_PROMPT },
            ],
            "temperature": TEMPERATURE,
        });

        tracing::debug!("Requesting riddle from AI provider: {}", self.api_url);

        let response = self
            .http_client
            .post(&self.api_url)
            .header("X-Api-Key", &self.api_key)
            .header("Provider", "openai")
            .json(&body)
            .timeout(GENERATION_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiError::UpstreamTimeout
                } else {
                    ApiError::UpstreamError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiError::UpstreamError(format!(
                "AI API returned {}: {}",
                status, error_text
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| ApiError::MalformedResponse(format!("invalid completion envelope: {}", e)))?;

        let content = completion
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| ApiError::MalformedResponse("completion has no choices".to_string()))?;

        parse_riddle_payload(content)
    }
}

#[async_trait]
impl RiddleSource for RiddleGenerator {
    async fn generate(&self) -> Result<Riddle, ApiError> {
        let result = self.request_riddle().await;

        match &result {
            Ok(riddle) => {
                record_riddle_generation("ok");
                tracing::info!("Generated riddle: {}", riddle.question);
            }
            Err(e) => {
                record_riddle_generation(e.kind());
                tracing::warn!("Riddle generation failed: {}", e);
            }
        }

        result
    }
}

/// Parses the provider's reply text into a riddle, tolerating the
/// markdown code fences the model sometimes wraps around its JSON.
pub(crate) fn parse_riddle_payload(raw: &str) -> Result<Riddle, ApiError> {
    let payload = strip_code_fence(raw);

    let riddle: Riddle = serde_json::from_str(payload)
        .map_err(|e| ApiError::MalformedResponse(format!("{}: {}", e, payload)))?;

    if riddle.question.trim().is_empty() || riddle.answer.trim().is_empty() {
        return Err(ApiError::MalformedResponse(
            "riddle has an empty question or answer".to_string(),
        ));
    }

    Ok(riddle)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let riddle =
            parse_riddle_payload(r#"{"question": "What has keys but no locks?", "answer": "keyboard"}"#)
                .unwrap();
        assert_eq!(riddle.answer, "keyboard");
    }

    #[test]
    fn parses_json_wrapped_in_fences() {
        let raw = "```json\n{\"question\": \"Q?\", \"answer\": \"stack\"}\n```";
        let riddle = parse_riddle_payload(raw).unwrap();
        assert_eq!(riddle.question, "Q?");
        assert_eq!(riddle.answer, "stack");
    }

    #[test]
    fn parses_fences_without_language_tag() {
        let raw = "```\n{\"question\": \"Q?\", \"answer\": \"heap\"}\n```";
        let riddle = parse_riddle_payload(raw).unwrap();
        assert_eq!(riddle.answer, "heap");
    }

    #[test]
    fn rejects_non_json_payload() {
        let err = parse_riddle_payload("Sure! Here's a riddle for you...").unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn rejects_empty_answer() {
        let err = parse_riddle_payload(r#"{"question": "Q?", "answer": "  "}"#).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn rejects_missing_fields() {
        let err = parse_riddle_payload(r#"{"question": "Q?"}"#).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }
}
