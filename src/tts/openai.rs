//! OpenAI speech synthesis engine.
//!
//! One HTTP request per attempt against the audio/speech endpoint; the
//! router owns retries and fallback, this engine only reports failures.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};

use crate::config::SpeechConfig;
use crate::errors::{PipelineError, Result};

use super::{SpeechEngine, SynthesisOutcome, finalize_outcome};

const API_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Request body for the OpenAI TTS API
#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
    response_format: &'a str,
}

pub struct OpenAiEngine {
    client: Client,
    api_key: String,
    voice: String,
    model: String,
    speed: f32,
    sample_rate: u32,
}

impl OpenAiEngine {
    pub fn new(config: &SpeechConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: config.openai_api_key.clone(),
            voice: config.openai_voice.clone(),
            model: config.openai_model.clone(),
            speed: config.openai_speed,
            sample_rate: config.sample_rate,
        }
    }
}

#[async_trait]
impl SpeechEngine for OpenAiEngine {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn voices(&self) -> Vec<String> {
        ["alloy", "echo", "fable", "onyx", "nova", "shimmer"]
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<SynthesisOutcome> {
        if self.api_key.is_empty() {
            return Err(PipelineError::Configuration(
                "OpenAI API key is not configured".to_string(),
            ));
        }

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "wav",
        };

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "no error body".to_string());
            let error_json: Value = serde_json::from_str(&error_text)
                .unwrap_or_else(|_| json!({"error": {"message": error_text}}));
            let message = error_json["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error");

            error!("OpenAI TTS API error (status {}): {}", status, message);
            return Err(PipelineError::Synthesis(format!(
                "OpenAI TTS API error ({}): {}",
                status, message
            )));
        }

        let audio = response.bytes().await?;
        tokio::fs::write(output_path, &audio).await?;

        finalize_outcome(output_path, self.name(), self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_follows_api_key() {
        let mut config = SpeechConfig::default();
        let engine = OpenAiEngine::new(&config);
        assert!(!engine.available());

        config.openai_api_key = "sk-test".to_string();
        let engine = OpenAiEngine::new(&config);
        assert!(engine.available());
        assert_eq!(engine.name(), "openai");
    }

    #[tokio::test]
    async fn test_unconfigured_engine_rejects_without_network() {
        let engine = OpenAiEngine::new(&SpeechConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .synthesize("hello", &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_voice_list() {
        let engine = OpenAiEngine::new(&SpeechConfig::default());
        assert!(engine.voices().contains(&"alloy".to_string()));
    }
}
