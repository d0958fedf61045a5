//! Fish Audio speech synthesis engine.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::Serialize;

use crate::config::SpeechConfig;
use crate::errors::{PipelineError, Result};

use super::{SpeechEngine, SynthesisOutcome, finalize_outcome};

const API_URL: &str = "https://api.fish.audio/v1/tts";

fn is_empty_str(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    format: &'a str,
    normalize: bool,
    #[serde(skip_serializing_if = "is_empty_str")]
    reference_id: &'a str,
}

pub struct FishEngine {
    client: Client,
    api_key: String,
    reference_id: String,
    sample_rate: u32,
}

impl FishEngine {
    pub fn new(config: &SpeechConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: config.fish_api_key.clone(),
            reference_id: config.fish_reference_id.clone(),
            sample_rate: config.sample_rate,
        }
    }
}

#[async_trait]
impl SpeechEngine for FishEngine {
    fn name(&self) -> &'static str {
        "fish"
    }

    fn available(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn voices(&self) -> Vec<String> {
        // voices are reference-id based, there is no static list
        if self.reference_id.is_empty() {
            Vec::new()
        } else {
            vec![self.reference_id.clone()]
        }
    }

    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<SynthesisOutcome> {
        if self.api_key.is_empty() {
            return Err(PipelineError::Configuration(
                "Fish Audio API key is not configured".to_string(),
            ));
        }

        let request = TtsRequest {
            text,
            format: "wav",
            normalize: true,
            reference_id: &self.reference_id,
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
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "no error body".to_string());
            error!("Fish Audio API error (status {}): {}", status, body);
            return Err(PipelineError::Synthesis(format!(
                "Fish Audio API error ({}): {}",
                status, body
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
        let engine = FishEngine::new(&SpeechConfig::default());
        assert!(!engine.available());

        let config = SpeechConfig {
            fish_api_key: "fk-test".to_string(),
            fish_reference_id: "voice-1".to_string(),
            ..SpeechConfig::default()
        };
        let engine = FishEngine::new(&config);
        assert!(engine.available());
        assert_eq!(engine.voices(), vec!["voice-1".to_string()]);
    }

    #[tokio::test]
    async fn test_unconfigured_engine_rejects_without_network() {
        let engine = FishEngine::new(&SpeechConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let err = engine
            .synthesize("hello", &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
