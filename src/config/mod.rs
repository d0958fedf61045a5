//! Pipeline configuration.
//!
//! One read-only snapshot per job: engine credentials and priority, video
//! resolution/fps/bitrate, subtitle styling and timing bounds, retry counts
//! and per-call timeouts. Loaded from a JSON file or built from defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Speech synthesis configuration shared by the router and its engines
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Engine tags in priority order; unknown tags are dropped with a warning
    pub engine_priority: Vec<String>,
    /// Engine to try first, overriding priority order
    pub preferred_engine: Option<String>,

    // OpenAI TTS
    pub openai_api_key: String,
    pub openai_voice: String,
    pub openai_model: String,
    /// Speech speed (0.25 to 4.0)
    pub openai_speed: f32,

    // Fish Audio TTS
    pub fish_api_key: String,
    pub fish_reference_id: String,

    /// Sample rate of the silent fallback track
    pub sample_rate: u32,
    /// Attempts per engine before advancing to the next candidate
    pub max_retries: u32,
    /// Per-request timeout for engine HTTP calls
    pub request_timeout_secs: u64,
    /// Speaking rate used to estimate silent durations from text length
    pub chars_per_second: f64,
    /// Lower bound for any synthesized duration; never below 1.0
    pub min_silence_secs: f64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine_priority: vec!["openai".to_string(), "fish".to_string()],
            preferred_engine: None,
            openai_api_key: String::new(),
            openai_voice: "alloy".to_string(),
            openai_model: "tts-1".to_string(),
            openai_speed: 1.0,
            fish_api_key: String::new(),
            fish_reference_id: String::new(),
            sample_rate: 22050,
            max_retries: 3,
            request_timeout_secs: 30,
            chars_per_second: 3.5,
            min_silence_secs: 3.0,
        }
    }
}

impl SpeechConfig {
    /// Minimum duration with the hard 1.0s floor applied
    pub fn min_duration(&self) -> f64 {
        self.min_silence_secs.max(1.0)
    }
}

/// Per-slide clip rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_codec: String,
    pub preset: String,
    pub crf: String,
    pub pixel_format: String,
    /// Draw an animated progress bar on clips longer than one second
    pub progress_overlay: bool,
    pub render_timeout_secs: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 24,
            video_codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: "23".to_string(),
            pixel_format: "yuv420p".to_string(),
            progress_overlay: false,
            render_timeout_secs: 300,
        }
    }
}

impl VideoConfig {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Subtitle segmentation and styling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// Maximum characters per cue line
    pub max_chars_per_line: usize,
    /// Minimum display time per cue, seconds
    pub min_display_time: f64,
    /// Maximum display time per cue, seconds
    pub max_display_time: f64,
    /// Sentence-ending punctuation that closes a segmentation unit
    pub sentence_endings: String,
    /// Clause punctuation used when a single unit exceeds the line limit
    pub secondary_breaks: String,
    /// Burn cues into the final video (soft subtitles are not produced)
    pub burn_in: bool,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            max_chars_per_line: 40,
            min_display_time: 1.0,
            max_display_time: 8.0,
            sentence_endings: "。！？.!?".to_string(),
            secondary_breaks: "，,、；;：:".to_string(),
            burn_in: true,
        }
    }
}

/// Final assembly (concat/mux/burn-in) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    pub video_codec: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub video_bitrate: String,
    pub preset: String,
    pub crf: String,
    pub pixel_format: String,
    pub movflags: String,
    pub video_concat_timeout_secs: u64,
    pub audio_concat_timeout_secs: u64,
    pub mux_timeout_secs: u64,
    pub burn_in_timeout_secs: u64,
    /// Outputs below this size fail the sub-stage validation
    pub min_output_bytes: u64,
    /// Tolerated difference between concatenated video and audio durations
    /// before a drift warning is recorded
    pub drift_epsilon_secs: f64,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "128k".to_string(),
            video_bitrate: "2000k".to_string(),
            preset: "medium".to_string(),
            crf: "23".to_string(),
            pixel_format: "yuv420p".to_string(),
            movflags: "+faststart".to_string(),
            video_concat_timeout_secs: 300,
            audio_concat_timeout_secs: 180,
            mux_timeout_secs: 600,
            burn_in_timeout_secs: 600,
            min_output_bytes: 10 * 1024,
            drift_epsilon_secs: 0.5,
        }
    }
}

/// Top-level pipeline configuration snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub speech: SpeechConfig,
    pub video: VideoConfig,
    pub subtitle: SubtitleConfig,
    pub assembly: AssemblyConfig,
    /// Parallel work items per per-slide stage
    pub concurrency: usize,
}

impl PipelineConfig {
    /// Load a configuration snapshot from a JSON file; missing fields fall
    /// back to their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    pub fn worker_count(&self) -> usize {
        self.concurrency.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.speech.max_retries, 3);
        assert_eq!(config.speech.chars_per_second, 3.5);
        assert!(config.speech.min_duration() >= 1.0);
        assert_eq!(config.video.resolution(), "1920x1080");
        assert_eq!(config.subtitle.max_chars_per_line, 40);
        assert_eq!(config.assembly.min_output_bytes, 10 * 1024);
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"speech": {"openai_api_key": "sk-test", "preferred_engine": "fish"}, "concurrency": 8}"#)
            .unwrap();

        let config = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(config.speech.openai_api_key, "sk-test");
        assert_eq!(config.speech.preferred_engine.as_deref(), Some("fish"));
        assert_eq!(config.worker_count(), 8);
        // untouched sections keep their defaults
        assert_eq!(config.video.fps, 24);
        assert_eq!(config.subtitle.min_display_time, 1.0);
    }

    #[test]
    fn test_min_duration_floor() {
        let config = SpeechConfig {
            min_silence_secs: 0.2,
            ..SpeechConfig::default()
        };
        assert_eq!(config.min_duration(), 1.0);
    }
}
