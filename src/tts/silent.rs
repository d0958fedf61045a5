//! Silent fallback engine.
//!
//! Always available and never fails in practice: writes a 16-bit mono
//! WAV of zeros whose length is estimated from the text's character count
//! at the configured speaking rate, clamped to the configured minimum.

use std::path::Path;

use async_trait::async_trait;
use log::info;

use crate::config::SpeechConfig;
use crate::errors::Result;

use super::{SpeechEngine, SynthesisOutcome};

pub struct SilentEngine {
    sample_rate: u32,
    chars_per_second: f64,
    min_duration: f64,
}

impl SilentEngine {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            chars_per_second: config.chars_per_second,
            min_duration: config.min_duration(),
        }
    }

    /// Estimated speaking time for `text`; the configured minimum for
    /// empty text
    pub fn estimate_duration(&self, text: &str) -> f64 {
        let chars = text.chars().filter(|c| !c.is_whitespace()).count();
        let duration = if chars == 0 {
            self.min_duration
        } else {
            (chars as f64 / self.chars_per_second).max(self.min_duration)
        };
        (duration * 100.0).round() / 100.0
    }

    /// Write a silent WAV sized to the estimated duration
    pub fn write_silence(&self, text: &str, output_path: &Path) -> Result<SynthesisOutcome> {
        let duration = self.estimate_duration(text);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(output_path, spec)?;
        let samples = (duration * self.sample_rate as f64).round() as u64;
        for _ in 0..samples {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;

        let file_size = std::fs::metadata(output_path)?.len();
        info!(
            "wrote {:.2}s of silence to {} ({} bytes)",
            duration,
            output_path.display(),
            file_size
        );

        Ok(SynthesisOutcome {
            duration_secs: duration,
            file_size,
            engine: "silent".to_string(),
            silent: true,
            estimated: true,
            retries: 0,
        })
    }
}

#[async_trait]
impl SpeechEngine for SilentEngine {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn available(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<SynthesisOutcome> {
        self.write_silence(text, output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::wav_duration;

    fn engine() -> SilentEngine {
        SilentEngine::new(&SpeechConfig {
            min_silence_secs: 1.0,
            ..SpeechConfig::default()
        })
    }

    #[test]
    fn test_estimate_duration() {
        let engine = engine();
        // 14 chars at 3.5 chars/sec
        assert_eq!(engine.estimate_duration(&"字".repeat(14)), 4.0);
        // short text clamps to the minimum
        assert_eq!(engine.estimate_duration("короткий"), 2.29);
        assert_eq!(engine.estimate_duration("ab"), 1.0);
        // empty text gets the minimum
        assert_eq!(engine.estimate_duration(""), 1.0);
        // whitespace does not count as speakable characters
        assert_eq!(engine.estimate_duration("a b c"), 1.0);
    }

    #[test]
    fn test_written_file_matches_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silence.wav");

        let engine = engine();
        let outcome = engine.write_silence("十四个字符的静音测试文本内容", &path).unwrap();

        assert!(outcome.silent);
        assert!(outcome.estimated);
        assert!(outcome.duration_secs >= 1.0);
        assert!(outcome.file_size > 0);

        let probed = wav_duration(&path).unwrap();
        assert!((probed - outcome.duration_secs).abs() < 0.01);
    }

    #[test]
    fn test_minimum_floor_is_respected() {
        let engine = SilentEngine::new(&SpeechConfig {
            min_silence_secs: 0.1, // below the hard floor
            ..SpeechConfig::default()
        });
        assert!(engine.estimate_duration("") >= 1.0);
    }
}
