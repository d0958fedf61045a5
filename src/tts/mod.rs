// Speech synthesis module
// Contains the engine trait, the static engine registry and the router
// that guarantees a result for every slide (worst case: silence)

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod fish;
pub mod openai;
pub mod silent;

use crate::config::SpeechConfig;
use crate::errors::{PipelineError, Result};
use fish::FishEngine;
use openai::OpenAiEngine;
use silent::SilentEngine;

/// Result of one synthesis call. The router never fails, so there is no
/// error side: the worst case is a silent track with an estimated duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisOutcome {
    /// Always > 0
    pub duration_secs: f64,
    pub file_size: u64,
    /// Tag of the engine that produced the audio
    pub engine: String,
    pub silent: bool,
    /// Duration was estimated from text length or file size, not probed
    pub estimated: bool,
    /// Failed attempts before the successful one
    pub retries: u32,
}

/// Availability snapshot of the configured engines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub available_engines: Vec<String>,
    pub total_engines: usize,
}

/// Trait that all speech engines must implement
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the engine is usable as configured (credentials present)
    fn available(&self) -> bool;

    fn voices(&self) -> Vec<String> {
        Vec::new()
    }

    /// One synthesis attempt; retries live in the router
    async fn synthesize(&self, text: &str, output_path: &Path) -> Result<SynthesisOutcome>;
}

/// Build the engine matching a configuration tag. Unknown tags are dropped
/// from the candidate list with a warning; this registry is the only place
/// engines come from — no runtime loading.
fn engine_for_tag(tag: &str, config: &SpeechConfig) -> Option<Box<dyn SpeechEngine>> {
    match tag {
        "openai" => Some(Box::new(OpenAiEngine::new(config)) as Box<dyn SpeechEngine>),
        "fish" => Some(Box::new(FishEngine::new(config)) as Box<dyn SpeechEngine>),
        // silence is appended unconditionally, never listed as a candidate
        "silent" => None,
        other => {
            warn!("unknown speech engine tag '{}', dropping from candidates", other);
            None
        }
    }
}

/// Engine-agnostic synthesis router.
///
/// Candidate order: the preferred engine (if configured and available)
/// first, then the remaining configured engines by priority. Each
/// candidate gets up to `max_retries` attempts with exponential backoff;
/// when every real engine is exhausted — or the input text is empty — a
/// silent track is written instead.
pub struct SpeechRouter {
    engines: Vec<Box<dyn SpeechEngine>>,
    silent: SilentEngine,
    config: SpeechConfig,
}

impl SpeechRouter {
    pub fn new(config: SpeechConfig) -> Self {
        let engines = config
            .engine_priority
            .iter()
            .filter_map(|tag| engine_for_tag(tag, &config))
            .collect();
        let silent = SilentEngine::new(&config);
        Self {
            engines,
            silent,
            config,
        }
    }

    /// Build a router over an explicit engine list (tests)
    #[cfg(test)]
    pub(crate) fn with_engines(engines: Vec<Box<dyn SpeechEngine>>, config: SpeechConfig) -> Self {
        let silent = SilentEngine::new(&config);
        Self {
            engines,
            silent,
            config,
        }
    }

    /// Synthesize `text` into `output_path`. Never fails.
    pub async fn synthesize(
        &self,
        text: &str,
        output_path: &Path,
        preferred: Option<&str>,
    ) -> SynthesisOutcome {
        let sanitized = sanitize_text(text);
        if sanitized.is_empty() {
            info!("empty narration text, writing silence to {}", output_path.display());
            return self.fallback_silence("", output_path);
        }

        for engine in self.candidates(preferred) {
            for attempt in 1..=self.config.max_retries.max(1) {
                info!(
                    "synthesizing with engine '{}' (attempt {}/{})",
                    engine.name(),
                    attempt,
                    self.config.max_retries.max(1)
                );
                match engine.synthesize(&sanitized, output_path).await {
                    Ok(mut outcome) => {
                        outcome.retries = attempt - 1;
                        info!(
                            "engine '{}' produced {:.2}s of audio ({} bytes)",
                            outcome.engine, outcome.duration_secs, outcome.file_size
                        );
                        return outcome;
                    }
                    Err(e) => {
                        warn!("engine '{}' attempt {} failed: {}", engine.name(), attempt, e);
                        if attempt < self.config.max_retries.max(1) {
                            let wait = Duration::from_secs(2u64.pow(attempt));
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
            warn!("engine '{}' exhausted, advancing to next candidate", engine.name());
        }

        warn!("all speech engines failed, writing silence to {}", output_path.display());
        self.fallback_silence(&sanitized, output_path)
    }

    fn candidates(&self, preferred: Option<&str>) -> Vec<&dyn SpeechEngine> {
        let mut ordered: Vec<&dyn SpeechEngine> = Vec::with_capacity(self.engines.len());
        let preferred = preferred.or(self.config.preferred_engine.as_deref());

        if let Some(tag) = preferred {
            if let Some(engine) = self
                .engines
                .iter()
                .find(|e| e.name() == tag && e.available())
            {
                ordered.push(engine.as_ref());
            } else {
                warn!("preferred engine '{}' is not configured or unavailable", tag);
            }
        }
        for engine in &self.engines {
            if engine.available() && !ordered.iter().any(|e| e.name() == engine.name()) {
                ordered.push(engine.as_ref());
            }
        }
        ordered
    }

    fn fallback_silence(&self, text: &str, output_path: &Path) -> SynthesisOutcome {
        match self.silent.write_silence(text, output_path) {
            Ok(outcome) => outcome,
            Err(e) => {
                // the pipeline must keep going; assembly will surface the
                // missing file with the slide named
                error!("silent fallback failed to write audio: {}", e);
                SynthesisOutcome {
                    duration_secs: self.silent.estimate_duration(text),
                    file_size: 0,
                    engine: "silent".to_string(),
                    silent: true,
                    estimated: true,
                    retries: 0,
                }
            }
        }
    }

    pub fn engine_status(&self) -> EngineStatus {
        let mut available: Vec<String> = self
            .engines
            .iter()
            .filter(|e| e.available())
            .map(|e| e.name().to_string())
            .collect();
        available.push("silent".to_string());
        EngineStatus {
            total_engines: available.len(),
            available_engines: available,
        }
    }

    /// Voice lists per available engine
    pub fn available_voices(&self) -> Vec<(String, Vec<String>)> {
        self.engines
            .iter()
            .filter(|e| e.available())
            .map(|e| (e.name().to_string(), e.voices()))
            .collect()
    }
}

static DISALLOWED_SYMBOLS: &[char] = &['&', '®', '™', '©', '°', '±', '§'];

static CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[^\w\s.,!?;:'"()（）。，！？；：、-]"#).unwrap()
});

/// Prepare text for a synthesis request: strip symbols engines choke on,
/// normalize whitespace and make sure the text ends with a sentence mark.
pub fn sanitize_text(text: &str) -> String {
    let mut result = text.trim().to_string();
    for c in DISALLOWED_SYMBOLS {
        result = result.replace(*c, "");
    }
    result = CHARSET.replace_all(&result, "").to_string();
    result = result.replace("...", ". ");
    result = result.replace('\n', " ");
    while result.contains("  ") {
        result = result.replace("  ", " ");
    }
    let mut result = result.trim().to_string();
    if let Some(last) = result.chars().last() {
        if !".!?。！？".contains(last) {
            result.push('.');
        }
    }
    result
}

/// Shared post-synthesis validation: the file must exist and be
/// non-trivial; the duration is probed from the WAV header, falling back
/// to a size-based estimate when the header is unreadable.
pub(crate) fn finalize_outcome(
    path: &Path,
    engine: &'static str,
    sample_rate: u32,
) -> Result<SynthesisOutcome> {
    let metadata = std::fs::metadata(path)
        .map_err(|_| PipelineError::FileNotFound(path.display().to_string()))?;
    let file_size = metadata.len();
    if file_size < 1000 {
        return Err(PipelineError::Synthesis(format!(
            "engine '{}' produced an invalid or truncated file ({} bytes)",
            engine, file_size
        )));
    }

    match wav_duration(path) {
        Ok(duration) if duration > 0.0 => Ok(SynthesisOutcome {
            duration_secs: duration,
            file_size,
            engine: engine.to_string(),
            silent: false,
            estimated: false,
            retries: 0,
        }),
        _ => {
            // 16-bit mono PCM assumption, same as the silent track
            let estimated = (file_size as f64 / (2.0 * sample_rate as f64)).max(1.0);
            warn!(
                "could not probe duration of {}, estimating {:.2}s from file size",
                path.display(),
                estimated
            );
            Ok(SynthesisOutcome {
                duration_secs: estimated,
                file_size,
                engine: engine.to_string(),
                silent: false,
                estimated: true,
                retries: 0,
            })
        }
    }
}

/// Duration of a WAV file from its header
pub fn wav_duration(path: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingEngine {
        calls: AtomicU32,
    }

    #[async_trait]
    impl SpeechEngine for FailingEngine {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn available(&self) -> bool {
            true
        }
        async fn synthesize(&self, _text: &str, _output: &Path) -> Result<SynthesisOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::Synthesis("engine is down".to_string()))
        }
    }

    struct StubEngine;

    #[async_trait]
    impl SpeechEngine for StubEngine {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn available(&self) -> bool {
            true
        }
        async fn synthesize(&self, _text: &str, output: &Path) -> Result<SynthesisOutcome> {
            std::fs::write(output, vec![0u8; 2048])?;
            Ok(SynthesisOutcome {
                duration_secs: 2.5,
                file_size: 2048,
                engine: "stub".to_string(),
                silent: false,
                estimated: false,
                retries: 0,
            })
        }
    }

    fn test_config() -> SpeechConfig {
        SpeechConfig {
            max_retries: 1,
            min_silence_secs: 1.0,
            ..SpeechConfig::default()
        }
    }

    fn out_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("Hello  world"), "Hello world.");
        assert_eq!(sanitize_text("Hello world!"), "Hello world!");
        assert_eq!(sanitize_text("Line 1\nLine 2"), "Line 1 Line 2.");
        assert_eq!(sanitize_text("Text with...ellipsis"), "Text with. ellipsis.");
        assert_eq!(sanitize_text("50° of ®™ pain"), "50 of pain.");
        assert_eq!(sanitize_text("第一张幻灯片。"), "第一张幻灯片。");
        assert_eq!(sanitize_text("   "), "");
    }

    #[tokio::test]
    async fn test_all_engines_failing_yields_silence() {
        let dir = tempfile::tempdir().unwrap();
        let router = SpeechRouter::with_engines(
            vec![
                Box::new(FailingEngine { calls: AtomicU32::new(0) }),
                Box::new(FailingEngine { calls: AtomicU32::new(0) }),
            ],
            test_config(),
        );

        let path = out_path(&dir, "narration.wav");
        let outcome = router.synthesize("some narration text", &path, None).await;

        assert_eq!(outcome.engine, "silent");
        assert!(outcome.silent);
        assert!(outcome.estimated);
        assert!(outcome.duration_secs >= 1.0);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_empty_text_goes_straight_to_silence() {
        let dir = tempfile::tempdir().unwrap();
        let failing = FailingEngine { calls: AtomicU32::new(0) };
        let router = SpeechRouter::with_engines(vec![Box::new(failing)], test_config());

        let path = out_path(&dir, "empty.wav");
        let outcome = router.synthesize("   \n  ", &path, None).await;

        assert!(outcome.silent);
        // the configured minimum, not zero
        assert_eq!(outcome.duration_secs, 1.0);
        // no engine was ever consulted: the file is pure silence
        let probed = wav_duration(&path).unwrap();
        assert!((probed - outcome.duration_secs).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_first_working_engine_wins() {
        let dir = tempfile::tempdir().unwrap();
        let router = SpeechRouter::with_engines(
            vec![
                Box::new(FailingEngine { calls: AtomicU32::new(0) }),
                Box::new(StubEngine),
            ],
            test_config(),
        );

        let path = out_path(&dir, "ok.wav");
        let outcome = router.synthesize("hello", &path, None).await;
        assert_eq!(outcome.engine, "stub");
        assert!(!outcome.silent);
        assert_eq!(outcome.duration_secs, 2.5);
    }

    #[tokio::test]
    async fn test_preferred_engine_first() {
        let dir = tempfile::tempdir().unwrap();
        let router = SpeechRouter::with_engines(
            vec![
                Box::new(FailingEngine { calls: AtomicU32::new(0) }),
                Box::new(StubEngine),
            ],
            test_config(),
        );

        let path = out_path(&dir, "preferred.wav");
        let outcome = router.synthesize("hello", &path, Some("stub")).await;
        assert_eq!(outcome.engine, "stub");
        assert_eq!(outcome.retries, 0);
    }

    #[test]
    fn test_engine_status_always_lists_silent() {
        let router = SpeechRouter::with_engines(Vec::new(), test_config());
        let status = router.engine_status();
        assert_eq!(status.available_engines, vec!["silent".to_string()]);
        assert_eq!(status.total_engines, 1);
    }
}
