//! slidecast — turn a slide deck into a narrated video.
//!
//! A fixed five-stage batch pipeline: parse slides, synthesize per-slide
//! narration, render per-slide clips sized to narration length, generate
//! time-aligned subtitles, and assemble everything into one final video
//! through the external media tool.
//!
//! The speech router falls through configured engines and always
//! succeeds (worst case: a silent track); a bad slide image becomes a
//! placeholder clip; per-slide failures never halt a job — only final
//! assembly can fail it. Execution state is tracked in a durable task
//! ledger, one row per (stage, slide), for inspection and selective
//! re-execution.

pub mod assembly;
pub mod config;
pub mod errors;
pub mod ffmpeg;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod subtitle;
pub mod tts;
pub mod video;
pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;

pub use assembly::{AssemblyOutput, MediaAssembler};
pub use config::PipelineConfig;
pub use errors::{PipelineError, Result};
pub use ledger::{Stage, StageSummary, Task, TaskLedger, TaskStatus};
pub use models::{NarrationTrack, SlideRecord, VideoClip};
pub use pipeline::{
    JobOutcome, JobReport, JobStatus, JobStore, Orchestrator, ProgressUpdate,
};
pub use subtitle::{Segmenter, SubtitleCue};
pub use tts::{SpeechRouter, SynthesisOutcome};
pub use video::ClipRenderer;
pub use workspace::JobWorkspace;

/// Run the whole pipeline for one deck with an ephemeral job store
pub async fn render_deck(
    slides: Vec<SlideRecord>,
    workspace_root: impl Into<PathBuf>,
    config: PipelineConfig,
) -> Result<JobReport> {
    let store = Arc::new(JobStore::new());
    let orchestrator = Orchestrator::new(config, store);
    orchestrator.run_job(slides, workspace_root, None).await
}

/// Same as [`render_deck`] with a progress event channel attached
pub async fn render_deck_with_progress(
    slides: Vec<SlideRecord>,
    workspace_root: impl Into<PathBuf>,
    config: PipelineConfig,
    progress: tokio::sync::mpsc::Sender<ProgressUpdate>,
) -> Result<JobReport> {
    let store = Arc::new(JobStore::new());
    let orchestrator = Orchestrator::new(config, store);
    orchestrator
        .run_job(slides, workspace_root, Some(progress))
        .await
}
