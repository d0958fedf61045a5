// Data model shared across pipeline stages
// Each artifact is produced once by its owning stage and read-only afterward

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One unit of source content: narration text plus a rasterized image.
/// Immutable after parsing; the deck parser is an external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlideRecord {
    /// 1-based position in the deck
    pub index: usize,
    pub title: String,
    pub narration_text: String,
    pub image_path: Option<PathBuf>,
}

impl SlideRecord {
    pub fn new(index: usize, title: impl Into<String>, narration_text: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            narration_text: narration_text.into(),
            image_path: None,
        }
    }

    pub fn with_image(mut self, image_path: impl Into<PathBuf>) -> Self {
        self.image_path = Some(image_path.into());
        self
    }
}

/// Per-slide narration audio artifact, produced by the speech router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationTrack {
    pub slide_index: usize,
    pub audio_path: PathBuf,
    /// Always > 0; silent tracks carry the estimated duration
    pub duration_secs: f64,
    pub file_size: u64,
    /// Tag of the engine that produced the audio
    pub engine: String,
    pub silent: bool,
    /// Duration was estimated from text length instead of probed
    pub estimated: bool,
    pub retries: u32,
    /// Offset of this track on the job timeline, seconds
    pub start_offset: f64,
    pub end_offset: f64,
}

/// Per-slide video clip artifact, produced by the clip renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoClip {
    pub slide_index: usize,
    pub video_path: PathBuf,
    /// Equals the slide's narration duration
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: u64,
    /// The source image was missing or undecodable and a generated
    /// placeholder frame was used instead
    pub placeholder: bool,
}

/// Assign contiguous timeline offsets to tracks ordered by slide index.
/// Start offsets are strictly monotonic and each track begins where the
/// previous one ends.
pub fn assign_offsets(tracks: &mut [NarrationTrack]) {
    tracks.sort_by_key(|t| t.slide_index);
    let mut cursor = 0.0;
    for track in tracks.iter_mut() {
        track.start_offset = cursor;
        track.end_offset = cursor + track.duration_secs;
        cursor = track.end_offset;
    }
}
