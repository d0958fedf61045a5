//! Per-job directory layout and stage metadata persistence.
//!
//! Every job owns one workspace directory with fixed subdirectories for
//! stage outputs, a `temp/` area for assembly intermediates and one JSON
//! metadata file per completed stage for crash inspection.

use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::Result;
use crate::ledger::Stage;

#[derive(Debug, Clone)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    /// Create the workspace directory structure under `root`
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let workspace = Self { root: root.into() };
        for dir in [
            workspace.root.clone(),
            workspace.audio_dir(),
            workspace.clips_dir(),
            workspace.subtitles_dir(),
            workspace.final_dir(),
            workspace.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        debug!("workspace ready at {}", workspace.root.display());
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn clips_dir(&self) -> PathBuf {
        self.root.join("clips")
    }

    pub fn subtitles_dir(&self) -> PathBuf {
        self.root.join("subtitles")
    }

    pub fn final_dir(&self) -> PathBuf {
        self.root.join("final")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn narration_path(&self, slide_index: usize) -> PathBuf {
        self.audio_dir().join(format!("narration_{:03}.wav", slide_index))
    }

    pub fn clip_path(&self, slide_index: usize) -> PathBuf {
        self.clips_dir().join(format!("clip_{:03}.mp4", slide_index))
    }

    pub fn subtitle_path(&self, slide_index: usize) -> PathBuf {
        self.subtitles_dir().join(format!("subtitle_{:03}.srt", slide_index))
    }

    pub fn combined_subtitle_path(&self) -> PathBuf {
        self.subtitles_dir().join("combined.srt")
    }

    pub fn final_output_path(&self) -> PathBuf {
        self.final_dir().join("final_video.mp4")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join("tasks.json")
    }

    pub fn stage_metadata_path(&self, stage: Stage) -> PathBuf {
        self.root.join(format!("{}_metadata.json", stage.as_str()))
    }

    /// Persist a stage metadata document as pretty-printed JSON
    pub fn save_stage_metadata<T: Serialize>(&self, stage: Stage, metadata: &T) -> Result<()> {
        let path = self.stage_metadata_path(stage);
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(&path, json)?;
        debug!("saved {} metadata to {}", stage.as_str(), path.display());
        Ok(())
    }

    pub fn load_stage_metadata<T: DeserializeOwned>(&self, stage: Stage) -> Result<T> {
        let contents = std::fs::read_to_string(self.stage_metadata_path(stage))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_directory_structure() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = JobWorkspace::create(dir.path().join("job-1")).unwrap();

        assert!(workspace.audio_dir().is_dir());
        assert!(workspace.clips_dir().is_dir());
        assert!(workspace.subtitles_dir().is_dir());
        assert!(workspace.final_dir().is_dir());
        assert!(workspace.temp_dir().is_dir());
    }

    #[test]
    fn test_artifact_paths() {
        let workspace = JobWorkspace {
            root: PathBuf::from("/tmp/job"),
        };
        assert_eq!(
            workspace.narration_path(3),
            PathBuf::from("/tmp/job/audio/narration_003.wav")
        );
        assert_eq!(
            workspace.clip_path(12),
            PathBuf::from("/tmp/job/clips/clip_012.mp4")
        );
        assert_eq!(
            workspace.subtitle_path(1),
            PathBuf::from("/tmp/job/subtitles/subtitle_001.srt")
        );
    }

    #[test]
    fn test_stage_metadata_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = JobWorkspace::create(dir.path().join("job-2")).unwrap();

        let metadata = serde_json::json!({"total_tracks": 4, "total_duration_secs": 21.5});
        workspace
            .save_stage_metadata(Stage::Narration, &metadata)
            .unwrap();

        let loaded: serde_json::Value = workspace.load_stage_metadata(Stage::Narration).unwrap();
        assert_eq!(loaded["total_tracks"], 4);
    }
}
