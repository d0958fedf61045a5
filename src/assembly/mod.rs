//! Final media assembly.
//!
//! Four ffmpeg sub-stages in fixed order — video concat, audio concat,
//! mux, optional subtitle burn-in — each a separate invocation with its
//! own timeout and success check (exit 0, output exists, minimum size).
//! Burn-in failure falls back to the subtitle-free mux; any other failure
//! is fatal for the job. Intermediates are deleted only after the final
//! output validates, so a failed run leaves them behind for diagnosis.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::AssemblyConfig;
use crate::errors::{PipelineError, Result};
use crate::ffmpeg::{self, MediaTools};
use crate::models::{NarrationTrack, VideoClip};

/// Final artifact description returned on success
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyOutput {
    pub output_path: PathBuf,
    pub file_size: u64,
    pub duration_secs: f64,
    pub subtitles_burned: bool,
    pub warnings: Vec<String>,
}

pub struct MediaAssembler {
    config: AssemblyConfig,
    tools: MediaTools,
    temp_dir: PathBuf,
}

impl MediaAssembler {
    pub fn new(config: AssemblyConfig, tools: MediaTools, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            tools,
            temp_dir: temp_dir.into(),
        }
    }

    /// Merge per-slide clips and narration into one video, optionally
    /// burning in the combined subtitles
    pub async fn assemble(
        &self,
        clips: &[VideoClip],
        tracks: &[NarrationTrack],
        subtitles: Option<&Path>,
        output_path: &Path,
    ) -> Result<AssemblyOutput> {
        if clips.is_empty() {
            return Err(PipelineError::ExternalTool(
                "video concat failed: no clips to assemble".to_string(),
            ));
        }

        // every declared input must be on disk before any tool runs, so a
        // missing artifact is reported with its slide instead of as an
        // opaque ffmpeg exit code
        for clip in clips {
            if !clip.video_path.exists() {
                return Err(PipelineError::ExternalTool(format!(
                    "video concat failed: clip for slide {} missing at {}",
                    clip.slide_index,
                    clip.video_path.display()
                )));
            }
        }
        for track in tracks {
            if !track.audio_path.exists() {
                return Err(PipelineError::ExternalTool(format!(
                    "audio concat failed: narration for slide {} missing at {}",
                    track.slide_index,
                    track.audio_path.display()
                )));
            }
        }

        let mut warnings = Vec::new();

        // 1. video concat (stream copy, codecs already match)
        let video_manifest = self.temp_dir.join("video_concat_list.txt");
        let concat_video = self.temp_dir.join("concat_video.mp4");
        write_concat_manifest(&video_manifest, clips.iter().map(|c| c.video_path.as_path()))?;
        self.run_concat(&video_manifest, &concat_video, self.config.video_concat_timeout_secs, "video concat")
            .await?;

        // 2. audio concat
        let audio_manifest = self.temp_dir.join("audio_concat_list.txt");
        let concat_audio = self.temp_dir.join("concat_audio.wav");
        write_concat_manifest(&audio_manifest, tracks.iter().map(|t| t.audio_path.as_path()))?;
        self.run_concat(&audio_manifest, &concat_audio, self.config.audio_concat_timeout_secs, "audio concat")
            .await?;

        // 3. mux clamps to the shorter stream, so surface drift instead of
        // letting it truncate silently
        let video_duration = ffmpeg::probe_duration(&self.tools.ffprobe, &concat_video).await?;
        let audio_duration = ffmpeg::probe_duration(&self.tools.ffprobe, &concat_audio).await?;
        let drift = (video_duration - audio_duration).abs();
        if drift > self.config.drift_epsilon_secs {
            let message = format!(
                "concatenated video ({:.2}s) and audio ({:.2}s) durations differ by {:.2}s; output is clamped to the shorter stream",
                video_duration, audio_duration, drift
            );
            warn!("{}", message);
            warnings.push(message);
        }

        let muxed = self.temp_dir.join("merged_av.mp4");
        self.run_mux(&concat_video, &concat_audio, &muxed).await?;

        // 4. subtitle burn-in, falling back to the plain mux on failure
        let mut subtitles_burned = false;
        match subtitles {
            Some(subs) if has_content(subs) => {
                match self.run_burn_in(&muxed, subs, output_path).await {
                    Ok(()) => subtitles_burned = true,
                    Err(e) => {
                        let message =
                            format!("subtitle burn-in failed, delivering subtitle-free output: {}", e);
                        warn!("{}", message);
                        warnings.push(message);
                        tokio::fs::copy(&muxed, output_path).await?;
                    }
                }
            }
            _ => {
                tokio::fs::copy(&muxed, output_path).await?;
            }
        }

        let file_size =
            ffmpeg::validate_output(output_path, self.config.min_output_bytes, "final output")?;
        let duration_secs = ffmpeg::probe_duration(&self.tools.ffprobe, output_path)
            .await
            .unwrap_or_else(|_| video_duration.min(audio_duration));

        // final output is validated, intermediates are no longer needed
        for temp in [&video_manifest, &audio_manifest, &concat_video, &concat_audio, &muxed] {
            let _ = std::fs::remove_file(temp);
        }

        info!(
            "assembly complete: {} ({} bytes, {:.2}s, subtitles {})",
            output_path.display(),
            file_size,
            duration_secs,
            if subtitles_burned { "burned in" } else { "omitted" }
        );

        Ok(AssemblyOutput {
            output_path: output_path.to_path_buf(),
            file_size,
            duration_secs,
            subtitles_burned,
            warnings,
        })
    }

    async fn run_concat(
        &self,
        manifest: &Path,
        output: &Path,
        timeout_secs: u64,
        label: &str,
    ) -> Result<()> {
        let args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            manifest.to_string_lossy().to_string(),
            "-c".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ];
        ffmpeg::run(&self.tools.ffmpeg, &args, Duration::from_secs(timeout_secs), label).await?;
        ffmpeg::validate_output(output, self.config.min_output_bytes, label)?;
        Ok(())
    }

    async fn run_mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-i".to_string(),
            audio.to_string_lossy().to_string(),
            "-c:v".to_string(),
            self.config.video_codec.clone(),
            "-c:a".to_string(),
            self.config.audio_codec.clone(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-b:v".to_string(),
            self.config.video_bitrate.clone(),
            "-preset".to_string(),
            self.config.preset.clone(),
            "-crf".to_string(),
            self.config.crf.clone(),
            "-pix_fmt".to_string(),
            self.config.pixel_format.clone(),
            "-movflags".to_string(),
            self.config.movflags.clone(),
            "-shortest".to_string(),
            output.to_string_lossy().to_string(),
        ];
        ffmpeg::run(&self.tools.ffmpeg, &args, Duration::from_secs(self.config.mux_timeout_secs), "mux")
            .await?;
        ffmpeg::validate_output(output, self.config.min_output_bytes, "mux")?;
        Ok(())
    }

    async fn run_burn_in(&self, video: &Path, subtitles: &Path, output: &Path) -> Result<()> {
        let filter = format!(
            "subtitles={}:force_style='FontName={}'",
            ffmpeg::escape_filter_path(subtitles),
            ffmpeg::subtitle_font()
        );
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-vf".to_string(),
            filter,
            "-c:a".to_string(),
            "copy".to_string(),
            output.to_string_lossy().to_string(),
        ];
        ffmpeg::run(
            &self.tools.ffmpeg,
            &args,
            Duration::from_secs(self.config.burn_in_timeout_secs),
            "subtitle burn-in",
        )
        .await?;
        ffmpeg::validate_output(output, self.config.min_output_bytes, "subtitle burn-in")?;
        Ok(())
    }
}

/// Write an ffmpeg concat demuxer manifest, one `file '...'` line per input
fn write_concat_manifest<'a>(
    path: &Path,
    files: impl Iterator<Item = &'a Path>,
) -> Result<()> {
    let mut contents = String::new();
    for file in files {
        contents.push_str(&format!("file '{}'\n", escape_concat_path(file)));
    }
    std::fs::write(path, contents)?;
    Ok(())
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

fn has_content(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler(temp_dir: &Path) -> MediaAssembler {
        MediaAssembler::new(
            AssemblyConfig::default(),
            MediaTools {
                ffmpeg: PathBuf::from("ffmpeg"),
                ffprobe: PathBuf::from("ffprobe"),
            },
            temp_dir,
        )
    }

    fn clip(dir: &Path, slide_index: usize, create: bool) -> VideoClip {
        let video_path = dir.join(format!("clip_{:03}.mp4", slide_index));
        if create {
            std::fs::write(&video_path, vec![0u8; 16 * 1024]).unwrap();
        }
        VideoClip {
            slide_index,
            video_path,
            duration_secs: 3.0,
            width: 1920,
            height: 1080,
            fps: 24,
            frame_count: 72,
            placeholder: false,
        }
    }

    fn track(dir: &Path, slide_index: usize, create: bool) -> NarrationTrack {
        let audio_path = dir.join(format!("narration_{:03}.wav", slide_index));
        if create {
            std::fs::write(&audio_path, vec![0u8; 16 * 1024]).unwrap();
        }
        NarrationTrack {
            slide_index,
            audio_path,
            duration_secs: 3.0,
            file_size: 16 * 1024,
            engine: "openai".to_string(),
            silent: false,
            estimated: false,
            retries: 0,
            start_offset: 0.0,
            end_offset: 3.0,
        }
    }

    #[test]
    fn test_concat_manifest_escaping() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("list.txt");
        let inputs = [
            PathBuf::from("/job/clips/clip_001.mp4"),
            PathBuf::from("/job/it's here/clip_002.mp4"),
        ];
        write_concat_manifest(&manifest, inputs.iter().map(|p| p.as_path())).unwrap();

        let contents = std::fs::read_to_string(&manifest).unwrap();
        assert_eq!(
            contents,
            "file '/job/clips/clip_001.mp4'\nfile '/job/it'\\''s here/clip_002.mp4'\n"
        );
    }

    #[tokio::test]
    async fn test_missing_narration_names_the_slide() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = assembler(dir.path());

        let clips = vec![clip(dir.path(), 1, true), clip(dir.path(), 2, true)];
        // slide 2's narration never materialized
        let tracks = vec![track(dir.path(), 1, true), track(dir.path(), 2, false)];

        let err = assembler
            .assemble(&clips, &tracks, None, &dir.path().join("final.mp4"))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("audio concat"));
        assert!(message.contains("slide 2"));
    }

    #[tokio::test]
    async fn test_missing_clip_names_the_slide() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = assembler(dir.path());

        let clips = vec![clip(dir.path(), 1, false)];
        let tracks = vec![track(dir.path(), 1, true)];

        let err = assembler
            .assemble(&clips, &tracks, None, &dir.path().join("final.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("slide 1"));
    }

    #[tokio::test]
    async fn test_empty_clip_list_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = assembler(dir.path());
        let err = assembler
            .assemble(&[], &[], None, &dir.path().join("final.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no clips"));
    }

    #[test]
    fn test_has_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("combined.srt");
        assert!(!has_content(&path));
        std::fs::write(&path, "").unwrap();
        assert!(!has_content(&path));
        std::fs::write(&path, "1\n00:00:00,000 --> 00:00:02,000\nhi\n\n").unwrap();
        assert!(has_content(&path));
    }
}
