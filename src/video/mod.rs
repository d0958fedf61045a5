//! Per-slide clip rendering.
//!
//! A still image is looped into a clip with exactly `duration × fps`
//! frames at the configured resolution. A missing or undecodable image is
//! replaced by a generated placeholder frame (slide number and title over
//! a flat background) so a bad asset never blocks the pipeline.

use std::path::Path;
use std::time::Duration;

use log::{info, warn};

use crate::config::VideoConfig;
use crate::errors::{PipelineError, Result};
use crate::ffmpeg::{self, MediaTools};
use crate::models::{SlideRecord, VideoClip};

pub struct ClipRenderer {
    config: VideoConfig,
    tools: MediaTools,
}

impl ClipRenderer {
    pub fn new(config: VideoConfig, tools: MediaTools) -> Self {
        Self { config, tools }
    }

    /// Frames in a clip of the given duration; identical inputs always
    /// yield the identical count
    pub fn frame_count(&self, duration_secs: f64) -> u64 {
        ((duration_secs * self.config.fps as f64).round() as u64).max(1)
    }

    /// Render the clip for `slide`, sized to its narration duration
    pub async fn render(
        &self,
        slide: &SlideRecord,
        duration_secs: f64,
        output_path: &Path,
    ) -> Result<VideoClip> {
        let frames = self.frame_count(duration_secs);
        let deadline = Duration::from_secs(self.config.render_timeout_secs);
        let label = format!("clip render (slide {})", slide.index);

        let mut placeholder = false;
        match &slide.image_path {
            Some(image) if image.exists() => {
                let args = self.image_args(image, frames, duration_secs, output_path);
                if let Err(e) = ffmpeg::run(&self.tools.ffmpeg, &args, deadline, &label).await {
                    warn!(
                        "slide {} image failed to render ({}), substituting placeholder",
                        slide.index, e
                    );
                    placeholder = true;
                }
            }
            Some(image) => {
                warn!(
                    "slide {} image missing at {}, substituting placeholder",
                    slide.index,
                    image.display()
                );
                placeholder = true;
            }
            None => placeholder = true,
        }

        if placeholder {
            let args = self.placeholder_args(slide, frames, duration_secs, output_path);
            ffmpeg::run(&self.tools.ffmpeg, &args, deadline, &label)
                .await
                .map_err(|e| {
                    PipelineError::Render(format!(
                        "placeholder render for slide {} failed: {}",
                        slide.index, e
                    ))
                })?;
        }

        ffmpeg::validate_output(output_path, 1, &label)?;
        info!(
            "rendered clip for slide {}: {:.2}s, {} frames{}",
            slide.index,
            duration_secs,
            frames,
            if placeholder { " (placeholder)" } else { "" }
        );

        Ok(VideoClip {
            slide_index: slide.index,
            video_path: output_path.to_path_buf(),
            duration_secs,
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            frame_count: frames,
            placeholder,
        })
    }

    fn image_args(
        &self,
        image: &Path,
        frames: u64,
        duration_secs: f64,
        output: &Path,
    ) -> Vec<String> {
        let mut filters = vec![format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = self.config.width,
            h = self.config.height
        )];
        filters.extend(self.overlay_filter(duration_secs));

        let mut args = vec![
            "-y".to_string(),
            "-loop".to_string(),
            "1".to_string(),
            "-framerate".to_string(),
            self.config.fps.to_string(),
            "-i".to_string(),
            image.to_string_lossy().to_string(),
            "-frames:v".to_string(),
            frames.to_string(),
            "-vf".to_string(),
            filters.join(","),
        ];
        args.extend(self.encode_args());
        args.push(output.to_string_lossy().to_string());
        args
    }

    fn placeholder_args(
        &self,
        slide: &SlideRecord,
        frames: u64,
        duration_secs: f64,
        output: &Path,
    ) -> Vec<String> {
        let mut filters = vec![format!(
            "drawtext=font={font}:text=Slide {index}:fontsize=96:fontcolor=0x646464:x=(w-text_w)/2:y=h*0.38",
            font = ffmpeg::subtitle_font(),
            index = slide.index
        )];
        let title = ffmpeg::sanitize_drawtext(&slide.title);
        if !title.is_empty() {
            filters.push(format!(
                "drawtext=font={font}:text={title}:fontsize=48:fontcolor=0x323232:x=(w-text_w)/2:y=h*0.52",
                font = ffmpeg::subtitle_font(),
                title = title
            ));
        }
        filters.extend(self.overlay_filter(duration_secs));

        let mut args = vec![
            "-y".to_string(),
            "-f".to_string(),
            "lavfi".to_string(),
            "-i".to_string(),
            format!(
                "color=c=0xF5F5F5:s={}x{}:r={}",
                self.config.width, self.config.height, self.config.fps
            ),
            "-frames:v".to_string(),
            frames.to_string(),
            "-vf".to_string(),
            filters.join(","),
        ];
        args.extend(self.encode_args());
        args.push(output.to_string_lossy().to_string());
        args
    }

    /// Animated progress bar along the bottom edge; only for clips longer
    /// than one second, and only a presentation overlay
    fn overlay_filter(&self, duration_secs: f64) -> Option<String> {
        if !self.config.progress_overlay || duration_secs <= 1.0 {
            return None;
        }
        let bar_width = self.config.width.saturating_sub(200);
        let bar_y = self.config.height.saturating_sub(50);
        Some(format!(
            "drawbox=x=100:y={y}:w={w}:h=8:color=gray@0.5:t=fill,\
             drawbox=x=100:y={y}:w={w}*t/{dur:.3}:h=8:color=green@0.8:t=fill",
            y = bar_y,
            w = bar_width,
            dur = duration_secs
        ))
    }

    fn encode_args(&self) -> Vec<String> {
        vec![
            "-r".to_string(),
            self.config.fps.to_string(),
            "-c:v".to_string(),
            self.config.video_codec.clone(),
            "-preset".to_string(),
            self.config.preset.clone(),
            "-crf".to_string(),
            self.config.crf.clone(),
            "-pix_fmt".to_string(),
            self.config.pixel_format.clone(),
            "-an".to_string(),
        ]
    }
}
