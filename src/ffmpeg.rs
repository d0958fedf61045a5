//! External media tool integration.
//!
//! Locates and version-gates ffmpeg/ffprobe, runs invocations with an
//! explicit per-call timeout, probes media durations and validates
//! produced outputs. Every assembly and render sub-stage goes through
//! [`run`], so timeouts and failures surface uniformly.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, anyhow};
use log::{debug, error, info, warn};
use regex::Regex;
use semver::Version;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use crate::errors::{PipelineError, Result};

/// Resolved paths of the external media tools
#[derive(Debug, Clone)]
pub struct MediaTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

/// Locate ffmpeg and ffprobe in PATH and log their version
pub fn locate_tools() -> Result<MediaTools> {
    let ffmpeg = which::which("ffmpeg")
        .map_err(|_| PipelineError::ExternalTool("ffmpeg not found in PATH".to_string()))?;
    let ffprobe = which::which("ffprobe")
        .map_err(|_| PipelineError::ExternalTool("ffprobe not found in PATH".to_string()))?;

    match check_ffmpeg_version(&ffmpeg) {
        Ok(version) => {
            if version < Version::new(4, 0, 0) {
                warn!("ffmpeg {} is older than 4.0, subtitle burn-in may misbehave", version);
            } else {
                info!("found ffmpeg {} at {}", version, ffmpeg.display());
            }
        }
        Err(e) => warn!("could not determine ffmpeg version: {}", e),
    }

    Ok(MediaTools { ffmpeg, ffprobe })
}

/// Check ffmpeg version
fn check_ffmpeg_version(path: &Path) -> anyhow::Result<Version> {
    let output = Command::new(path)
        .args(["-version"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("Failed to execute ffmpeg")?;

    if output.status.success() {
        let version_str = String::from_utf8_lossy(&output.stdout);
        let re = Regex::new(r"ffmpeg version (\d+)\.(\d+)(?:\.(\d+))?")?;
        if let Some(caps) = re.captures(&version_str) {
            let major = caps.get(1).map_or("0", |m| m.as_str()).parse::<u64>()?;
            let minor = caps.get(2).map_or("0", |m| m.as_str()).parse::<u64>()?;
            let patch = caps.get(3).map_or("0", |m| m.as_str()).parse::<u64>()?;
            debug!("parsed ffmpeg version: {}.{}.{}", major, minor, patch);
            return Ok(Version::new(major, minor, patch));
        }
    }
    Err(anyhow!("Failed to get ffmpeg version"))
}

/// Run one tool invocation with a deadline. A timeout kills the process
/// and is reported as [`PipelineError::Timeout`]; a non-zero exit carries
/// the stderr tail.
pub async fn run(tool: &Path, args: &[String], deadline: Duration, label: &str) -> Result<()> {
    debug!("{}: {} {}", label, tool.display(), args.join(" "));

    let mut cmd = TokioCommand::new(tool);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| PipelineError::ExternalTool(format!("failed to start {}: {}", label, e)))?;

    match timeout(deadline, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let tail = stderr_tail(&stderr);
                error!("{} failed with {}: {}", label, output.status, tail);
                Err(PipelineError::ExternalTool(format!(
                    "{} failed with {}: {}",
                    label, output.status, tail
                )))
            }
        }
        Ok(Err(e)) => Err(PipelineError::ExternalTool(format!(
            "error waiting for {}: {}",
            label, e
        ))),
        Err(_) => {
            error!("{} timed out after {:?}, killing process", label, deadline);
            Err(PipelineError::Timeout(label.to_string(), deadline))
        }
    }
}

/// Query a media file's container duration in seconds via ffprobe
pub async fn probe_duration(ffprobe: &Path, media: &Path) -> Result<f64> {
    let output = TokioCommand::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(media)
        .output()
        .await?;

    if !output.status.success() {
        return Err(PipelineError::ExternalTool(format!(
            "ffprobe failed for {}",
            media.display()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    text.trim().parse::<f64>().map_err(|_| {
        PipelineError::ExternalTool(format!(
            "unparseable ffprobe duration for {}: '{}'",
            media.display(),
            text.trim()
        ))
    })
}

/// Sub-stage success check: the output must exist and reach the minimum
/// size. Returns the file size.
pub fn validate_output(path: &Path, min_bytes: u64, label: &str) -> Result<u64> {
    let metadata = std::fs::metadata(path).map_err(|_| {
        PipelineError::ExternalTool(format!("{} produced no output at {}", label, path.display()))
    })?;
    let size = metadata.len();
    if size < min_bytes {
        return Err(PipelineError::ExternalTool(format!(
            "{} output {} is undersized ({} bytes, minimum {})",
            label,
            path.display(),
            size,
            min_bytes
        )));
    }
    Ok(size)
}

/// Escape a path for use inside a `subtitles=` filter argument
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Strip characters that break drawtext filter arguments; the text is
/// cosmetic (placeholder titles), so dropping them is acceptable
pub fn sanitize_drawtext(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\\' | '\'' | '"' | ':' | '%' | ';' | '[' | ']' => ' ',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Platform-appropriate font family for subtitle burn-in and placeholders
pub fn subtitle_font() -> &'static str {
    if cfg!(target_os = "windows") {
        "Microsoft YaHei"
    } else if cfg!(target_os = "macos") {
        "PingFang SC"
    } else {
        "Noto Sans CJK SC"
    }
}

fn stderr_tail(stderr: &str) -> String {
    const TAIL: usize = 800;
    let trimmed = stderr.trim();
    if trimmed.len() <= TAIL {
        trimmed.to_string()
    } else {
        let start = trimmed.len() - TAIL;
        let boundary = trimmed
            .char_indices()
            .map(|(i, _)| i)
            .find(|&i| i >= start)
            .unwrap_or(start);
        format!("...{}", &trimmed[boundary..])
    }
}
