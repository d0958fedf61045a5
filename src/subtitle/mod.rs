//! Subtitle generation.
//!
//! Cues are produced per slide with slide-local times, shifted onto the
//! job timeline using the narration track offsets, then concatenated and
//! renumbered into one combined SRT artifact.

use std::path::Path;

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod segmenter;

pub use segmenter::Segmenter;

use crate::errors::Result;

/// One subtitle entry. Within a slide cues are ordered and non-overlapping;
/// indices are 1-based and globally renumbered for the combined file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub index: usize,
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Remove markup tags, decode common entities and collapse whitespace
pub fn strip_markup(text: &str) -> String {
    let without_tags = TAG.replace_all(text, "");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    WHITESPACE.replace_all(decoded.trim(), " ").to_string()
}

/// Format seconds as an SRT timestamp (`HH:MM:SS,mmm`)
pub fn format_srt_time(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render cues as SRT text
pub fn cues_to_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for cue in cues {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            cue.index,
            format_srt_time(cue.start_secs),
            format_srt_time(cue.end_secs),
            cue.text
        ));
    }
    out
}

/// Write cues to an SRT file; an empty cue list yields an empty file
pub fn write_srt(cues: &[SubtitleCue], path: &Path) -> Result<()> {
    std::fs::write(path, cues_to_srt(cues))?;
    info!("wrote {} cues to {}", cues.len(), path.display());
    Ok(())
}

/// Shift cue times by `offset` seconds (slide-local → job timeline)
pub fn offset_cues(cues: &mut [SubtitleCue], offset: f64) {
    for cue in cues.iter_mut() {
        cue.start_secs += offset;
        cue.end_secs += offset;
    }
}

/// Renumber cues monotonically from 1
pub fn renumber(cues: &mut [SubtitleCue]) {
    for (i, cue) in cues.iter_mut().enumerate() {
        cue.index = i + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("<b>Hello</b> world"), "Hello world");
        assert_eq!(strip_markup("a &amp; b &lt;c&gt;"), "a & b <c>");
        assert_eq!(strip_markup("  spaced\n\nout\ttext  "), "spaced out text");
        assert_eq!(strip_markup("<p>第一段</p><p>第二段</p>"), "第一段第二段");
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(90.5), "00:01:30,500");
        assert_eq!(format_srt_time(3690.25), "01:01:30,250");
        // negative inputs clamp to zero rather than underflow
        assert_eq!(format_srt_time(-1.0), "00:00:00,000");
    }

    #[test]
    fn test_cues_to_srt_format() {
        let cues = vec![SubtitleCue {
            index: 1,
            start_secs: 0.0,
            end_secs: 2.5,
            text: "первая реплика".to_string(),
        }];
        let srt = cues_to_srt(&cues);
        assert_eq!(srt, "1\n00:00:00,000 --> 00:00:02,500\nпервая реплика\n\n");
    }

    #[test]
    fn test_offset_and_renumber() {
        let mut cues = vec![
            SubtitleCue {
                index: 1,
                start_secs: 0.0,
                end_secs: 1.0,
                text: "a".to_string(),
            },
            SubtitleCue {
                index: 2,
                start_secs: 1.0,
                end_secs: 2.0,
                text: "b".to_string(),
            },
        ];
        offset_cues(&mut cues, 10.0);
        assert_eq!(cues[0].start_secs, 10.0);
        assert_eq!(cues[1].end_secs, 12.0);

        cues[0].index = 7;
        cues[1].index = 9;
        renumber(&mut cues);
        assert_eq!(cues[0].index, 1);
        assert_eq!(cues[1].index, 2);
    }
}
