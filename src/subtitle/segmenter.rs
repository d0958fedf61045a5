//! Text-to-cue segmentation and timing.
//!
//! Splitting: sentence-ending punctuation closes a unit; units are packed
//! greedily under the line limit; an oversized unit is split again on
//! clause punctuation and finally hard-wrapped by characters. No text is
//! ever discarded — concatenating the cue texts reproduces the stripped
//! source.
//!
//! Timing: a lone cue spans the whole slide clamped to the display
//! bounds; multiple cues share the slide duration proportionally to their
//! character counts, each clamped independently, then scaled back if the
//! clamps overran the slide span.

use crate::config::SubtitleConfig;

use super::{SubtitleCue, strip_markup};

pub struct Segmenter {
    config: SubtitleConfig,
}

impl Segmenter {
    pub fn new(config: SubtitleConfig) -> Self {
        Self { config }
    }

    /// Produce slide-local cues for narration `text` spoken over
    /// `duration_secs`
    pub fn segment(&self, text: &str, duration_secs: f64) -> Vec<SubtitleCue> {
        let clean = strip_markup(text);
        if clean.is_empty() {
            return Vec::new();
        }

        let units = split_units(&clean, &self.config.sentence_endings);
        let segments = self.pack_units(units);
        if segments.is_empty() {
            return Vec::new();
        }

        let times = self.allocate_times(&segments, duration_secs);
        segments
            .into_iter()
            .zip(times)
            .enumerate()
            .map(|(i, (text, (start_secs, end_secs)))| SubtitleCue {
                index: i + 1,
                start_secs,
                end_secs,
                text,
            })
            .collect()
    }

    /// Greedily pack units into segments under the line limit
    fn pack_units(&self, units: Vec<String>) -> Vec<String> {
        let limit = self.config.max_chars_per_line;
        let mut segments = Vec::new();
        let mut current = String::new();

        for unit in units {
            let unit = unit.trim().to_string();
            if unit.is_empty() {
                continue;
            }

            if char_count(&current) + char_count(&unit) <= limit {
                current.push_str(&unit);
                continue;
            }

            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }

            if char_count(&unit) <= limit {
                current = unit;
            } else {
                let mut pieces = self.split_long_unit(&unit);
                // the last piece stays open so following units can join it
                if let Some(last) = pieces.pop() {
                    segments.extend(pieces);
                    current = last;
                }
            }
        }

        if !current.trim().is_empty() {
            segments.push(current.trim().to_string());
        }
        segments
    }

    /// Split an oversized unit on clause punctuation, hard-wrapping any
    /// clause that is still too long
    fn split_long_unit(&self, unit: &str) -> Vec<String> {
        let limit = self.config.max_chars_per_line;
        let clauses = split_units(unit, &self.config.secondary_breaks);
        let mut pieces = Vec::new();
        let mut current = String::new();

        for clause in clauses {
            if char_count(&current) + char_count(&clause) <= limit {
                current.push_str(&clause);
                continue;
            }
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if char_count(&clause) <= limit {
                current = clause;
            } else {
                pieces.extend(self.hard_wrap(&clause));
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    /// Last resort: wrap on character boundaries
    fn hard_wrap(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.config.max_chars_per_line)
            .map(|chunk| chunk.iter().collect())
            .collect()
    }

    /// Slide-local (start, end) for each segment
    fn allocate_times(&self, segments: &[String], duration_secs: f64) -> Vec<(f64, f64)> {
        let min = self.config.min_display_time;
        let max = self.config.max_display_time;

        if segments.len() == 1 {
            return vec![(0.0, duration_secs.clamp(min, max))];
        }

        let weights: Vec<f64> = segments
            .iter()
            .map(|s| s.chars().filter(|c| !c.is_whitespace()).count().max(1) as f64)
            .collect();
        let total_weight: f64 = weights.iter().sum();

        let mut durations: Vec<f64> = weights
            .iter()
            .map(|w| (duration_secs * w / total_weight).clamp(min, max))
            .collect();

        // clamping can overrun the slide span; scale back so the last cue
        // ends exactly at the slide duration. An undershoot from the
        // max-display clamp is left as a trailing gap.
        let total: f64 = durations.iter().sum();
        let overran = total > duration_secs;
        if overran && total > 0.0 {
            let scale = duration_secs / total;
            for d in durations.iter_mut() {
                *d *= scale;
            }
        }

        let mut times = Vec::with_capacity(durations.len());
        let mut cursor = 0.0;
        for (i, d) in durations.iter().enumerate() {
            let start = cursor;
            let end = if overran && i == durations.len() - 1 {
                duration_secs
            } else {
                cursor + d
            };
            times.push((start, end));
            cursor = end;
        }
        times
    }
}

/// Split `text` into units, each closed by one of `breaks` (the break
/// character stays with its unit); the remainder forms a final unit.
fn split_units(text: &str, breaks: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if breaks.contains(c) {
            units.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        units.push(current);
    }
    units
}

fn char_count(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> Segmenter {
        Segmenter::new(SubtitleConfig::default())
    }

    fn squash(text: &str) -> String {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn test_short_text_single_cue() {
        let cues = segmenter().segment("这是一段简短的讲稿。", 5.0);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start_secs, 0.0);
        assert_eq!(cues[0].end_secs, 5.0);
        assert_eq!(cues[0].text, "这是一段简短的讲稿。");
    }

    #[test]
    fn test_single_cue_clamped_to_display_bounds() {
        let cues = segmenter().segment("很短。", 0.4);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].end_secs, 1.0); // min display time

        let cues = segmenter().segment("很长的停顿。", 30.0);
        assert_eq!(cues[0].end_secs, 8.0); // max display time
    }

    #[test]
    fn test_empty_text_yields_no_cues() {
        assert!(segmenter().segment("", 5.0).is_empty());
        assert!(segmenter().segment("  <p></p>  ", 5.0).is_empty());
    }

    #[test]
    fn test_packing_keeps_sentences_together() {
        // four 10-char sentences pack pairwise under the 40-char limit
        let text = "第一句讲了九个字。第二句讲了九个字。第三句讲了九个字。第四句讲了九个字。";
        let cues = segmenter().segment(text, 12.0);
        assert_eq!(cues.len(), 1);
        assert_eq!(squash(&cues.iter().map(|c| c.text.as_str()).collect::<String>()), squash(text));
    }

    #[test]
    fn test_hard_wrap_for_unbroken_text() {
        // 400 chars with no punctuation: ceil(400 / 40) = 10 cues
        let text = "字".repeat(400);
        let cues = segmenter().segment(&text, 120.0);
        assert_eq!(cues.len(), 10);
        for cue in &cues {
            assert!(cue.text.chars().count() <= 40);
        }
        assert_eq!(squash(&cues.iter().map(|c| c.text.as_str()).collect::<String>()), text);
    }

    #[test]
    fn test_long_sentence_splits_on_clause_marks() {
        // comma-separated clauses, 70 chars total, no sentence-ending mark
        let clause = "这个从句恰好有十三个字符长，".repeat(5);
        let cues = segmenter().segment(&clause, 20.0);
        assert!(cues.len() >= 2);
        for cue in &cues {
            assert!(cue.text.chars().count() <= 40);
        }
        assert_eq!(
            squash(&cues.iter().map(|c| c.text.as_str()).collect::<String>()),
            squash(&clause)
        );
    }

    #[test]
    fn test_lossless_mixed_text() {
        let text = "<b>Introduction.</b> Slides are parsed first, then narrated! \
                    字幕按句子切分。Finally, everything is merged; nothing is dropped?";
        let cues = segmenter().segment(text, 30.0);
        assert!(!cues.is_empty());
        assert_eq!(
            squash(&cues.iter().map(|c| c.text.as_str()).collect::<String>()),
            squash(&strip_markup(text))
        );
    }

    #[test]
    fn test_cues_ordered_non_overlapping_within_span() {
        let text = "第一句话在这里。第二句话也不短，内容稍微多一点。第三句话收尾。".repeat(3);
        let duration = 24.0;
        let cues = segmenter().segment(&text, duration);
        assert!(cues.len() > 1);

        for cue in &cues {
            assert!(cue.start_secs < cue.end_secs);
            assert!(cue.end_secs <= duration + 1e-9);
        }
        for pair in cues.windows(2) {
            assert!(pair[0].end_secs <= pair[1].start_secs + 1e-9);
            assert!(pair[0].index < pair[1].index);
        }
    }

    #[test]
    fn test_overrun_scales_back_to_span() {
        // 6 short sentences over 3 seconds: min-display clamping would
        // need 6s, so durations scale back and the last cue ends at 3.0
        let text = "短句一。短句二。短句三。短句四。短句五。短句六。";
        let config = SubtitleConfig {
            max_chars_per_line: 4,
            ..SubtitleConfig::default()
        };
        let cues = Segmenter::new(config).segment(text, 3.0);
        assert!(cues.len() > 1);
        let last = cues.last().unwrap();
        assert!((last.end_secs - 3.0).abs() < 1e-9);
        for cue in &cues {
            assert!(cue.start_secs < cue.end_secs);
        }
    }

    #[test]
    fn test_proportional_allocation() {
        // second sentence is ~3x the first: it should get the larger share
        let text = "短的一句。这一句明显要长得多因为包含了许多字符内容。";
        let config = SubtitleConfig {
            max_chars_per_line: 10,
            ..SubtitleConfig::default()
        };
        let cues = Segmenter::new(config).segment(text, 10.0);
        assert!(cues.len() >= 2);
        let first = cues[0].end_secs - cues[0].start_secs;
        let second = cues[1].end_secs - cues[1].start_secs;
        assert!(second > first);
    }
}
