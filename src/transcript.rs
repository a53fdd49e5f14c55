//! Timed text units and the normalization that turns raw transcription
//! output into an ordered, non-overlapping, length-bounded sequence.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::quality::{QualityReport, QualityWarning};
use crate::timing::TimeWindow;

/// A transcribed fragment with its window inside the segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedTextUnit {
    pub text: String,
    pub window: TimeWindow,
    pub source_language: String,
    /// Word timings inside the unit, when the transcriber provides them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<TimedWord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Ordered transcript of one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub source_language: String,
    pub units: Vec<TimedTextUnit>,
}

/// Translation of exactly one timed unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedUnit {
    pub source: TimedTextUnit,
    pub text: String,
    pub target_language: String,
}

impl TranslatedUnit {
    pub fn window(&self) -> TimeWindow {
        self.source.window
    }

    pub fn target_duration(&self) -> f64 {
        self.source.window.duration()
    }
}

/// Ordered translation of one segment, index-aligned with its transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub source_language: String,
    pub target_language: String,
    pub units: Vec<TranslatedUnit>,
}

/// Transcription collaborator output before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTranscript {
    pub language: Option<String>,
    pub segments: Vec<RawSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<TimedWord>,
}

const SENTENCE_BREAKS: &[char] = &['.', '!', '?', '\u{3002}', '\u{FF01}', '\u{FF1F}', '\u{2026}', '\u{0964}'];
const CLAUSE_BREAKS: &[char] = &[',', ';', ':', '\u{FF0C}', '\u{3001}', '\u{FF1B}', '\u{FF1A}'];

/// Re-segments raw transcription output for a segment of known duration
#[derive(Debug, Clone)]
pub struct TranscriptNormalizer {
    pub max_chars: usize,
    pub merge_gap: f64,
}

impl TranscriptNormalizer {
    pub fn new(max_chars: usize, merge_gap: f64) -> Self {
        Self { max_chars: max_chars.max(1), merge_gap }
    }

    pub fn normalize(
        &self,
        raw: RawTranscript,
        segment_duration: f64,
        source_language: &str,
        report: &mut QualityReport,
    ) -> Vec<TimedTextUnit> {
        let Ok(bounds) = TimeWindow::new(0.0, segment_duration) else {
            return Vec::new();
        };

        let mut units: Vec<TimedTextUnit> = raw
            .segments
            .into_iter()
            .filter_map(|seg| self.clip_segment(seg, &bounds, source_language))
            .collect();

        units.sort_by(|a, b| a.window.start().total_cmp(&b.window.start()));

        let units = self.resolve_overlaps(units, report);
        let units = self.merge_nearby(units);
        let units: Vec<TimedTextUnit> = units
            .into_iter()
            .flat_map(|unit| self.split_long(unit))
            .collect();
        debug_assert!(is_well_formed(&units, segment_duration));

        debug!("Normalized transcript into {} units", units.len());
        units
    }

    fn clip_segment(
        &self,
        seg: RawSegment,
        bounds: &TimeWindow,
        language: &str,
    ) -> Option<TimedTextUnit> {
        let text = seg.text.trim().to_string();
        if text.is_empty() {
            return None;
        }
        let window = match TimeWindow::new(seg.start, seg.end) {
            Ok(w) => w.relative_to(bounds)?,
            Err(_) => {
                debug!("Dropping zero-length segment at {:.3}s: {}", seg.start, text);
                return None;
            }
        };
        let words = seg
            .words
            .into_iter()
            .filter(|w| w.end > window.start() && w.start < window.end())
            .map(|w| TimedWord {
                word: w.word,
                start: w.start.max(window.start()),
                end: w.end.min(window.end()),
            })
            .collect();
        Some(TimedTextUnit {
            text,
            window,
            source_language: language.to_string(),
            words,
        })
    }

    fn resolve_overlaps(
        &self,
        units: Vec<TimedTextUnit>,
        report: &mut QualityReport,
    ) -> Vec<TimedTextUnit> {
        let mut out: Vec<TimedTextUnit> = Vec::with_capacity(units.len());
        for mut unit in units {
            let index = out.len();
            let Some(prev) = out.last_mut() else {
                out.push(unit);
                continue;
            };
            let overlap = prev.window.end() - unit.window.start();
            if overlap <= 0.0 {
                out.push(unit);
                continue;
            }
            report.push(QualityWarning::TimingConflict { index, overlap });
            match TimeWindow::new(prev.window.end(), unit.window.end()) {
                Ok(window) => {
                    unit.window = window;
                    unit.words.retain(|w| w.end > window.start());
                    out.push(unit);
                }
                // Fully covered by its predecessor: keep the words, drop the window
                Err(_) => {
                    prev.text = format!("{} {}", prev.text, unit.text);
                    prev.words.extend(unit.words);
                }
            }
        }
        out
    }

    fn merge_nearby(&self, units: Vec<TimedTextUnit>) -> Vec<TimedTextUnit> {
        let mut out: Vec<TimedTextUnit> = Vec::with_capacity(units.len());
        for unit in units {
            if let Some(prev) = out.last_mut() {
                let gap = unit.window.start() - prev.window.end();
                let merged_len = char_len(&prev.text) + 1 + char_len(&unit.text);
                if gap <= self.merge_gap && merged_len <= self.max_chars {
                    if let Ok(window) = TimeWindow::new(prev.window.start(), unit.window.end()) {
                        prev.text = format!("{} {}", prev.text, unit.text);
                        prev.window = window;
                        prev.words.extend(unit.words);
                        continue;
                    }
                }
            }
            out.push(unit);
        }
        out
    }

    fn split_long(&self, unit: TimedTextUnit) -> Vec<TimedTextUnit> {
        if char_len(&unit.text) <= self.max_chars {
            return vec![unit];
        }
        let chunks = split_text(&unit.text, self.max_chars);
        if chunks.len() < 2 {
            return vec![unit];
        }

        let boundaries = self.chunk_boundaries(&unit, &chunks);
        let mut out = Vec::with_capacity(chunks.len());
        for (i, text) in chunks.into_iter().enumerate() {
            let (start, end) = (boundaries[i], boundaries[i + 1]);
            let Ok(window) = TimeWindow::new(start, end) else {
                continue;
            };
            let words = unit
                .words
                .iter()
                .filter(|w| {
                    let mid = (w.start + w.end) / 2.0;
                    mid >= start && mid < end
                })
                .cloned()
                .collect();
            out.push(TimedTextUnit {
                text,
                window,
                source_language: unit.source_language.clone(),
                words,
            });
        }
        out
    }

    /// Split times for `chunks`: proportional to character count, snapped to
    /// the nearest silence between words when word timings exist.
    fn chunk_boundaries(&self, unit: &TimedTextUnit, chunks: &[String]) -> Vec<f64> {
        let start = unit.window.start();
        let end = unit.window.end();
        let total: usize = chunks.iter().map(|c| char_len(c)).sum();
        let total = total.max(1) as f64;

        let gaps: Vec<f64> = unit
            .words
            .windows(2)
            .map(|pair| (pair[0].end + pair[1].start) / 2.0)
            .collect();

        let mut boundaries = vec![start];
        let mut consumed = 0usize;
        for chunk in &chunks[..chunks.len() - 1] {
            consumed += char_len(chunk);
            let proportional = start + (end - start) * consumed as f64 / total;
            let prev = *boundaries.last().unwrap_or(&start);
            let snapped = gaps
                .iter()
                .copied()
                .filter(|t| *t > prev && *t < end)
                .min_by(|a, b| (a - proportional).abs().total_cmp(&(b - proportional).abs()));
            let boundary = match snapped {
                Some(t) => t,
                None if proportional > prev => proportional,
                None => prev + (end - prev) / 2.0,
            };
            boundaries.push(boundary);
        }
        boundaries.push(end);
        boundaries
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` into chunks of at most `max_chars`, preferring sentence
/// ends, then clause punctuation, then whitespace.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    for breaks in [SENTENCE_BREAKS, CLAUSE_BREAKS] {
        let pieces = split_after(text, breaks);
        if pieces.len() > 1 {
            let pieces = pieces
                .iter()
                .flat_map(|p| split_text(p, max_chars))
                .collect();
            return pack(pieces, max_chars);
        }
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > 1 {
        let pieces = words
            .into_iter()
            .flat_map(|w| split_text(w, max_chars))
            .collect();
        return pack(pieces, max_chars);
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

fn split_after(text: &str, breaks: &[char]) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
        if breaks.contains(&c) && at_boundary {
            let piece = current.trim();
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }
    pieces
}

fn pack(pieces: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        if current.is_empty() {
            current = piece;
        } else if char_len(&current) + 1 + char_len(&piece) <= max_chars {
            current.push(' ');
            current.push_str(&piece);
        } else {
            out.push(std::mem::take(&mut current));
            current = piece;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// True when units are ordered, non-overlapping and inside the segment.
fn is_well_formed(units: &[TimedTextUnit], segment_duration: f64) -> bool {
    units.windows(2).all(|pair| pair[0].window.end() <= pair[1].window.start())
        && units.iter().all(|u| u.window.end() <= segment_duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> RawSegment {
        RawSegment { start, end, text: text.to_string(), words: vec![] }
    }

    fn normalize(raw: Vec<RawSegment>, duration: f64, max: usize) -> (Vec<TimedTextUnit>, QualityReport) {
        let mut report = QualityReport::new();
        let units = TranscriptNormalizer::new(max, 1.0).normalize(
            RawTranscript { language: Some("en".into()), segments: raw },
            duration,
            "en",
            &mut report,
        );
        (units, report)
    }

    #[test]
    fn test_empty_transcript_is_valid() {
        let (units, report) = normalize(vec![], 15.0, 100);
        assert!(units.is_empty());
        assert!(report.is_empty());
    }

    #[test]
    fn test_blank_segments_are_dropped() {
        let (units, _) = normalize(vec![seg(0.0, 2.0, "   "), seg(3.0, 4.0, "")], 15.0, 100);
        assert!(units.is_empty());
    }

    #[test]
    fn test_merges_fragments_within_gap() {
        let (units, _) = normalize(
            vec![seg(0.0, 2.0, "Hello"), seg(2.5, 4.0, "world."), seg(7.0, 9.0, "Again.")],
            15.0,
            100,
        );
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text, "Hello world.");
        assert_eq!(units[0].window, TimeWindow::new(0.0, 4.0).unwrap());
        assert_eq!(units[1].text, "Again.");
    }

    #[test]
    fn test_merge_respects_max_chars() {
        let (units, _) = normalize(vec![seg(0.0, 2.0, "aaaa"), seg(2.1, 4.0, "bbbb")], 15.0, 6);
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn test_overlap_is_clamped_and_reported() {
        let (units, report) = normalize(vec![seg(0.0, 3.0, "One."), seg(2.0, 5.0, "Two.")], 15.0, 5);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].window.start(), 3.0);
        assert_eq!(report.timing_conflicts(), 1);
        assert!(is_well_formed(&units, 15.0));
    }

    #[test]
    fn test_units_clipped_to_segment() {
        let (units, _) = normalize(vec![seg(12.0, 18.0, "tail")], 15.0, 100);
        assert_eq!(units[0].window.end(), 15.0);
        let (units, _) = normalize(vec![seg(16.0, 18.0, "outside")], 15.0, 100);
        assert!(units.is_empty());
    }

    #[test]
    fn test_long_unit_is_split_at_sentences() {
        let text = "The first sentence is here. The second one follows it. And a third.";
        let (units, _) = normalize(vec![seg(0.0, 9.0, text)], 15.0, 30);
        assert!(units.len() >= 3);
        assert!(units.iter().all(|u| u.text.chars().count() <= 30));
        assert_eq!(units.first().unwrap().window.start(), 0.0);
        assert_eq!(units.last().unwrap().window.end(), 9.0);
        assert!(is_well_formed(&units, 15.0));
    }

    #[test]
    fn test_split_snaps_to_word_gaps() {
        let words = vec![
            TimedWord { word: "alpha".into(), start: 0.0, end: 1.0 },
            TimedWord { word: "beta.".into(), start: 1.1, end: 2.0 },
            TimedWord { word: "gamma".into(), start: 3.0, end: 4.0 },
            TimedWord { word: "delta.".into(), start: 4.1, end: 5.0 },
        ];
        let raw = RawSegment {
            start: 0.0,
            end: 5.0,
            text: "alpha beta. gamma delta.".into(),
            words,
        };
        let (units, _) = normalize(vec![raw], 10.0, 12);
        assert_eq!(units.len(), 2);
        assert!((units[0].window.end() - 2.5).abs() < 1e-9);
        assert_eq!(units[0].words.len(), 2);
        assert_eq!(units[1].words.len(), 2);
    }

    #[test]
    fn test_split_text_without_breaks() {
        let chunks = split_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_split_text_falls_back_to_words() {
        let chunks = split_text("one two three four five", 9);
        assert!(chunks.iter().all(|c| c.chars().count() <= 9));
        assert_eq!(chunks.join(" "), "one two three four five");
    }
}
