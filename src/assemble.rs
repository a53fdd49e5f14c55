//! Timeline assembly.
//!
//! Planning works in whole samples so the assembled track length is exactly
//! `round(segment_duration * sample_rate)` samples, which keeps the duration
//! error under half a sample regardless of what the clips look like.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::audio::{self, Waveform};
use crate::error::{DubError, Result};
use crate::quality::{QualityReport, QualityWarning};
use crate::synth::SynthesizedClip;
use crate::timing::{samples_to_seconds, seconds_to_samples, TimeWindow};

/// One span of the assembled track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineElement {
    Clip {
        index: usize,
        offset: usize,
        len: usize,
    },
    Silence {
        offset: usize,
        len: usize,
    },
}

impl TimelineElement {
    pub fn offset(&self) -> usize {
        match self {
            TimelineElement::Clip { offset, .. } | TimelineElement::Silence { offset, .. } => *offset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TimelineElement::Clip { len, .. } | TimelineElement::Silence { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_len(&mut self, new_len: usize) {
        match self {
            TimelineElement::Clip { len, .. } | TimelineElement::Silence { len, .. } => *len = new_len,
        }
    }
}

/// A clip as the planner sees it: where it wants to start and how long it is
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipSpan {
    pub index: usize,
    pub window: TimeWindow,
    pub len: usize,
}

/// Sample-exact layout of the assembled track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelinePlan {
    pub sample_rate: u32,
    pub total_samples: usize,
    pub elements: Vec<TimelineElement>,
}

impl TimelinePlan {
    pub fn duration(&self) -> f64 {
        samples_to_seconds(self.total_samples, self.sample_rate)
    }

    pub fn silence_gaps(&self) -> usize {
        self.elements
            .iter()
            .filter(|e| matches!(e, TimelineElement::Silence { .. }))
            .count()
    }
}

/// Lay clips on a track of `segment_duration` seconds.
///
/// Each clip starts at its window start, or right after the previous clip
/// when that one overran (a timing conflict). Dead time becomes silence and
/// the tail is padded or trimmed so the track has the exact sample count.
pub fn plan_timeline(
    clips: &[ClipSpan],
    segment_duration: f64,
    sample_rate: u32,
    report: &mut QualityReport,
) -> TimelinePlan {
    let total_samples = seconds_to_samples(segment_duration, sample_rate);
    let mut elements = Vec::with_capacity(clips.len() * 2 + 1);
    let mut cursor = 0usize;

    for clip in clips {
        if clip.len == 0 {
            continue;
        }
        let start = seconds_to_samples(clip.window.start(), sample_rate);
        if start > cursor {
            elements.push(TimelineElement::Silence {
                offset: cursor,
                len: start - cursor,
            });
            cursor = start;
        } else if start < cursor {
            report.push(QualityWarning::TimingConflict {
                index: clip.index,
                overlap: samples_to_seconds(cursor - start, sample_rate),
            });
        }
        elements.push(TimelineElement::Clip {
            index: clip.index,
            offset: cursor,
            len: clip.len,
        });
        cursor += clip.len;
    }

    if cursor < total_samples {
        elements.push(TimelineElement::Silence {
            offset: cursor,
            len: total_samples - cursor,
        });
    } else if cursor > total_samples {
        report.push(QualityWarning::TrailingOverrun {
            trimmed: samples_to_seconds(cursor - total_samples, sample_rate),
        });
        elements.retain(|e| e.offset() < total_samples);
        if let Some(last) = elements.last_mut() {
            let keep = total_samples - last.offset();
            last.set_len(keep);
        }
    }

    TimelinePlan {
        sample_rate,
        total_samples,
        elements,
    }
}

/// Assembled target-language track of one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledTimeline {
    pub audio: PathBuf,
    pub duration: f64,
    pub target_duration: f64,
    pub plan: TimelinePlan,
}

impl AssembledTimeline {
    pub fn deviation(&self) -> f64 {
        (self.duration - self.target_duration).abs()
    }
}

/// Concatenates synthesized clips with silence into one track
pub struct TimelineAssembler {
    sample_rate: u32,
    tolerance: f64,
}

impl TimelineAssembler {
    pub fn new(sample_rate: u32, tolerance: f64) -> Self {
        Self {
            sample_rate,
            tolerance,
        }
    }

    pub fn assemble(
        &self,
        clips: &[SynthesizedClip],
        segment_duration: f64,
        output_path: &Path,
        report: &mut QualityReport,
    ) -> Result<AssembledTimeline> {
        let mut waves: HashMap<usize, Waveform> = HashMap::with_capacity(clips.len());
        let mut spans = Vec::with_capacity(clips.len());

        for clip in clips {
            let wave = audio::read_wav(&clip.audio)?;
            if wave.sample_rate != self.sample_rate {
                return Err(DubError::Assembly(format!(
                    "Clip {} is {} Hz, timeline is {} Hz",
                    clip.index, wave.sample_rate, self.sample_rate
                )));
            }
            spans.push(ClipSpan {
                index: clip.index,
                window: clip.window,
                len: wave.samples.len(),
            });
            waves.insert(clip.index, wave);
        }
        spans.sort_by(|a, b| a.window.start().total_cmp(&b.window.start()));

        let plan = plan_timeline(&spans, segment_duration, self.sample_rate, report);
        let track = render(&plan, &waves)?;

        let duration = track.duration();
        if (duration - segment_duration).abs() > self.tolerance {
            return Err(DubError::Assembly(format!(
                "Assembled {:.4}s for a {:.4}s segment",
                duration, segment_duration
            )));
        }

        audio::write_wav(output_path, &track)?;
        info!(
            "Assembled {:.3}s track from {} clips with {} silence gaps",
            duration,
            clips.len(),
            plan.silence_gaps()
        );

        Ok(AssembledTimeline {
            audio: output_path.to_path_buf(),
            duration,
            target_duration: segment_duration,
            plan,
        })
    }
}

fn render(plan: &TimelinePlan, waves: &HashMap<usize, Waveform>) -> Result<Waveform> {
    let mut samples = Vec::with_capacity(plan.total_samples);

    for element in &plan.elements {
        match element {
            TimelineElement::Silence { len, .. } => {
                samples.resize(samples.len() + len, 0.0);
            }
            TimelineElement::Clip { index, len, .. } => {
                let wave = waves
                    .get(index)
                    .ok_or_else(|| DubError::Assembly(format!("No audio for clip {}", index)))?;
                let take = (*len).min(wave.samples.len());
                samples.extend_from_slice(&wave.samples[..take]);
                samples.resize(samples.len() + (len - take), 0.0);
            }
        }
    }

    debug!("Rendered {} of {} planned samples", samples.len(), plan.total_samples);
    samples.resize(plan.total_samples, 0.0);

    Ok(Waveform {
        samples,
        sample_rate: plan.sample_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16000;

    fn span(index: usize, start: f64, end: f64, seconds: f64) -> ClipSpan {
        ClipSpan {
            index,
            window: TimeWindow::new(start, end).unwrap(),
            len: seconds_to_samples(seconds, SR),
        }
    }

    fn total(plan: &TimelinePlan) -> usize {
        plan.elements.iter().map(|e| e.len()).sum()
    }

    #[test]
    fn test_back_to_back_units_have_no_gaps() {
        let mut report = QualityReport::new();
        let clips = [span(0, 0.0, 5.0, 5.0), span(1, 5.0, 10.0, 5.0), span(2, 10.0, 15.0, 5.0)];
        let plan = plan_timeline(&clips, 15.0, SR, &mut report);
        assert_eq!(plan.silence_gaps(), 0);
        assert_eq!(total(&plan), 15 * SR as usize);
        assert!(report.is_empty());
    }

    #[test]
    fn test_gap_between_units_is_silence() {
        let mut report = QualityReport::new();
        let clips = [span(0, 0.0, 3.0, 3.0), span(1, 5.0, 8.0, 3.0)];
        let plan = plan_timeline(&clips, 8.0, SR, &mut report);
        assert_eq!(
            plan.elements[1],
            TimelineElement::Silence { offset: 3 * SR as usize, len: 2 * SR as usize }
        );
        assert_eq!(plan.silence_gaps(), 1);
    }

    #[test]
    fn test_overrun_pushes_next_clip_and_warns() {
        let mut report = QualityReport::new();
        // First clip clamped and 1s too long
        let clips = [span(0, 0.0, 4.0, 5.0), span(1, 4.0, 6.0, 2.0)];
        let plan = plan_timeline(&clips, 10.0, SR, &mut report);
        assert_eq!(plan.elements[1].offset(), 5 * SR as usize);
        assert_eq!(report.timing_conflicts(), 1);
        assert_eq!(total(&plan), 10 * SR as usize);
    }

    #[test]
    fn test_tail_overrun_is_trimmed() {
        let mut report = QualityReport::new();
        let clips = [span(0, 0.0, 2.0, 2.0), span(1, 8.0, 10.0, 3.5)];
        let plan = plan_timeline(&clips, 10.0, SR, &mut report);
        assert_eq!(total(&plan), 10 * SR as usize);
        assert_eq!(plan.elements.last().unwrap().len(), 2 * SR as usize);
        assert!(matches!(
            report.warnings[0],
            QualityWarning::TrailingOverrun { trimmed } if (trimmed - 1.5).abs() < 1e-9
        ));
    }

    #[test]
    fn test_no_clips_is_all_silence() {
        let mut report = QualityReport::new();
        let plan = plan_timeline(&[], 15.0, SR, &mut report);
        assert_eq!(plan.elements, vec![TimelineElement::Silence { offset: 0, len: 240000 }]);
    }

    #[test]
    fn test_elements_never_overlap() {
        let mut report = QualityReport::new();
        let clips = [
            span(0, 0.0, 1.0, 1.7),
            span(1, 1.2, 2.0, 0.3),
            span(2, 1.9, 3.0, 2.4),
            span(3, 6.0, 7.0, 0.9),
        ];
        let plan = plan_timeline(&clips, 7.0, SR, &mut report);
        let mut expected_offset = 0;
        for element in &plan.elements {
            assert_eq!(element.offset(), expected_offset);
            assert!(!element.is_empty());
            expected_offset += element.len();
        }
        assert_eq!(expected_offset, plan.total_samples);
    }

    #[test]
    fn test_assemble_writes_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut clips = Vec::new();
        for (i, (start, end)) in [(1.0, 3.0), (4.0, 6.5)].iter().enumerate() {
            let path = dir.path().join(format!("clip_{}.wav", i));
            let len = seconds_to_samples(end - start, SR);
            audio::write_wav(&path, &Waveform { samples: vec![0.25; len], sample_rate: SR }).unwrap();
            clips.push(SynthesizedClip {
                index: i,
                window: TimeWindow::new(*start, *end).unwrap(),
                audio: path,
                natural_duration: end - start,
                target_duration: end - start,
                scale_factor: 1.0,
                requested_scale: Some(1.0),
                degraded: false,
                duration: end - start,
            });
        }

        let assembler = TimelineAssembler::new(SR, 0.05);
        let mut report = QualityReport::new();
        let out = dir.path().join("assembled.wav");
        let timeline = assembler.assemble(&clips, 7.25, &out, &mut report).unwrap();

        assert!(timeline.deviation() <= 0.05);
        let wave = audio::read_wav(&out).unwrap();
        assert_eq!(wave.samples.len(), seconds_to_samples(7.25, SR));
        assert_eq!(wave.samples[0], 0.0);
        assert!(wave.samples[SR as usize + 10] > 0.2);
    }
}
