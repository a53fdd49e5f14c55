// Voice-cloned speech synthesis and duration reconciliation
//
// - Coqui: `tts` command-line implementation of `SpeechSynthesizer`
// - Stretch: ffmpeg atempo implementation of `TimeStretcher`
// - Duration: scale factor planning

pub mod coqui;
pub mod duration;
pub mod stretch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub use duration::{ScaleLimits, ScalePlan};

use crate::audio;
use crate::config::{SynthesisConfig, SynthesisFailurePolicy};
use crate::error::{DubError, Result};
use crate::quality::{QualityReport, QualityWarning};
use crate::timing::{seconds_to_samples, TimeWindow};
use crate::transcript::{TranslatedUnit, Translation};

/// What the synthesizer is asked to say
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub reference_audio: PathBuf,
    pub language: String,
    /// Requested speaking-rate multiplier. Backends without rate control ignore it.
    pub speaking_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutput {
    pub audio: PathBuf,
    pub natural_duration: f64,
}

/// Voice-cloning text-to-speech collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak `request.text` in the voice of `request.reference_audio`, writing a WAV to `output_path`
    async fn synthesize(&self, request: SynthesisRequest, output_path: &Path) -> Result<SynthesisOutput>;

    fn check_availability(&self) -> Result<()>;
}

/// Pitch-preserving time scaling
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TimeStretcher: Send + Sync {
    /// Change tempo (`> 1` is faster) and resample to mono `sample_rate`
    async fn stretch(&self, input: &Path, output: &Path, tempo: f64, sample_rate: u32) -> Result<()>;
}

/// Factory for creating synthesizer instances
pub struct SynthesizerFactory;

impl SynthesizerFactory {
    pub fn create_synthesizer(config: SynthesisConfig) -> Box<dyn SpeechSynthesizer> {
        Box::new(coqui::CoquiSynthesizer::new(config))
    }
}

/// Synthesized speech for one translated unit, fitted to its window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedClip {
    pub index: usize,
    pub window: TimeWindow,
    pub audio: PathBuf,
    pub natural_duration: f64,
    pub target_duration: f64,
    /// Factor applied, inside the safe range
    pub scale_factor: f64,
    /// Factor the window asked for; `None` when the clip was unmeasurable
    pub requested_scale: Option<f64>,
    /// Clip does not match its window (clamped or unmeasurable)
    pub degraded: bool,
    /// Duration of `audio` as written
    pub duration: f64,
}

/// Wraps a synthesizer and a stretcher so each clip lands on its window
pub struct DurationMatchedSynthesizer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    stretcher: Arc<dyn TimeStretcher>,
    limits: ScaleLimits,
    sample_rate: u32,
    language: String,
    failure_policy: SynthesisFailurePolicy,
}

impl DurationMatchedSynthesizer {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        stretcher: Arc<dyn TimeStretcher>,
        config: &SynthesisConfig,
        language: impl Into<String>,
        sample_rate: u32,
    ) -> Self {
        Self {
            synthesizer,
            stretcher,
            limits: ScaleLimits::new(config.min_scale, config.max_scale, config.dead_band),
            sample_rate,
            language: language.into(),
            failure_policy: config.failure_policy,
        }
    }

    /// Synthesize every unit in order. Units that produce no speech are
    /// absent from the result and leave silence in the assembled track.
    pub async fn synthesize_all(
        &self,
        translation: &Translation,
        reference: &Path,
        output_dir: &Path,
        report: &mut QualityReport,
    ) -> Result<Vec<SynthesizedClip>> {
        tokio::fs::create_dir_all(output_dir).await?;
        let mut clips = Vec::with_capacity(translation.units.len());

        for (index, unit) in translation.units.iter().enumerate() {
            if let Some(clip) = self.synthesize_unit(index, unit, reference, output_dir, report).await? {
                clips.push(clip);
            }
        }

        info!(
            "Synthesized {} of {} units ({} degraded)",
            clips.len(),
            translation.units.len(),
            clips.iter().filter(|c| c.degraded).count()
        );
        Ok(clips)
    }

    pub async fn synthesize_unit(
        &self,
        index: usize,
        unit: &TranslatedUnit,
        reference: &Path,
        output_dir: &Path,
        report: &mut QualityReport,
    ) -> Result<Option<SynthesizedClip>> {
        let text = unit.text.trim();
        if text.is_empty() {
            report.push(QualityWarning::UnitSkipped {
                index,
                reason: "empty translation".to_string(),
            });
            return Ok(None);
        }

        match self.render(index, unit, text, reference, output_dir, report).await {
            Ok(clip) => Ok(Some(clip)),
            Err(e) => {
                let message = e.to_string();
                match self.failure_policy {
                    SynthesisFailurePolicy::Fatal => {
                        error!("Synthesis of unit {} failed: {}", index, message);
                        Err(DubError::Synthesis { index, message })
                    }
                    SynthesisFailurePolicy::Skip => {
                        report.push(QualityWarning::UnitSkipped { index, reason: message });
                        Ok(None)
                    }
                }
            }
        }
    }

    async fn render(
        &self,
        index: usize,
        unit: &TranslatedUnit,
        text: &str,
        reference: &Path,
        output_dir: &Path,
        report: &mut QualityReport,
    ) -> Result<SynthesizedClip> {
        let raw_path = output_dir.join(format!("raw_{:04}.wav", index));
        let scaled_path = output_dir.join(format!("scaled_{:04}.wav", index));
        let clip_path = output_dir.join(format!("clip_{:04}.wav", index));

        let request = SynthesisRequest {
            text: text.to_string(),
            reference_audio: reference.to_path_buf(),
            language: self.language.clone(),
            speaking_rate: None,
        };
        let output = self.synthesizer.synthesize(request, &raw_path).await?;

        let mut natural = output.natural_duration;
        if !(natural.is_finite() && natural > 0.0) {
            natural = audio::wav_duration(&output.audio).unwrap_or(0.0);
        }

        let target = unit.target_duration();
        let window = unit.window();

        let Some(plan) = self.limits.plan(target, natural) else {
            // Nothing to scale against; only resample to the track rate
            report.push(QualityWarning::UnmeasurableClip { index });
            self.stretcher
                .stretch(&output.audio, &scaled_path, 1.0, self.sample_rate)
                .await?;
            let mut wave = audio::read_wav(&scaled_path)?;
            wave.fit_to_len(wave.samples.len().min(seconds_to_samples(target, self.sample_rate)));
            audio::write_wav(&clip_path, &wave)?;
            return Ok(SynthesizedClip {
                index,
                window,
                audio: clip_path,
                natural_duration: natural.max(0.0),
                target_duration: target,
                scale_factor: 1.0,
                requested_scale: None,
                degraded: true,
                duration: wave.duration(),
            });
        };

        if plan.clamped {
            report.push(QualityWarning::ScaleClamped {
                index,
                requested: plan.requested,
                applied: plan.applied,
            });
        }

        debug!(
            "Unit {}: natural {:.3}s, target {:.3}s, scale {:.3} (tempo {:.3})",
            index,
            natural,
            target,
            plan.applied,
            plan.tempo()
        );

        self.stretcher
            .stretch(&output.audio, &scaled_path, plan.tempo(), self.sample_rate)
            .await?;

        let mut wave = audio::read_wav(&scaled_path)?;
        if wave.sample_rate != self.sample_rate {
            return Err(DubError::Media(format!(
                "Stretched clip has {} Hz, expected {} Hz",
                wave.sample_rate, self.sample_rate
            )));
        }

        if plan.fit_exactly() {
            wave.fit_to_len(seconds_to_samples(target, self.sample_rate));
        } else {
            warn!(
                "Unit {} keeps a {:+.3}s mismatch after clamping",
                index,
                wave.duration() - target
            );
        }
        audio::write_wav(&clip_path, &wave)?;

        Ok(SynthesizedClip {
            index,
            window,
            audio: clip_path,
            natural_duration: natural,
            target_duration: target,
            scale_factor: plan.applied,
            requested_scale: Some(plan.requested),
            degraded: plan.clamped,
            duration: wave.duration(),
        })
    }
}
