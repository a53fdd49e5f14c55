// Transcription collaborators and the Timed Transcript Builder
//
// - Whisper: openai-whisper command-line implementation
//
// A new backend implements `Transcriber`, returning raw timed segments in
// seconds relative to the start of the audio it was given. Normalization
// into `TimedTextUnit`s happens once, here, for every backend.

pub mod whisper;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::audio;
use crate::config::TranscriberConfig;
use crate::error::{DubError, Result};
use crate::quality::QualityReport;
use crate::transcript::{RawTranscript, Transcript, TranscriptNormalizer};

/// Language tag used when neither a hint nor detection is available
pub const UNDETERMINED_LANGUAGE: &str = "und";

/// Speech-to-text collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio file. `language_hint` skips detection when set.
    async fn transcribe(&self, audio_path: &Path, language_hint: Option<String>) -> Result<RawTranscript>;

    /// Check if the backend can be invoked
    fn check_availability(&self) -> Result<()>;
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_transcriber(config: TranscriberConfig) -> Box<dyn Transcriber> {
        Box::new(whisper::WhisperTranscriber::new(config))
    }
}

/// Turns an extracted audio track into an ordered, length-bounded transcript
pub struct TimedTranscriptBuilder {
    transcriber: Arc<dyn Transcriber>,
    normalizer: TranscriptNormalizer,
    silence_threshold: f32,
}

impl TimedTranscriptBuilder {
    pub fn new(transcriber: Arc<dyn Transcriber>, config: &TranscriberConfig) -> Self {
        Self {
            transcriber,
            normalizer: TranscriptNormalizer::new(config.max_unit_chars, config.merge_gap),
            silence_threshold: config.silence_threshold,
        }
    }

    pub async fn build(
        &self,
        audio_path: &Path,
        segment_duration: f64,
        language_hint: Option<&str>,
        report: &mut QualityReport,
    ) -> Result<Transcript> {
        let fallback_language = language_hint.unwrap_or(UNDETERMINED_LANGUAGE).to_string();

        // Nothing to hear: a valid, trivial transcript. Models invent text
        // for silence, so silent tracks never reach them.
        let track = audio::read_wav(audio_path).map_err(|e| DubError::Transcription(e.to_string()))?;
        if track.samples.is_empty() || track.peak() < self.silence_threshold {
            warn!(
                "Audio track {} is {}, transcript will be empty",
                audio_path.display(),
                if track.samples.is_empty() { "empty" } else { "silent" }
            );
            return Ok(Transcript {
                source_language: fallback_language,
                units: Vec::new(),
            });
        }

        let raw = self
            .transcriber
            .transcribe(audio_path, language_hint.map(str::to_string))
            .await
            .map_err(|e| match e {
                DubError::Transcription(_) => e,
                other => DubError::Transcription(other.to_string()),
            })?;

        let source_language = match (language_hint, raw.language.as_deref()) {
            (Some(hint), _) => hint.to_string(),
            (None, Some(detected)) if !detected.trim().is_empty() => {
                info!("Detected source language: {}", detected);
                detected.trim().to_lowercase()
            }
            _ => fallback_language,
        };

        let units = self
            .normalizer
            .normalize(raw, segment_duration, &source_language, report);

        info!("Transcript has {} units ({})", units.len(), source_language);

        Ok(Transcript {
            source_language,
            units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{write_wav, Waveform};
    use crate::transcript::RawSegment;

    fn tone(dir: &tempfile::TempDir, seconds: f64) -> std::path::PathBuf {
        let path = dir.path().join("audio.wav");
        let len = (seconds * 16000.0) as usize;
        write_wav(&path, &Waveform { samples: vec![0.1; len], sample_rate: 16000 }).unwrap();
        path
    }

    fn segment(start: f64, end: f64, text: &str) -> RawSegment {
        RawSegment { start, end, text: text.to_string(), words: Vec::new() }
    }

    #[tokio::test]
    async fn test_detected_language_used_without_hint() {
        let dir = tempfile::tempdir().unwrap();
        let audio = tone(&dir, 5.0);

        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().returning(|_, hint| {
            assert!(hint.is_none());
            Ok(RawTranscript {
                language: Some("EN".to_string()),
                segments: vec![segment(0.0, 2.0, "Hello there.")],
            })
        });

        let builder = TimedTranscriptBuilder::new(Arc::new(transcriber), &TranscriberConfig::default());
        let mut report = QualityReport::new();
        let transcript = builder.build(&audio, 5.0, None, &mut report).await.unwrap();
        assert_eq!(transcript.source_language, "en");
        assert_eq!(transcript.units.len(), 1);
        assert_eq!(transcript.units[0].source_language, "en");
    }

    #[tokio::test]
    async fn test_hint_wins_over_detection() {
        let dir = tempfile::tempdir().unwrap();
        let audio = tone(&dir, 5.0);

        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().returning(|_, hint| {
            assert_eq!(hint.as_deref(), Some("fr"));
            Ok(RawTranscript { language: Some("en".to_string()), segments: Vec::new() })
        });

        let builder = TimedTranscriptBuilder::new(Arc::new(transcriber), &TranscriberConfig::default());
        let mut report = QualityReport::new();
        let transcript = builder.build(&audio, 5.0, Some("fr"), &mut report).await.unwrap();
        assert_eq!(transcript.source_language, "fr");
        assert!(transcript.units.is_empty());
    }

    #[tokio::test]
    async fn test_empty_audio_skips_collaborator() {
        let dir = tempfile::tempdir().unwrap();
        let audio = tone(&dir, 0.0);

        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never();

        let builder = TimedTranscriptBuilder::new(Arc::new(transcriber), &TranscriberConfig::default());
        let mut report = QualityReport::new();
        let transcript = builder.build(&audio, 15.0, Some("en"), &mut report).await.unwrap();
        assert!(transcript.units.is_empty());
    }

    #[tokio::test]
    async fn test_silent_audio_skips_collaborator() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("silence.wav");
        write_wav(&audio, &Waveform::silence(5 * 16000, 16000)).unwrap();

        // Whisper likes to hear "Thank you." in silence
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never().returning(|_, _| {
            Ok(RawTranscript {
                language: Some("en".to_string()),
                segments: vec![segment(0.0, 2.0, "Thank you.")],
            })
        });

        let builder = TimedTranscriptBuilder::new(Arc::new(transcriber), &TranscriberConfig::default());
        let mut report = QualityReport::new();
        let transcript = builder.build(&audio, 5.0, Some("en"), &mut report).await.unwrap();
        assert!(transcript.units.is_empty());
        assert_eq!(transcript.source_language, "en");
    }

    #[tokio::test]
    async fn test_quiet_speech_above_threshold_is_transcribed() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("quiet.wav");
        let mut wave = Waveform::silence(5 * 16000, 16000);
        wave.samples[8000] = 0.01;
        write_wav(&audio, &wave).unwrap();

        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().times(1).returning(|_, _| {
            Ok(RawTranscript { language: None, segments: vec![segment(0.0, 1.0, "psst")] })
        });

        let builder = TimedTranscriptBuilder::new(Arc::new(transcriber), &TranscriberConfig::default());
        let mut report = QualityReport::new();
        let transcript = builder.build(&audio, 5.0, Some("en"), &mut report).await.unwrap();
        assert_eq!(transcript.units.len(), 1);
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_transcription_error() {
        let dir = tempfile::tempdir().unwrap();
        let audio = tone(&dir, 1.0);

        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_, _| Err(DubError::Media("decoder crashed".into())));

        let builder = TimedTranscriptBuilder::new(Arc::new(transcriber), &TranscriberConfig::default());
        let mut report = QualityReport::new();
        let err = builder.build(&audio, 1.0, None, &mut report).await.unwrap_err();
        assert!(matches!(err, DubError::Transcription(_)));
    }
}
