use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::error::{DubError, Result};
use crate::media::MediaProcessor;
use crate::timing::TimeWindow;

pub const VIDEO_FILE: &str = "video.mp4";
pub const AUDIO_FILE: &str = "audio.wav";
pub const REFERENCE_FILE: &str = "speaker_reference.wav";

/// Tracks cut from the source for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedSegment {
    pub window: TimeWindow,
    pub video: PathBuf,
    pub audio: PathBuf,
    pub speaker_reference: PathBuf,
    pub sample_rate: u32,
}

impl ExtractedSegment {
    pub fn duration(&self) -> f64 {
        self.window.duration()
    }
}

/// Cuts a bounded window out of a source video
pub struct SegmentExtractor {
    media: Arc<dyn MediaProcessor>,
    sample_rate: u32,
    reference_seconds: f64,
}

impl SegmentExtractor {
    pub fn new(media: Arc<dyn MediaProcessor>, sample_rate: u32, reference_seconds: f64) -> Self {
        Self {
            media,
            sample_rate,
            reference_seconds,
        }
    }

    /// Write the video-only track, the mono audio track and the speaker
    /// reference into `output_dir`. The source is never modified.
    pub async fn extract(
        &self,
        source: &Path,
        window: TimeWindow,
        output_dir: &Path,
    ) -> Result<ExtractedSegment> {
        if !source.exists() {
            return Err(DubError::FileNotFound(source.display().to_string()));
        }

        let media_duration = self
            .media
            .probe_duration(source)
            .await
            .map_err(as_extraction_error)?;
        window.validate_against(media_duration)?;

        info!(
            "Extracting segment {} of {} ({:.3}s source)",
            window,
            source.display(),
            media_duration
        );

        tokio::fs::create_dir_all(output_dir).await?;
        let video = output_dir.join(VIDEO_FILE);
        let audio = output_dir.join(AUDIO_FILE);
        let speaker_reference = output_dir.join(REFERENCE_FILE);

        self.media
            .extract_video_segment(source, window, &video)
            .await
            .map_err(as_extraction_error)?;
        self.media
            .extract_audio_segment(source, window, &audio, self.sample_rate)
            .await
            .map_err(as_extraction_error)?;

        let reference_window = self.reference_window(window)?;
        self.media
            .extract_audio_segment(source, reference_window, &speaker_reference, self.sample_rate)
            .await
            .map_err(as_extraction_error)?;

        Ok(ExtractedSegment {
            window,
            video,
            audio,
            speaker_reference,
            sample_rate: self.sample_rate,
        })
    }

    /// Leading part of the segment used as the voice reference
    pub fn reference_window(&self, window: TimeWindow) -> Result<TimeWindow> {
        let length = self.reference_seconds.min(window.duration());
        TimeWindow::new(window.start(), window.start() + length)
    }
}

fn as_extraction_error(err: DubError) -> DubError {
    match err {
        DubError::Media(msg) => DubError::MediaExtraction(msg),
        DubError::Io(e) => DubError::MediaExtraction(e.to_string()),
        DubError::Json(e) => DubError::MediaExtraction(format!("Unreadable probe output: {}", e)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MockMediaProcessor;
    use mockall::predicate::*;

    fn source_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("talk.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        path
    }

    #[tokio::test]
    async fn test_reference_is_shorter_of_config_and_segment() {
        let media = MockMediaProcessor::new();
        let extractor = SegmentExtractor::new(Arc::new(media), 16000, 10.0);

        let long = TimeWindow::new(15.0, 30.0).unwrap();
        let reference = extractor.reference_window(long).unwrap();
        assert_eq!((reference.start(), reference.end()), (15.0, 25.0));

        let short = TimeWindow::new(2.0, 6.0).unwrap();
        let reference = extractor.reference_window(short).unwrap();
        assert_eq!((reference.start(), reference.end()), (2.0, 6.0));
    }

    #[tokio::test]
    async fn test_writes_three_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(&dir);
        let window = TimeWindow::new(15.0, 30.0).unwrap();

        let mut media = MockMediaProcessor::new();
        media.expect_probe_duration().returning(|_| Ok(60.0));
        media
            .expect_extract_video_segment()
            .with(always(), eq(window), always())
            .times(1)
            .returning(|_, _, _| Ok(()));
        media
            .expect_extract_audio_segment()
            .times(2)
            .returning(|_, _, _, _| Ok(()));

        let extractor = SegmentExtractor::new(Arc::new(media), 16000, 10.0);
        let out = dir.path().join("extract");
        let segment = extractor.extract(&source, window, &out).await.unwrap();

        assert_eq!(segment.video, out.join(VIDEO_FILE));
        assert_eq!(segment.audio, out.join(AUDIO_FILE));
        assert_eq!(segment.speaker_reference, out.join(REFERENCE_FILE));
        assert_eq!(segment.duration(), 15.0);
    }

    #[tokio::test]
    async fn test_window_past_end_is_rejected_before_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(&dir);

        let mut media = MockMediaProcessor::new();
        media.expect_probe_duration().returning(|_| Ok(20.0));
        media.expect_extract_video_segment().never();

        let extractor = SegmentExtractor::new(Arc::new(media), 16000, 10.0);
        let window = TimeWindow::new(15.0, 30.0).unwrap();
        let err = extractor.extract(&source, window, dir.path()).await.unwrap_err();
        assert!(matches!(err, DubError::OutOfRangeWindow { media_duration: Some(d), .. } if d == 20.0));
    }

    #[tokio::test]
    async fn test_decode_failure_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(&dir);

        let mut media = MockMediaProcessor::new();
        media.expect_probe_duration().returning(|_| Ok(60.0));
        media
            .expect_extract_video_segment()
            .returning(|_, _, _| Err(DubError::Media("moov atom not found".into())));

        let extractor = SegmentExtractor::new(Arc::new(media), 16000, 10.0);
        let window = TimeWindow::new(0.0, 5.0).unwrap();
        let err = extractor.extract(&source, window, dir.path()).await.unwrap_err();
        assert!(matches!(err, DubError::MediaExtraction(_)));
        assert_eq!(err.exit_code(), crate::error::exit_code::EXTRACTION);
    }
}
