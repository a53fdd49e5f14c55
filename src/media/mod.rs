// Media encode/decode/mux layer
//
// - Commands: ffmpeg/ffprobe command construction
// - Processor: the ffmpeg-backed implementation of `MediaProcessor`

pub mod commands;
pub mod processor;

use async_trait::async_trait;
use std::path::Path;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::Result;
use crate::timing::TimeWindow;

/// Media operations the pipeline relies on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Container duration in seconds
    async fn probe_duration(&self, media_path: &Path) -> Result<f64>;

    /// Frame rate of the first video stream
    async fn probe_frame_rate(&self, video_path: &Path) -> Result<f64>;

    /// Video-only cut of `window`
    async fn extract_video_segment(
        &self,
        source: &Path,
        window: TimeWindow,
        output_path: &Path,
    ) -> Result<()>;

    /// Mono PCM cut of `window` at `sample_rate`
    async fn extract_audio_segment(
        &self,
        source: &Path,
        window: TimeWindow,
        output_path: &Path,
        sample_rate: u32,
    ) -> Result<()>;

    /// Copy the video stream and replace its audio
    async fn mux_audio_video(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<()>;

    /// Pitch-preserving tempo change; `tempo > 1` shortens the audio
    async fn time_stretch(
        &self,
        input_path: &Path,
        output_path: &Path,
        tempo: f64,
        sample_rate: u32,
    ) -> Result<()>;

    /// Write every frame of the video as a numbered PNG into `frames_dir`
    async fn extract_frames(&self, video_path: &Path, frames_dir: &Path) -> Result<()>;

    /// Encode the numbered PNGs in `frames_dir` together with an audio track
    async fn encode_frames(
        &self,
        frames_dir: &Path,
        fps: f64,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<()>;

    /// Check if the media tools are available
    fn check_availability(&self) -> Result<()>;
}

/// File name pattern used for extracted and restored frames
pub const FRAME_PATTERN: &str = "%06d.png";

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessor> {
        Box::new(processor::FfmpegProcessor::new(config))
    }
}
