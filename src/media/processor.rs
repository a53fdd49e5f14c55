use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

use super::{MediaCommandBuilder, MediaProcessor, FRAME_PATTERN};
use crate::config::MediaConfig;
use crate::error::{DubError, Result};
use crate::timing::TimeWindow;

/// ffmpeg/ffprobe-backed media processor
pub struct FfmpegProcessor {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

#[derive(Deserialize)]
struct ProbeFormat {
    format: ProbeFormatEntry,
}

#[derive(Deserialize)]
struct ProbeFormatEntry {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStreams {
    #[serde(default)]
    streams: Vec<ProbeStreamEntry>,
}

#[derive(Deserialize)]
struct ProbeStreamEntry {
    r_frame_rate: Option<String>,
}

impl FfmpegProcessor {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.binary_path, &config.probe_path);

        Self {
            config,
            command_builder,
        }
    }
}

/// Parse ffprobe's `format=duration` JSON
pub fn parse_probe_duration(json: &str) -> Result<f64> {
    let probe: ProbeFormat = serde_json::from_str(json)?;
    probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| DubError::Media("ffprobe reported no duration".to_string()))
}

/// Parse ffprobe's `stream=r_frame_rate` JSON (`"30000/1001"` style rationals)
pub fn parse_probe_frame_rate(json: &str) -> Result<f64> {
    let probe: ProbeStreams = serde_json::from_str(json)?;
    let rate = probe
        .streams
        .first()
        .and_then(|s| s.r_frame_rate.as_deref())
        .ok_or_else(|| DubError::Media("ffprobe reported no video stream".to_string()))?;

    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().unwrap_or(0.0);
            let den: f64 = den.trim().parse().unwrap_or(0.0);
            if den > 0.0 { num / den } else { 0.0 }
        }
        None => rate.trim().parse().unwrap_or(0.0),
    };

    if fps > 0.0 && fps.is_finite() {
        Ok(fps)
    } else {
        Err(DubError::Media(format!("Invalid frame rate: {}", rate)))
    }
}

#[async_trait]
impl MediaProcessor for FfmpegProcessor {
    async fn probe_duration(&self, media_path: &Path) -> Result<f64> {
        let json = self
            .command_builder
            .probe_duration(media_path)
            .execute_capture()
            .await?;
        let duration = parse_probe_duration(&json)?;
        debug!("{} lasts {:.3}s", media_path.display(), duration);
        Ok(duration)
    }

    async fn probe_frame_rate(&self, video_path: &Path) -> Result<f64> {
        let json = self
            .command_builder
            .probe_frame_rate(video_path)
            .execute_capture()
            .await?;
        parse_probe_frame_rate(&json)
    }

    async fn extract_video_segment(
        &self,
        source: &Path,
        window: TimeWindow,
        output_path: &Path,
    ) -> Result<()> {
        info!("Extracting video {} from {}", window, source.display());
        self.command_builder
            .extract_video_segment(
                source,
                window.start(),
                window.duration(),
                output_path,
                &self.config.video_options,
            )
            .execute()
            .await
    }

    async fn extract_audio_segment(
        &self,
        source: &Path,
        window: TimeWindow,
        output_path: &Path,
        sample_rate: u32,
    ) -> Result<()> {
        info!("Extracting audio {} from {}", window, source.display());
        self.command_builder
            .extract_audio_segment(
                source,
                window.start(),
                window.duration(),
                output_path,
                sample_rate,
            )
            .execute()
            .await
    }

    async fn mux_audio_video(
        &self,
        video_path: &Path,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<()> {
        info!(
            "Muxing {} with {} -> {}",
            video_path.display(),
            audio_path.display(),
            output_path.display()
        );
        self.command_builder
            .mux_audio_video(video_path, audio_path, output_path)
            .execute()
            .await
    }

    async fn time_stretch(
        &self,
        input_path: &Path,
        output_path: &Path,
        tempo: f64,
        sample_rate: u32,
    ) -> Result<()> {
        self.command_builder
            .time_stretch(input_path, output_path, tempo, sample_rate)
            .execute()
            .await
    }

    async fn extract_frames(&self, video_path: &Path, frames_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(frames_dir).await?;
        let pattern = frames_dir.join(FRAME_PATTERN);
        self.command_builder
            .extract_frames(video_path, pattern.as_path())
            .execute()
            .await
    }

    async fn encode_frames(
        &self,
        frames_dir: &Path,
        fps: f64,
        audio_path: &Path,
        output_path: &Path,
    ) -> Result<()> {
        let pattern = frames_dir.join(FRAME_PATTERN);
        self.command_builder
            .encode_frames(
                pattern.as_path(),
                fps,
                audio_path,
                output_path,
                &self.config.video_options,
            )
            .execute()
            .await
    }

    fn check_availability(&self) -> Result<()> {
        for binary in [&self.config.binary_path, &self.config.probe_path] {
            let output = Command::new(binary)
                .arg("-version")
                .output()
                .map_err(|e| DubError::Media(format!("{} not found: {}", binary, e)))?;

            if !output.status.success() {
                return Err(DubError::Media(format!("{} version check failed", binary)));
            }
        }
        info!("Media tools are available");
        Ok(())
    }
}
