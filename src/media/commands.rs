use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, DubError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Only report errors on stderr
    pub fn quiet(self) -> Self {
        self.arg("-hide_banner").arg("-loglevel").arg("error")
    }

    /// Seek the following input (accurate seek on re-encode)
    pub fn seek(self, seconds: f64) -> Self {
        self.arg("-ss").arg(format_seconds(seconds))
    }

    /// Limit output duration
    pub fn duration(self, seconds: f64) -> Self {
        self.arg("-t").arg(format_seconds(seconds))
    }

    /// Set video codec
    pub fn video_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set audio codec
    pub fn audio_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy video stream
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Disable video
    pub fn no_video(self) -> Self {
        self.arg("-vn")
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Set audio sample rate
    pub fn audio_sample_rate(self, rate: u32) -> Self {
        self.arg("-ar").arg(rate.to_string())
    }

    /// Set audio channels
    pub fn audio_channels(self, channels: u32) -> Self {
        self.arg("-ac").arg(channels.to_string())
    }

    /// Add audio filter
    pub fn audio_filter<S: Into<String>>(self, filter: S) -> Self {
        self.arg("-af").arg(filter)
    }

    /// Select a stream for the output
    pub fn map<S: Into<String>>(self, spec: S) -> Self {
        self.arg("-map").arg(spec)
    }

    /// Finish with the shortest input
    pub fn shortest(self) -> Self {
        self.arg("-shortest")
    }

    /// Drop timestamps, encoder tags and metadata so identical inputs give identical bytes
    pub fn bitexact(self) -> Self {
        self.arg("-map_metadata").arg("-1")
            .arg("-fflags").arg("+bitexact")
            .arg("-flags:v").arg("+bitexact")
            .arg("-flags:a").arg("+bitexact")
    }

    /// Execute the command
    pub async fn execute(&self) -> Result<()> {
        self.execute_capture().await.map(|_| ())
    }

    /// Execute the command and return its stdout
    pub async fn execute_capture(&self) -> Result<String> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| DubError::Media(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn format_seconds(seconds: f64) -> String {
    format!("{:.6}", seconds)
}

/// Builder for the operations the pipeline needs
pub struct MediaCommandBuilder {
    binary_path: String,
    probe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, probe_path: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            probe_path: probe_path.into(),
        }
    }

    /// Container duration query
    pub fn probe_duration<P: AsRef<Path>>(&self, media_path: P) -> MediaCommand {
        MediaCommand::new(&self.probe_path, "Duration probe")
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
            .output(media_path)
    }

    /// Frame rate of the first video stream
    pub fn probe_frame_rate<P: AsRef<Path>>(&self, video_path: P) -> MediaCommand {
        MediaCommand::new(&self.probe_path, "Frame rate probe")
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=r_frame_rate",
                "-of", "json",
            ])
            .output(video_path)
    }

    /// Video-only cut of `[start, start + duration)`
    pub fn extract_video_segment<P: AsRef<Path>>(
        &self,
        video_path: P,
        start: f64,
        duration: f64,
        output_path: P,
        additional_options: &[String],
    ) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.binary_path, "Video segment extraction")
            .quiet()
            .overwrite()
            .seek(start)
            .input(video_path)
            .duration(duration)
            .no_audio()
            .video_codec("libx264")
            .arg("-threads").arg("1")
            .bitexact();

        for option in additional_options {
            cmd = cmd.arg(option);
        }

        cmd.output(output_path)
    }

    /// Mono PCM cut of `[start, start + duration)`
    pub fn extract_audio_segment<P: AsRef<Path>>(
        &self,
        media_path: P,
        start: f64,
        duration: f64,
        output_path: P,
        sample_rate: u32,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Audio segment extraction")
            .quiet()
            .overwrite()
            .seek(start)
            .input(media_path)
            .duration(duration)
            .no_video()
            .audio_codec("pcm_s16le")
            .audio_sample_rate(sample_rate)
            .audio_channels(1)
            .bitexact()
            .output(output_path)
    }

    /// Replace the audio of a video, copying the video stream
    pub fn mux_audio_video<P: AsRef<Path>>(
        &self,
        video_path: P,
        audio_path: P,
        output_path: P,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Audio/video mux")
            .quiet()
            .overwrite()
            .input(video_path)
            .input(audio_path)
            .copy_video()
            .audio_codec("aac")
            .map("0:v:0")
            .map("1:a:0")
            .shortest()
            .output(output_path)
    }

    /// Pitch-preserving tempo change, resampled to mono at `sample_rate`
    pub fn time_stretch<P: AsRef<Path>>(
        &self,
        input_path: P,
        output_path: P,
        tempo: f64,
        sample_rate: u32,
    ) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.binary_path, format!("Time stretch (tempo {:.4})", tempo))
            .quiet()
            .overwrite()
            .input(input_path);

        if let Some(filter) = atempo_chain(tempo) {
            cmd = cmd.audio_filter(filter);
        }

        cmd.audio_codec("pcm_s16le")
            .audio_sample_rate(sample_rate)
            .audio_channels(1)
            .output(output_path)
    }

    /// Dump every frame as a numbered PNG (`pattern` like `frames/%06d.png`)
    pub fn extract_frames<P: AsRef<Path>>(&self, video_path: P, pattern: P) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Frame extraction")
            .quiet()
            .overwrite()
            .input(video_path)
            .arg("-vsync").arg("0")
            .output(pattern)
    }

    /// Encode numbered frames together with an audio track
    pub fn encode_frames<P: AsRef<Path>>(
        &self,
        pattern: P,
        fps: f64,
        audio_path: P,
        output_path: P,
        additional_options: &[String],
    ) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.binary_path, "Frame encoding")
            .quiet()
            .overwrite()
            .arg("-framerate").arg(format!("{:.6}", fps))
            .input(pattern)
            .input(audio_path)
            .map("0:v:0")
            .map("1:a:0")
            .video_codec("libx264")
            .arg("-pix_fmt").arg("yuv420p")
            .audio_codec("aac")
            .shortest();

        for option in additional_options {
            cmd = cmd.arg(option);
        }

        cmd.output(output_path)
    }
}

/// `atempo` only accepts factors in [0.5, 2.0] per instance, so larger
/// changes are chained. Returns `None` for a unit tempo.
pub fn atempo_chain(tempo: f64) -> Option<String> {
    if !tempo.is_finite() || tempo <= 0.0 || (tempo - 1.0).abs() < 1e-9 {
        return None;
    }
    let mut remaining = tempo;
    let mut stages = Vec::new();
    while remaining > 2.0 {
        stages.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push(0.5);
        remaining /= 0.5;
    }
    stages.push(remaining);
    Some(
        stages
            .iter()
            .map(|t| format!("atempo={:.6}", t))
            .collect::<Vec<_>>()
            .join(","),
    )
}
