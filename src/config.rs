use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use crate::error::{Result, DubError};

// Defaults for fields added after the first config format
fn default_merge_gap() -> f64 {
    1.0
}

fn default_silence_threshold() -> f32 {
    0.001
}

fn default_dead_band() -> f64 {
    0.05
}

fn default_jobs() -> usize {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub segment: SegmentConfig,
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub synthesis: SynthesisConfig,
    pub assembly: AssemblyConfig,
    pub resync: ResyncConfig,
    pub media: MediaConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Default segment start (seconds) when none is given on the command line
    pub default_start: f64,
    /// Default segment end (seconds) when none is given on the command line
    pub default_end: f64,
    /// Length of the speaker reference clip used for voice cloning (seconds)
    pub speaker_reference_seconds: f64,
    /// Sample rate of the extracted mono audio track
    pub audio_sample_rate: u32,
}

/// Accuracy/speed selector passed straight through to the transcription model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        }
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelSize {
    type Err = DubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(DubError::Config(format!(
                "Invalid model size '{}'. Valid sizes: tiny, base, small, medium, large",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Path to the whisper command line tool
    pub binary_path: String,
    /// Model size used for transcription
    pub model: ModelSize,
    /// Request word level timestamps (used as split boundaries)
    pub word_timestamps: bool,
    /// Maximum characters in a single timed text unit
    pub max_unit_chars: usize,
    /// Units separated by at most this many seconds are merged
    #[serde(default = "default_merge_gap")]
    pub merge_gap: f64,
    /// Tracks whose peak amplitude stays below this are treated as silence
    /// and never reach the transcriber
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// Target language tag
    pub target_language: String,
    /// Number of units sent to the translator per batch
    pub batch_size: usize,
    /// Maximum retries for a failed request
    pub max_retries: u32,
    /// HTTP timeout per request (seconds)
    pub request_timeout_secs: u64,
}

/// What happens to a run when synthesis fails for one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisFailurePolicy {
    /// Abort the run
    Fatal,
    /// Leave the unit's window silent and continue
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Path to the Coqui `tts` command
    pub binary_path: String,
    /// Voice cloning model
    pub model_name: String,
    /// Language passed to the TTS model; the translation target is used when unset
    pub language: Option<String>,
    /// Lowest scale factor applied without flagging the clip as degraded
    pub min_scale: f64,
    /// Highest scale factor applied without flagging the clip as degraded
    pub max_scale: f64,
    /// Scale factors closer to 1.0 than this skip time stretching
    #[serde(default = "default_dead_band")]
    pub dead_band: f64,
    pub failure_policy: SynthesisFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Maximum allowed deviation between assembled and segment duration (seconds)
    pub tolerance: f64,
    /// Sample rate of the assembled track
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncConfig {
    /// Python interpreter used for Wav2Lip and GFPGAN
    pub python_path: String,
    /// Checkout of the Wav2Lip repository
    pub wav2lip_dir: PathBuf,
    /// Wav2Lip checkpoint
    pub wav2lip_checkpoint: PathBuf,
    /// Downscale factor for processing (1 = original)
    pub resize_factor: u32,
    /// Face padding [top, bottom, left, right]
    pub pads: [i32; 4],
    /// Override output fps (None = match source)
    pub fps: Option<f64>,
    /// Run face restoration after lip sync unless disabled per run
    pub face_restore: bool,
    /// GFPGAN inference script
    pub gfpgan_script: PathBuf,
    /// GFPGAN model weights
    pub gfpgan_model: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary
    pub probe_path: String,
    /// Additional encoding options for re-encoded video
    /// Common options: ["-preset", "medium", "-crf", "23", "-pix_fmt", "yuv420p"]
    pub video_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Root of the per-run working areas
    pub work_dir: PathBuf,
    /// Timeout applied to each stage invocation (None = unbounded)
    pub stage_timeout_secs: Option<u64>,
    /// Concurrent runs in batch mode
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            default_start: 15.0,
            default_end: 30.0,
            speaker_reference_seconds: 10.0,
            audio_sample_rate: 16000,
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            binary_path: "whisper".to_string(),
            model: ModelSize::Base,
            word_timestamps: true,
            max_unit_chars: 200,
            merge_gap: default_merge_gap(),
            silence_threshold: default_silence_threshold(),
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            target_language: "hi".to_string(),
            batch_size: 8,
            max_retries: 3,
            request_timeout_secs: 300,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            binary_path: "tts".to_string(),
            model_name: "tts_models/multilingual/multi-dataset/xtts_v2".to_string(),
            language: None,
            min_scale: 0.5,
            max_scale: 2.0,
            dead_band: default_dead_band(),
            failure_policy: SynthesisFailurePolicy::Fatal,
        }
    }
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.05,
            sample_rate: 16000,
        }
    }
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            python_path: "python3".to_string(),
            wav2lip_dir: PathBuf::from("Wav2Lip"),
            wav2lip_checkpoint: PathBuf::from("checkpoints/wav2lip_gan.pth"),
            resize_factor: 1,
            pads: [0, 10, 0, 0],
            fps: None,
            face_restore: true,
            gfpgan_script: PathBuf::from("GFPGAN/inference_gfpgan.py"),
            gfpgan_model: PathBuf::from("checkpoints/GFPGANv1.4.pth"),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            probe_path: "ffprobe".to_string(),
            video_options: vec![
                // "-preset".to_string(), "medium".to_string(),
                // "-crf".to_string(), "23".to_string(),
            ],
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(".dubsync/runs"),
            stage_timeout_secs: None,
            jobs: default_jobs(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DubError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| DubError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DubError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| DubError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject values the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        let synth = &self.synthesis;
        if !(synth.min_scale > 0.0 && synth.min_scale <= 1.0 && synth.max_scale >= 1.0) {
            return Err(DubError::Config(format!(
                "Scale range [{}, {}] must satisfy 0 < min <= 1 <= max",
                synth.min_scale, synth.max_scale
            )));
        }
        if !(synth.dead_band >= 0.0 && synth.dead_band < 1.0) {
            return Err(DubError::Config(format!("Invalid dead band: {}", synth.dead_band)));
        }
        if !(self.assembly.tolerance > 0.0) {
            return Err(DubError::Config(format!(
                "Assembly tolerance must be positive, got {}",
                self.assembly.tolerance
            )));
        }
        // One sample must fit inside the tolerance for the duration guarantee to hold
        if self.assembly.sample_rate == 0
            || 1.0 / self.assembly.sample_rate as f64 > self.assembly.tolerance
        {
            return Err(DubError::Config(format!(
                "Assembly sample rate {} is too low for tolerance {}",
                self.assembly.sample_rate, self.assembly.tolerance
            )));
        }
        if self.segment.audio_sample_rate == 0 {
            return Err(DubError::Config("Audio sample rate must be positive".to_string()));
        }
        if !(self.segment.speaker_reference_seconds > 0.0) {
            return Err(DubError::Config("Speaker reference length must be positive".to_string()));
        }
        if !(self.transcriber.silence_threshold >= 0.0 && self.transcriber.silence_threshold < 1.0) {
            return Err(DubError::Config(format!(
                "Silence threshold must be in [0, 1), got {}",
                self.transcriber.silence_threshold
            )));
        }
        if self.transcriber.max_unit_chars == 0 {
            return Err(DubError::Config("max_unit_chars must be positive".to_string()));
        }
        if self.translate.batch_size == 0 {
            return Err(DubError::Config("Translation batch size must be positive".to_string()));
        }
        if self.pipeline.jobs == 0 {
            return Err(DubError::Config("Batch jobs must be positive".to_string()));
        }
        Ok(())
    }

    /// Language handed to the speech synthesizer
    pub fn synthesis_language(&self) -> &str {
        self.synthesis
            .language
            .as_deref()
            .unwrap_or(&self.translate.target_language)
    }
}
