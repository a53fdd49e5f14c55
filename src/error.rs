use std::path::PathBuf;
use thiserror::Error;

/// Exit codes reported by the binary, one per fatal stage so retry tooling
/// can tell failures apart without parsing log output.
pub mod exit_code {
    pub const GENERIC: u8 = 1;
    pub const INPUT: u8 = 2;
    pub const EXTRACTION: u8 = 10;
    pub const TRANSCRIPTION: u8 = 11;
    pub const TRANSLATION: u8 = 12;
    pub const SYNTHESIS: u8 = 13;
    pub const ASSEMBLY: u8 = 14;
    pub const RESYNC: u8 = 15;
}

#[derive(Error, Debug)]
pub enum DubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Time window [{start:.3}s, {end:.3}s] is out of range (media duration: {media_duration:?})")]
    OutOfRangeWindow {
        start: f64,
        end: f64,
        media_duration: Option<f64>,
    },

    #[error("Media extraction error: {0}")]
    MediaExtraction(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Translation failed for unit {index}: {message}")]
    Translation { index: usize, message: String },

    #[error("Speech synthesis failed for unit {index}: {message}")]
    Synthesis { index: usize, message: String },

    #[error("Timeline assembly error: {0}")]
    Assembly(String),

    #[error("Resynthesis error: {message} (audio-only result: {})", .partial_audio.display())]
    Resynthesis {
        message: String,
        partial_audio: PathBuf,
    },

    #[error("Stage '{stage}' timed out after {seconds} seconds")]
    StageTimeout { stage: String, seconds: u64 },

    #[error("Invalid run state: {0}")]
    RunState(String),

    /// Any other error, attributed to the stage it ended
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed { stage: String, source: Box<DubError> },
}

/// Exit code for a failure of the stage with this label
pub fn stage_exit_code(stage: &str) -> u8 {
    match stage {
        "extracting" => exit_code::EXTRACTION,
        "transcribing" => exit_code::TRANSCRIPTION,
        "translating" => exit_code::TRANSLATION,
        "synthesizing" => exit_code::SYNTHESIS,
        "assembling" => exit_code::ASSEMBLY,
        "resyncing" => exit_code::RESYNC,
        _ => exit_code::GENERIC,
    }
}

impl DubError {
    /// Exit code for the process when this error ends a run.
    pub fn exit_code(&self) -> u8 {
        match self {
            DubError::OutOfRangeWindow { .. } | DubError::MediaExtraction(_) => {
                exit_code::EXTRACTION
            }
            DubError::Transcription(_) => exit_code::TRANSCRIPTION,
            DubError::Translation { .. } => exit_code::TRANSLATION,
            DubError::Synthesis { .. } => exit_code::SYNTHESIS,
            DubError::Assembly(_) => exit_code::ASSEMBLY,
            DubError::Resynthesis { .. } => exit_code::RESYNC,
            DubError::StageTimeout { stage, .. } | DubError::StageFailed { stage, .. } => {
                stage_exit_code(stage)
            }
            DubError::Config(_) | DubError::FileNotFound(_) | DubError::Toml(_) => exit_code::INPUT,
            _ => exit_code::GENERIC,
        }
    }

    /// Tag an error raised while `stage` ran with that stage. Errors that
    /// already map to the stage's exit code are returned as they are.
    pub fn in_stage(self, stage: &str) -> DubError {
        if self.exit_code() == stage_exit_code(stage) {
            self
        } else {
            DubError::StageFailed {
                stage: stage.to_string(),
                source: Box::new(self),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, DubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_stage() {
        let codes = [
            DubError::MediaExtraction("corrupt".into()).exit_code(),
            DubError::Transcription("model".into()).exit_code(),
            DubError::Translation { index: 3, message: "x".into() }.exit_code(),
            DubError::Synthesis { index: 0, message: "x".into() }.exit_code(),
            DubError::Assembly("x".into()).exit_code(),
            DubError::Resynthesis {
                message: "x".into(),
                partial_audio: PathBuf::from("a.wav"),
            }
            .exit_code(),
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
        assert!(codes.iter().all(|c| *c != 0));
    }

    #[test]
    fn test_timeout_maps_to_stage_code() {
        let err = DubError::StageTimeout { stage: "translating".into(), seconds: 5 };
        assert_eq!(err.exit_code(), exit_code::TRANSLATION);
    }

    #[test]
    fn test_generic_errors_take_the_stage_code() {
        let err = DubError::Media("no RIFF tag found".into()).in_stage("assembling");
        assert_eq!(err.exit_code(), exit_code::ASSEMBLY);
        assert!(err.to_string().contains("no RIFF tag found"));

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(DubError::from(io).in_stage("synthesizing").exit_code(), exit_code::SYNTHESIS);
    }

    #[test]
    fn test_stage_errors_pass_through_unchanged() {
        let err = DubError::Translation { index: 2, message: "x".into() }.in_stage("translating");
        assert!(matches!(err, DubError::Translation { index: 2, .. }));
    }

    #[test]
    fn test_out_of_range_is_extraction_failure() {
        let err = DubError::OutOfRangeWindow { start: 1.0, end: 1.0, media_duration: None };
        assert_eq!(err.exit_code(), exit_code::EXTRACTION);
    }
}
