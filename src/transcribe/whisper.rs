// openai-whisper command-line implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Command as StdCommand;
use tokio::process::Command;
use tracing::{debug, info};

use super::Transcriber;
use crate::config::TranscriberConfig;
use crate::error::{DubError, Result};
use crate::transcript::{RawSegment, RawTranscript, TimedWord};

/// Whisper JSON output format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperOutput {
    #[serde(default)]
    pub text: String,
    pub segments: Vec<WhisperSegment>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default)]
    pub words: Vec<WhisperWord>,
    pub no_speech_prob: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperWord {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

impl From<WhisperOutput> for RawTranscript {
    fn from(output: WhisperOutput) -> Self {
        RawTranscript {
            language: output.language,
            segments: output
                .segments
                .into_iter()
                .map(|seg| RawSegment {
                    start: seg.start,
                    end: seg.end,
                    text: seg.text.trim().to_string(),
                    words: seg
                        .words
                        .into_iter()
                        .map(|w| TimedWord {
                            word: w.word.trim().to_string(),
                            start: w.start,
                            end: w.end,
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

pub struct WhisperTranscriber {
    config: TranscriberConfig,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, audio_path: &Path, output_dir: &Path, language: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg(audio_path)
            .arg("--model").arg(self.config.model.as_str())
            .arg("--output_dir").arg(output_dir)
            .arg("--output_format").arg("json")
            .arg("--verbose").arg("False");

        if self.config.word_timestamps {
            cmd.arg("--word_timestamps").arg("True");
        }

        if let Some(lang) = language {
            cmd.arg("--language").arg(lang);
        }

        cmd
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio_path: &Path, language_hint: Option<String>) -> Result<RawTranscript> {
        info!(
            "Transcribing {} with whisper model {}",
            audio_path.display(),
            self.config.model
        );

        let temp_dir = tempfile::tempdir()
            .map_err(|e| DubError::Transcription(format!("Failed to create temp directory: {}", e)))?;
        let output_dir = temp_dir.path();

        let output = self
            .build_command(audio_path, output_dir, language_hint.as_deref())
            .output()
            .await
            .map_err(|e| DubError::Transcription(format!("Failed to execute whisper: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubError::Transcription(format!(
                "whisper failed: {}",
                stderr.trim()
            )));
        }

        let stem = audio_path
            .file_stem()
            .ok_or_else(|| DubError::Transcription("Invalid audio filename".to_string()))?;
        let json_file = output_dir.join(format!("{}.json", stem.to_string_lossy()));

        let json_content = tokio::fs::read_to_string(&json_file)
            .await
            .map_err(|e| DubError::Transcription(format!("Whisper JSON output not readable: {}", e)))?;

        let parsed = parse_whisper_json(&json_content)?;
        debug!("Whisper returned {} segments", parsed.segments.len());
        Ok(parsed)
    }

    fn check_availability(&self) -> Result<()> {
        let output = StdCommand::new(&self.config.binary_path)
            .arg("--help")
            .output()
            .map_err(|e| DubError::Transcription(format!("whisper command not found: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(DubError::Transcription(
                "whisper not available. Install with: pip install openai-whisper".to_string(),
            ))
        }
    }
}

pub fn parse_whisper_json(json: &str) -> Result<RawTranscript> {
    let output: WhisperOutput = serde_json::from_str(json)
        .map_err(|e| DubError::Transcription(format!("Failed to parse whisper JSON: {}", e)))?;
    Ok(output.into())
}
