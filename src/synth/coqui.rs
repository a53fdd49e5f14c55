use async_trait::async_trait;
use std::path::Path;
use std::process::Command as StdCommand;
use tokio::process::Command;
use tracing::{debug, info};

use super::{SpeechSynthesizer, SynthesisOutput, SynthesisRequest};
use crate::audio;
use crate::config::SynthesisConfig;
use crate::error::{DubError, Result};

/// Coqui `tts` command-line synthesizer (XTTS voice cloning)
pub struct CoquiSynthesizer {
    config: SynthesisConfig,
}

impl CoquiSynthesizer {
    pub fn new(config: SynthesisConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, request: &SynthesisRequest, output_path: &Path) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("--model_name").arg(&self.config.model_name)
            .arg("--text").arg(&request.text)
            .arg("--speaker_wav").arg(&request.reference_audio)
            .arg("--language_idx").arg(&request.language)
            .arg("--out_path").arg(output_path);
        cmd
    }
}

#[async_trait]
impl SpeechSynthesizer for CoquiSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest, output_path: &Path) -> Result<SynthesisOutput> {
        if let Some(rate) = request.speaking_rate {
            debug!("tts CLI has no rate control, ignoring speaking rate {:.3}", rate);
        }

        let output = self
            .build_command(&request, output_path)
            .output()
            .await
            .map_err(|e| DubError::Media(format!("Failed to execute {}: {}", self.config.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubError::Media(format!("tts failed: {}", stderr.trim())));
        }

        if !output_path.exists() {
            return Err(DubError::FileNotFound(output_path.display().to_string()));
        }

        let natural_duration = audio::wav_duration(output_path)?;
        info!(
            "Synthesized {} chars -> {:.3}s",
            request.text.chars().count(),
            natural_duration
        );

        Ok(SynthesisOutput {
            audio: output_path.to_path_buf(),
            natural_duration,
        })
    }

    fn check_availability(&self) -> Result<()> {
        let output = StdCommand::new(&self.config.binary_path)
            .arg("--help")
            .output()
            .map_err(|e| DubError::Config(format!("tts command not found: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(DubError::Config(
                "tts not available. Install with: pip install TTS".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_command_clones_reference_voice() {
        let synth = CoquiSynthesizer::new(SynthesisConfig::default());
        let request = SynthesisRequest {
            text: "namaste duniya".to_string(),
            reference_audio: PathBuf::from("run/extract/speaker_reference.wav"),
            language: "hi".to_string(),
            speaking_rate: None,
        };
        let cmd = synth.build_command(&request, Path::new("out.wav"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        let speaker = args.iter().position(|a| a == "--speaker_wav").unwrap();
        assert_eq!(args[speaker + 1], "run/extract/speaker_reference.wav");
        let language = args.iter().position(|a| a == "--language_idx").unwrap();
        assert_eq!(args[language + 1], "hi");
        assert_eq!(args.last().unwrap(), "out.wav");
    }
}
