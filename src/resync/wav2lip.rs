use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command as StdCommand;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::LipSyncer;
use crate::config::ResyncConfig;
use crate::error::{DubError, Result};

/// Where the inference script writes when `--outfile` is ignored
const DEFAULT_RESULT: &str = "results/result_voice.mp4";

pub struct Wav2LipSyncer {
    config: ResyncConfig,
}

impl Wav2LipSyncer {
    pub fn new(config: ResyncConfig) -> Self {
        Self { config }
    }

    /// Checkpoint location, resolved against the Wav2Lip checkout when relative
    pub fn checkpoint_path(config: &ResyncConfig) -> PathBuf {
        if config.wav2lip_checkpoint.is_absolute() {
            config.wav2lip_checkpoint.clone()
        } else {
            config.wav2lip_dir.join(&config.wav2lip_checkpoint)
        }
    }

    pub fn checkpoint_available(config: &ResyncConfig) -> bool {
        Self::checkpoint_path(config).is_file()
    }

    fn build_command(&self, video: &Path, audio: &Path, output: &Path) -> Command {
        let checkpoint = absolute(&Self::checkpoint_path(&self.config));
        let [top, bottom, left, right] = self.config.pads;

        let mut cmd = Command::new(&self.config.python_path);
        cmd.current_dir(&self.config.wav2lip_dir)
            .arg("inference.py")
            .arg("--checkpoint_path").arg(checkpoint)
            .arg("--face").arg(absolute(video))
            .arg("--audio").arg(absolute(audio))
            .arg("--outfile").arg(absolute(output))
            .arg("--resize_factor").arg(self.config.resize_factor.to_string())
            .arg("--pads")
            .arg(top.to_string())
            .arg(bottom.to_string())
            .arg(left.to_string())
            .arg(right.to_string())
            .arg("--nosmooth");

        if let Some(fps) = self.config.fps {
            cmd.arg("--fps").arg(fps.to_string());
        }

        cmd
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[async_trait]
impl LipSyncer for Wav2LipSyncer {
    async fn lip_sync(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        info!("Running Wav2Lip on {}", video.display());

        let result = self
            .build_command(video, audio, output)
            .output()
            .await
            .map_err(|e| DubError::Media(format!("Failed to execute Wav2Lip: {}", e)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(DubError::Media(format!("Wav2Lip failed: {}", stderr.trim())));
        }

        if output.exists() {
            return Ok(());
        }

        let fallback = self.config.wav2lip_dir.join(DEFAULT_RESULT);
        if fallback.exists() {
            warn!("Wav2Lip wrote to {}, moving it into place", fallback.display());
            tokio::fs::copy(&fallback, output).await?;
            return Ok(());
        }

        Err(DubError::Media("Wav2Lip produced no output video".to_string()))
    }

    fn check_availability(&self) -> Result<()> {
        let script = self.config.wav2lip_dir.join("inference.py");
        if !script.is_file() {
            return Err(DubError::FileNotFound(script.display().to_string()));
        }
        if !Self::checkpoint_available(&self.config) {
            return Err(DubError::FileNotFound(
                Self::checkpoint_path(&self.config).display().to_string(),
            ));
        }
        let output = StdCommand::new(&self.config.python_path)
            .arg("--version")
            .output()
            .map_err(|e| DubError::Config(format!("{} not found: {}", self.config.python_path, e)))?;
        debug!("Python: {}", String::from_utf8_lossy(&output.stdout).trim());
        Ok(())
    }
}
