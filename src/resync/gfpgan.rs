use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::{list_frames, FaceRestorer};
use crate::config::ResyncConfig;
use crate::error::{DubError, Result};

/// GFPGAN v1.4 through its inference script
pub struct GfpganRestorer {
    config: ResyncConfig,
}

impl GfpganRestorer {
    pub fn new(config: ResyncConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.python_path);
        cmd.arg(&self.config.gfpgan_script)
            .arg("-i").arg(input)
            .arg("-o").arg(output_dir)
            .arg("-v").arg("1.4")
            .arg("-s").arg("1")
            .arg("--bg_upsampler").arg("none");
        cmd
    }

    async fn run(&self, input: &Path, output_dir: &Path) -> Result<()> {
        let output = self
            .build_command(input, output_dir)
            .output()
            .await
            .map_err(|e| DubError::Media(format!("Failed to execute GFPGAN: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubError::Media(format!("GFPGAN failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

#[async_trait]
impl FaceRestorer for GfpganRestorer {
    async fn restore_frame(&self, frame: &Path, output: &Path) -> Result<()> {
        let scratch = tempfile::tempdir()?;
        self.run(frame, scratch.path()).await?;

        let name = frame
            .file_name()
            .ok_or_else(|| DubError::Media(format!("Invalid frame path {}", frame.display())))?;
        let restored = scratch.path().join("restored_imgs").join(name);
        tokio::fs::copy(&restored, output).await.map_err(|e| {
            DubError::Media(format!("GFPGAN produced no {}: {}", restored.display(), e))
        })?;
        Ok(())
    }

    /// One invocation for the whole folder; loading the model per frame is slow
    async fn restore_frames(&self, frames_dir: &Path, output_dir: &Path) -> Result<usize> {
        let scratch = tempfile::tempdir()?;
        info!("Restoring faces in {}", frames_dir.display());
        self.run(frames_dir, scratch.path()).await?;

        tokio::fs::create_dir_all(output_dir).await?;
        let restored = list_frames(&scratch.path().join("restored_imgs")).await?;
        for frame in &restored {
            if let Some(name) = frame.file_name() {
                tokio::fs::copy(frame, output_dir.join(name)).await?;
            }
        }
        debug!("GFPGAN restored {} frames", restored.len());
        Ok(restored.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_uses_v14_without_background_upsampling() {
        let restorer = GfpganRestorer::new(ResyncConfig::default());
        let cmd = restorer.build_command(Path::new("frames"), Path::new("out"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect();
        assert_eq!(args[0], "GFPGAN/inference_gfpgan.py");
        let joined = args.join(" ");
        assert!(joined.contains("-i frames -o out -v 1.4 -s 1 --bg_upsampler none"));
    }
}
