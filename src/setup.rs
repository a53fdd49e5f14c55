use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::ResyncConfig;
use crate::error::{DubError, Result};
use crate::resync::wav2lip::Wav2LipSyncer;

/// S3FD weights live inside the Wav2Lip checkout, where its face detector loads them
const S3FD_PATH: &str = "face_detection/detection/sfd/s3fd.pth";

/// Model weights the resync stage depends on
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: String,
    pub description: String,
    pub destination: PathBuf,
    /// Tried in order until one succeeds
    pub urls: Vec<String>,
    pub size_mb: f64,
}

impl Checkpoint {
    pub fn is_present(&self) -> bool {
        self.destination.is_file()
    }
}

/// Weights for Wav2Lip GAN, GFPGAN v1.4 and S3FD, placed where the resync
/// collaborators look for them
pub fn checkpoints(config: &ResyncConfig) -> Vec<Checkpoint> {
    vec![
        Checkpoint {
            name: "wav2lip_gan".to_string(),
            description: "Wav2Lip GAN lip-sync".to_string(),
            destination: Wav2LipSyncer::checkpoint_path(config),
            urls: vec![
                "https://huggingface.co/camenduru/Wav2Lip/resolve/main/checkpoints/wav2lip_gan.pth".to_string(),
            ],
            size_mb: 416.0,
        },
        Checkpoint {
            name: "gfpgan".to_string(),
            description: "GFPGAN v1.4 face restoration".to_string(),
            destination: config.gfpgan_model.clone(),
            urls: vec![
                "https://github.com/TencentARC/GFPGAN/releases/download/v1.3.0/GFPGANv1.4.pth".to_string(),
            ],
            size_mb: 348.0,
        },
        Checkpoint {
            name: "s3fd".to_string(),
            description: "S3FD face detection (used by Wav2Lip)".to_string(),
            destination: config.wav2lip_dir.join(S3FD_PATH),
            urls: vec![
                "https://www.adrianbulat.com/downloads/python-fan/s3fd-619a316812.pth".to_string(),
                "https://huggingface.co/numz/wav2lip_studio/resolve/main/Wav2Lip/s3fd.pth".to_string(),
            ],
            size_mb: 86.0,
        },
    ]
}

pub struct SetupManager {
    client: Client,
}

impl SetupManager {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("dubsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Download a checkpoint unless it is already in place
    pub async fn download_checkpoint(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        if checkpoint.is_present() {
            info!("{} already exists at {}", checkpoint.name, checkpoint.destination.display());
            return Ok(checkpoint.destination.clone());
        }

        if let Some(parent) = checkpoint.destination.parent() {
            async_fs::create_dir_all(parent).await?;
        }

        let mut last_error = None;
        for url in &checkpoint.urls {
            info!("Downloading {} ({:.0} MB) from {}", checkpoint.name, checkpoint.size_mb, url);
            match self.download(url, &checkpoint.destination, checkpoint.size_mb).await {
                Ok(()) => {
                    info!("Downloaded {} to {}", checkpoint.name, checkpoint.destination.display());
                    return Ok(checkpoint.destination.clone());
                }
                Err(e) => {
                    warn!("Download of {} from {} failed: {}", checkpoint.name, url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DubError::Config(format!("No download location for {}", checkpoint.name))
        }))
    }

    async fn download(&self, url: &str, destination: &Path, size_mb: f64) -> Result<()> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(DubError::Config(format!("HTTP {} for {}", response.status(), url)));
        }

        let expected = response
            .content_length()
            .unwrap_or((size_mb * 1_000_000.0) as u64);
        let pb = ProgressBar::new(expected);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .map_err(|e| DubError::Config(format!("Invalid progress template: {}", e)))?
                .progress_chars("#>-"),
        );

        // Partial downloads never land at the destination
        let temp_path = destination.with_extension("part");
        let mut file = async_fs::File::create(&temp_path).await?;
        let result = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                pb.inc(chunk.len() as u64);
            }
            file.flush().await?;
            Ok::<(), DubError>(())
        }
        .await;
        drop(file);

        if let Err(e) = result {
            pb.abandon();
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(e);
        }

        async_fs::rename(&temp_path, destination).await?;
        pb.finish_and_clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoints_follow_resync_config() {
        let config = ResyncConfig {
            wav2lip_dir: PathBuf::from("/opt/Wav2Lip"),
            gfpgan_model: PathBuf::from("/opt/weights/GFPGANv1.4.pth"),
            ..ResyncConfig::default()
        };
        let registry = checkpoints(&config);

        let names: Vec<&str> = registry.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["wav2lip_gan", "gfpgan", "s3fd"]);
        assert_eq!(registry[0].destination, PathBuf::from("/opt/Wav2Lip/checkpoints/wav2lip_gan.pth"));
        assert_eq!(registry[1].destination, PathBuf::from("/opt/weights/GFPGANv1.4.pth"));
        assert_eq!(
            registry[2].destination,
            PathBuf::from("/opt/Wav2Lip/face_detection/detection/sfd/s3fd.pth")
        );
        assert_eq!(registry[2].urls.len(), 2);
    }

    #[tokio::test]
    async fn test_present_checkpoint_is_not_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("weights.pth");
        std::fs::write(&destination, b"weights").unwrap();

        let checkpoint = Checkpoint {
            name: "local".to_string(),
            description: String::new(),
            destination: destination.clone(),
            urls: vec!["http://127.0.0.1:9/never".to_string()],
            size_mb: 1.0,
        };
        let path = SetupManager::new().unwrap().download_checkpoint(&checkpoint).await.unwrap();
        assert_eq!(path, destination);
    }
}
