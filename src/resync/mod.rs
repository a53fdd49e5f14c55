// Lip resynthesis and face restoration
//
// - Wav2Lip: lip-sync through the Wav2Lip inference script
// - GFPGAN: face restoration through the GFPGAN inference script

pub mod gfpgan;
pub mod wav2lip;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{DubError, Result};
use crate::media::MediaProcessor;

/// Video-in, video-out lip-sync collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LipSyncer: Send + Sync {
    /// Re-render mouth movement in `video` to follow `audio`
    async fn lip_sync(&self, video: &Path, audio: &Path, output: &Path) -> Result<()>;

    fn check_availability(&self) -> Result<()>;
}

/// Frame-in, frame-out face restoration collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FaceRestorer: Send + Sync {
    async fn restore_frame(&self, frame: &Path, output: &Path) -> Result<()>;

    /// Restore every PNG in `frames_dir` into `output_dir` under the same name.
    /// Backends that can process a folder in one go override this.
    async fn restore_frames(&self, frames_dir: &Path, output_dir: &Path) -> Result<usize> {
        tokio::fs::create_dir_all(output_dir).await?;
        let frames = list_frames(frames_dir).await?;
        for frame in &frames {
            let name = frame
                .file_name()
                .ok_or_else(|| DubError::Media(format!("Invalid frame path {}", frame.display())))?;
            self.restore_frame(frame, &output_dir.join(name)).await?;
        }
        Ok(frames.len())
    }
}

/// Numbered PNG frames in a directory, in order
pub async fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")) {
            frames.push(path);
        }
    }
    frames.sort();
    Ok(frames)
}

/// Which parts of resynthesis run; fixed when a run starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncFlags {
    pub skip_lipsync: bool,
    pub skip_face_restore: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncOutput {
    pub video: PathBuf,
    pub lip_synced: bool,
    pub face_restored: bool,
}

/// Feeds the original video and the assembled audio to the lip and face
/// collaborators and produces the final video.
pub struct ResynthesisAdapter {
    media: Arc<dyn MediaProcessor>,
    lip_syncer: Arc<dyn LipSyncer>,
    face_restorer: Arc<dyn FaceRestorer>,
    fps: Option<f64>,
}

impl ResynthesisAdapter {
    pub fn new(
        media: Arc<dyn MediaProcessor>,
        lip_syncer: Arc<dyn LipSyncer>,
        face_restorer: Arc<dyn FaceRestorer>,
        fps: Option<f64>,
    ) -> Self {
        Self {
            media,
            lip_syncer,
            face_restorer,
            fps,
        }
    }

    /// Any failure is a `Resynthesis` error pointing at `audio`, which is a
    /// complete audio-only dub on its own.
    pub async fn resynthesize(
        &self,
        video: &Path,
        audio: &Path,
        flags: ResyncFlags,
        work_dir: &Path,
        output: &Path,
    ) -> Result<ResyncOutput> {
        self.run(video, audio, flags, work_dir, output)
            .await
            .map_err(|e| {
                warn!("Resynthesis failed, audio-only result kept at {}", audio.display());
                DubError::Resynthesis {
                    message: e.to_string(),
                    partial_audio: audio.to_path_buf(),
                }
            })
    }

    async fn run(
        &self,
        video: &Path,
        audio: &Path,
        flags: ResyncFlags,
        work_dir: &Path,
        output: &Path,
    ) -> Result<ResyncOutput> {
        tokio::fs::create_dir_all(work_dir).await?;

        if flags.skip_lipsync {
            info!("Lip-sync disabled, muxing original video with dubbed audio");
            self.media.mux_audio_video(video, audio, output).await?;
            return Ok(ResyncOutput {
                video: output.to_path_buf(),
                lip_synced: false,
                face_restored: false,
            });
        }

        let lip_synced = work_dir.join("lipsync.mp4");
        self.lip_syncer.lip_sync(video, audio, &lip_synced).await?;

        if flags.skip_face_restore {
            self.media.mux_audio_video(&lip_synced, audio, output).await?;
            return Ok(ResyncOutput {
                video: output.to_path_buf(),
                lip_synced: true,
                face_restored: false,
            });
        }

        let fps = match self.fps {
            Some(fps) => fps,
            None => self.media.probe_frame_rate(&lip_synced).await?,
        };

        let frames_dir = work_dir.join("frames");
        let restored_dir = work_dir.join("restored");
        self.media.extract_frames(&lip_synced, &frames_dir).await?;

        let restored = self.face_restorer.restore_frames(&frames_dir, &restored_dir).await?;
        if restored == 0 {
            return Err(DubError::Media("Lip-synced video produced no frames".to_string()));
        }
        info!("Restored {} frames", restored);

        self.media.encode_frames(&restored_dir, fps, audio, output).await?;

        Ok(ResyncOutput {
            video: output.to_path_buf(),
            lip_synced: true,
            face_restored: true,
        })
    }
}
