use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use super::TimeStretcher;
use crate::media::MediaProcessor;
use crate::error::Result;

/// Time stretching through ffmpeg's `atempo`, which keeps pitch
pub struct AtempoStretcher {
    media: Arc<dyn MediaProcessor>,
}

impl AtempoStretcher {
    pub fn new(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media }
    }
}

#[async_trait]
impl TimeStretcher for AtempoStretcher {
    async fn stretch(&self, input: &Path, output: &Path, tempo: f64, sample_rate: u32) -> Result<()> {
        self.media.time_stretch(input, output, tempo, sample_rate).await
    }
}
