//! Collaborators shared by every run in the process.
//!
//! Model-backed collaborators are created once and wrapped in `Exclusive`,
//! which lets one call through at a time. Runs on different workers then
//! queue on the model instead of loading their own copy.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::media::{MediaProcessor, MediaProcessorFactory};
use crate::resync::gfpgan::GfpganRestorer;
use crate::resync::wav2lip::Wav2LipSyncer;
use crate::resync::{FaceRestorer, LipSyncer};
use crate::synth::stretch::AtempoStretcher;
use crate::synth::{SpeechSynthesizer, SynthesisOutput, SynthesisRequest, SynthesizerFactory, TimeStretcher};
use crate::transcribe::{Transcriber, TranscriberFactory};
use crate::transcript::RawTranscript;
use crate::translate::{Translator, TranslatorFactory};

/// Serializes access to a collaborator that is not safe to call concurrently
pub struct Exclusive<T: ?Sized> {
    lock: Mutex<()>,
    inner: Box<T>,
}

impl<T: ?Sized> Exclusive<T> {
    pub fn new(inner: Box<T>) -> Self {
        Self {
            lock: Mutex::new(()),
            inner,
        }
    }
}

#[async_trait]
impl Transcriber for Exclusive<dyn Transcriber> {
    async fn transcribe(&self, audio_path: &Path, language_hint: Option<String>) -> Result<RawTranscript> {
        let _guard = self.lock.lock().await;
        self.inner.transcribe(audio_path, language_hint).await
    }

    fn check_availability(&self) -> Result<()> {
        self.inner.check_availability()
    }
}

#[async_trait]
impl Translator for Exclusive<dyn Translator> {
    async fn translate_batch(
        &self,
        texts: Vec<String>,
        source_language: String,
        target_language: String,
    ) -> Result<Vec<String>> {
        let _guard = self.lock.lock().await;
        self.inner.translate_batch(texts, source_language, target_language).await
    }
}

#[async_trait]
impl SpeechSynthesizer for Exclusive<dyn SpeechSynthesizer> {
    async fn synthesize(&self, request: SynthesisRequest, output_path: &Path) -> Result<SynthesisOutput> {
        let _guard = self.lock.lock().await;
        self.inner.synthesize(request, output_path).await
    }

    fn check_availability(&self) -> Result<()> {
        self.inner.check_availability()
    }
}

#[async_trait]
impl LipSyncer for Exclusive<dyn LipSyncer> {
    async fn lip_sync(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.inner.lip_sync(video, audio, output).await
    }

    fn check_availability(&self) -> Result<()> {
        self.inner.check_availability()
    }
}

#[async_trait]
impl FaceRestorer for Exclusive<dyn FaceRestorer> {
    async fn restore_frame(&self, frame: &Path, output: &Path) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.inner.restore_frame(frame, output).await
    }

    // One lock for the whole folder so frames of two runs never interleave
    async fn restore_frames(&self, frames_dir: &Path, output_dir: &Path) -> Result<usize> {
        let _guard = self.lock.lock().await;
        self.inner.restore_frames(frames_dir, output_dir).await
    }
}

/// Every collaborator a run needs
#[derive(Clone)]
pub struct Services {
    pub media: Arc<dyn MediaProcessor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub stretcher: Arc<dyn TimeStretcher>,
    pub lip_syncer: Arc<dyn LipSyncer>,
    pub face_restorer: Arc<dyn FaceRestorer>,
}

impl Services {
    /// Build the command-line backed collaborators described by `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let media: Arc<dyn MediaProcessor> =
            Arc::from(MediaProcessorFactory::create_processor(config.media.clone()));

        let transcriber: Box<dyn Transcriber> =
            TranscriberFactory::create_transcriber(config.transcriber.clone());
        let translator: Box<dyn Translator> =
            TranslatorFactory::create_translator(config.translate.clone())?;
        let synthesizer: Box<dyn SpeechSynthesizer> =
            SynthesizerFactory::create_synthesizer(config.synthesis.clone());
        let lip_syncer: Box<dyn LipSyncer> = Box::new(Wav2LipSyncer::new(config.resync.clone()));
        let face_restorer: Box<dyn FaceRestorer> = Box::new(GfpganRestorer::new(config.resync.clone()));

        Ok(Self {
            stretcher: Arc::new(AtempoStretcher::new(media.clone())),
            media,
            transcriber: Arc::new(Exclusive::new(transcriber)),
            translator: Arc::new(Exclusive::new(translator)),
            synthesizer: Arc::new(Exclusive::new(synthesizer)),
            lip_syncer: Arc::new(Exclusive::new(lip_syncer)),
            face_restorer: Arc::new(Exclusive::new(face_restorer)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingTranscriber {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, _: &Path, _: Option<String>) -> Result<RawTranscript> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(RawTranscript::default())
        }

        fn check_availability(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_exclusive_allows_one_call_at_a_time() {
        let peak = Arc::new(AtomicUsize::new(0));
        let inner: Box<dyn Transcriber> = Box::new(CountingTranscriber {
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        });
        let shared: Arc<dyn Transcriber> = Arc::new(Exclusive::new(inner));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..4 {
            let shared = shared.clone();
            tasks.spawn(async move { shared.transcribe(Path::new("a.wav"), None).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
