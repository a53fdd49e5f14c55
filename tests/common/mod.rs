//! In-process collaborators for driving whole runs without ffmpeg, models or
//! network access. Every fake writes real files so stages downstream read
//! what they would read in production.

#![allow(dead_code)]

use assert_fs::TempDir;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dubsync::audio::{self, Waveform};
use dubsync::config::Config;
use dubsync::error::{DubError, Result};
use dubsync::media::MediaProcessor;
use dubsync::pipeline::{PipelineRun, Services, Stage};
use dubsync::resync::{FaceRestorer, LipSyncer};
use dubsync::synth::stretch::AtempoStretcher;
use dubsync::synth::{SpeechSynthesizer, SynthesisOutput, SynthesisRequest, SynthesizedClip};
use dubsync::timing::{seconds_to_samples, TimeWindow};
use dubsync::transcribe::Transcriber;
use dubsync::transcript::{RawSegment, RawTranscript};
use dubsync::translate::Translator;
use dubsync::workflow::Workflow;

pub const SAMPLE_RATE: u32 = 16000;

/// Translation the fake translator produces for `text`
pub fn dubbed(text: &str) -> String {
    format!("hi:{}", text)
}

#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }
}

/// Source audio is a quiet tone unless `silent` is set
pub struct FakeMedia {
    pub duration: f64,
    pub silent: AtomicBool,
    pub log: CallLog,
}

impl FakeMedia {
    pub fn new(duration: f64) -> Self {
        Self { duration, silent: AtomicBool::new(false), log: CallLog::default() }
    }
}

#[async_trait]
impl MediaProcessor for FakeMedia {
    async fn probe_duration(&self, _media_path: &Path) -> Result<f64> {
        Ok(self.duration)
    }

    async fn probe_frame_rate(&self, _video_path: &Path) -> Result<f64> {
        Ok(25.0)
    }

    async fn extract_video_segment(&self, _source: &Path, window: TimeWindow, output_path: &Path) -> Result<()> {
        self.log.record("extract_video");
        std::fs::write(output_path, format!("video {}", window))?;
        Ok(())
    }

    async fn extract_audio_segment(
        &self,
        _source: &Path,
        window: TimeWindow,
        output_path: &Path,
        sample_rate: u32,
    ) -> Result<()> {
        self.log.record("extract_audio");
        let len = seconds_to_samples(window.duration(), sample_rate);
        let wave = if self.silent.load(Ordering::SeqCst) {
            Waveform::silence(len, sample_rate)
        } else {
            Waveform {
                samples: (0..len).map(|i| 0.1 * (i as f32 * 0.05).sin()).collect(),
                sample_rate,
            }
        };
        audio::write_wav(output_path, &wave)
    }

    async fn mux_audio_video(&self, video_path: &Path, audio_path: &Path, output_path: &Path) -> Result<()> {
        self.log.record("mux");
        let video = std::fs::read_to_string(video_path)?;
        let seconds = audio::wav_duration(audio_path)?;
        std::fs::write(output_path, format!("{} + {:.3}s audio", video, seconds))?;
        Ok(())
    }

    /// Nearest-sample resampling, enough to give the clip its new length
    async fn time_stretch(&self, input_path: &Path, output_path: &Path, tempo: f64, sample_rate: u32) -> Result<()> {
        self.log.record("time_stretch");
        let input = audio::read_wav(input_path)?;
        let len = (input.samples.len() as f64 / tempo).round() as usize;
        let samples = (0..len)
            .map(|i| {
                let source = ((i as f64 * tempo) as usize).min(input.samples.len().saturating_sub(1));
                input.samples.get(source).copied().unwrap_or(0.0)
            })
            .collect();
        audio::write_wav(output_path, &Waveform { samples, sample_rate })
    }

    async fn extract_frames(&self, _video_path: &Path, frames_dir: &Path) -> Result<()> {
        self.log.record("extract_frames");
        std::fs::create_dir_all(frames_dir)?;
        for i in 1..=3 {
            std::fs::write(frames_dir.join(format!("{:06}.png", i)), format!("frame {}", i))?;
        }
        Ok(())
    }

    async fn encode_frames(&self, frames_dir: &Path, _fps: f64, _audio_path: &Path, output_path: &Path) -> Result<()> {
        self.log.record("encode_frames");
        let count = std::fs::read_dir(frames_dir)?.count();
        std::fs::write(output_path, format!("{} restored frames", count))?;
        Ok(())
    }

    fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

pub struct FakeTranscriber {
    pub transcript: RawTranscript,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _audio_path: &Path, _language_hint: Option<String>) -> Result<RawTranscript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript.clone())
    }

    fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

/// Fails any text containing `FAIL`, and every call while `down` is set
#[derive(Default)]
pub struct FakeTranslator {
    pub down: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate_batch(
        &self,
        texts: Vec<String>,
        _source_language: String,
        _target_language: String,
    ) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(DubError::Config("connection refused".to_string()));
        }
        if texts.iter().any(|t| t.contains("FAIL")) {
            return Err(DubError::Config("model returned garbage".to_string()));
        }
        Ok(texts.iter().map(|t| dubbed(t)).collect())
    }
}

/// Speaks each text for the natural duration registered for it (1s otherwise)
pub struct FakeSynthesizer {
    pub natural: HashMap<String, f64>,
    pub log: CallLog,
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest, output_path: &Path) -> Result<SynthesisOutput> {
        self.log.record(request.text.clone());
        let natural = self.natural.get(&request.text).copied().unwrap_or(1.0);
        let wave = Waveform {
            samples: vec![0.25; seconds_to_samples(natural, SAMPLE_RATE)],
            sample_rate: SAMPLE_RATE,
        };
        audio::write_wav(output_path, &wave)?;
        Ok(SynthesisOutput {
            audio: output_path.to_path_buf(),
            natural_duration: natural,
        })
    }

    fn check_availability(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLipSyncer {
    pub fail: AtomicBool,
    pub log: CallLog,
}

#[async_trait]
impl LipSyncer for FakeLipSyncer {
    async fn lip_sync(&self, video: &Path, _audio: &Path, output: &Path) -> Result<()> {
        self.log.record("lip_sync");
        if self.fail.load(Ordering::SeqCst) {
            return Err(DubError::Media("CUDA out of memory".to_string()));
        }
        std::fs::copy(video, output)?;
        Ok(())
    }

    fn check_availability(&self) -> Result<()> {
        self.log.record("check_availability");
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFaceRestorer {
    pub log: CallLog,
}

#[async_trait]
impl FaceRestorer for FakeFaceRestorer {
    async fn restore_frame(&self, frame: &Path, output: &Path) -> Result<()> {
        self.log.record("restore_frame");
        std::fs::copy(frame, output)?;
        Ok(())
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub media: Arc<FakeMedia>,
    pub transcriber: Arc<FakeTranscriber>,
    pub translator: Arc<FakeTranslator>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub lip_syncer: Arc<FakeLipSyncer>,
    pub face_restorer: Arc<FakeFaceRestorer>,
}

impl Harness {
    /// `segments` are (start, end, text) relative to the extracted segment;
    /// `natural` maps source text to the synthesized speech duration
    pub fn new(media_duration: f64, segments: &[(f64, f64, &str)], natural: &[(&str, f64)]) -> Self {
        let transcript = RawTranscript {
            language: Some("EN".to_string()),
            segments: segments
                .iter()
                .map(|(start, end, text)| RawSegment {
                    start: *start,
                    end: *end,
                    text: text.to_string(),
                    words: Vec::new(),
                })
                .collect(),
        };

        Self {
            temp: TempDir::new().unwrap(),
            media: Arc::new(FakeMedia::new(media_duration)),
            transcriber: Arc::new(FakeTranscriber { transcript, calls: AtomicUsize::new(0) }),
            translator: Arc::new(FakeTranslator::default()),
            synthesizer: Arc::new(FakeSynthesizer {
                natural: natural.iter().map(|(text, d)| (dubbed(text), *d)).collect(),
                log: CallLog::default(),
            }),
            lip_syncer: Arc::new(FakeLipSyncer::default()),
            face_restorer: Arc::new(FakeFaceRestorer::default()),
        }
    }

    pub fn services(&self) -> Arc<Services> {
        let media: Arc<dyn MediaProcessor> = self.media.clone();
        Arc::new(Services {
            stretcher: Arc::new(AtempoStretcher::new(media.clone())),
            media,
            transcriber: self.transcriber.clone(),
            translator: self.translator.clone(),
            synthesizer: self.synthesizer.clone(),
            lip_syncer: self.lip_syncer.clone(),
            face_restorer: self.face_restorer.clone(),
        })
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.pipeline.work_dir = self.temp.path().join("runs");
        config.segment.audio_sample_rate = SAMPLE_RATE;
        config.assembly.sample_rate = SAMPLE_RATE;
        // Short enough that neighbouring test sentences are never merged
        config.transcriber.max_unit_chars = 24;
        config
    }

    pub fn workflow(&self) -> Workflow {
        Workflow::with_services(self.config(), self.services()).unwrap()
    }

    pub fn source(&self) -> PathBuf {
        let path = self.temp.path().join("talk.mp4");
        if !path.exists() {
            std::fs::write(&path, b"source video").unwrap();
        }
        path
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp.path().join("out")
    }

    pub fn run_dir(&self, run: &PipelineRun) -> PathBuf {
        self.temp.path().join("runs").join(&run.id)
    }

    pub fn artifact(&self, run: &PipelineRun, stage: Stage, name: &str) -> PathBuf {
        let path = run.artifact(stage, name).unwrap();
        self.run_dir(run).join(path)
    }

    pub fn clips(&self, run: &PipelineRun) -> Vec<SynthesizedClip> {
        let path = self.artifact(run, Stage::Synthesizing, "clips");
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }
}
