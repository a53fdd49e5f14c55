//! Drives a `PipelineRun` through its stages.
//!
//! Each stage reads the documents earlier stages persisted in the run's
//! working area, writes its own, and only then is the run advanced and its
//! manifest saved. A run interrupted anywhere can therefore be picked up
//! from the stage after the last one recorded in `run.json`.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use super::run::{PipelineRun, RunOptions, RunSettings, Stage, StageArtifacts};
use super::services::Services;
use crate::assemble::{AssembledTimeline, TimelineAssembler};
use crate::config::Config;
use crate::error::{DubError, Result};
use crate::extract::{ExtractedSegment, SegmentExtractor};
use crate::quality::QualityReport;
use crate::resync::ResynthesisAdapter;
use crate::subtitle::{generate_srt, write_json_sidecar, OutputPaths, Sidecar};
use crate::synth::{DurationMatchedSynthesizer, SynthesizedClip};
use crate::timing::TimeWindow;
use crate::transcribe::TimedTranscriptBuilder;
use crate::transcript::{Transcript, Translation};
use crate::translate::TranslationAdapter;
use crate::workspace::{RunDir, Workspace};

const SEGMENT_DOC: &str = "segment.json";
const TRANSCRIPT_DOC: &str = "transcript.json";
const TRANSLATION_DOC: &str = "translation.json";
const CLIPS_DOC: &str = "clips.json";
const TIMELINE_DOC: &str = "timeline.json";
const RESYNC_DOC: &str = "resync.json";
const DUBBED_AUDIO: &str = "dubbed.wav";

pub struct Orchestrator {
    services: Arc<Services>,
    workspace: Workspace,
}

impl Orchestrator {
    pub fn new(services: Arc<Services>, workspace: Workspace) -> Self {
        Self { services, workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Freeze the settings of a new run and persist its manifest
    pub fn create_run(&self, mut config: Config, options: RunOptions, segment: TimeWindow) -> Result<PipelineRun> {
        // The snapshot records the language actually used
        config.translate.target_language = options.target_language.clone();
        let options = RunOptions {
            source: std::path::absolute(&options.source)?,
            output_dir: std::path::absolute(&options.output_dir)?,
            ..options
        };

        let lip_sync_available = options.flags.skip_lipsync || {
            match self.services.lip_syncer.check_availability() {
                Ok(()) => true,
                Err(e) => {
                    info!("Lip-sync unavailable: {}", e);
                    false
                }
            }
        };
        let settings = RunSettings::resolve(config, options, lip_sync_available);

        let run = PipelineRun::new(Uuid::new_v4().to_string(), segment, settings);
        let dir = self.workspace.create_run(&run.id)?;
        dir.save_manifest(&run)?;
        info!("Created run {} for {} {}", run.id, run.settings.options.source.display(), segment);
        Ok(run)
    }

    pub async fn start(&self, config: Config, options: RunOptions, segment: TimeWindow) -> Result<PipelineRun> {
        let run = self.create_run(config, options, segment)?;
        self.drive(run).await
    }

    /// Continue a failed or interrupted run from the stage after its last
    /// completed one
    pub async fn resume(&self, id: &str) -> Result<PipelineRun> {
        let run = self.workspace.load_run(id)?.resume()?;
        if let Some(stage) = run.current_stage() {
            info!("Resuming run {} at {}", id, stage);
        }
        self.drive(run).await
    }

    /// Run stages until the run is done or a stage fails. A failure is
    /// recorded in the manifest before the error is returned.
    pub async fn drive(&self, run: PipelineRun) -> Result<PipelineRun> {
        let span = info_span!("run", id = %run.id);
        self.drive_stages(run).instrument(span).await
    }

    async fn drive_stages(&self, mut run: PipelineRun) -> Result<PipelineRun> {
        let dir = self.workspace.open_run(&run.id)?;
        dir.save_manifest(&run)?;

        while let Some(stage) = run.current_stage() {
            info!("Stage {}", stage);
            let mut report = QualityReport::new();

            match self.run_stage_with_timeout(stage, &run, &dir, &mut report).await {
                Ok(artifacts) => {
                    run = run.complete_stage(stage, artifacts, report)?;
                    run.updated_at = Utc::now();
                    dir.save_manifest(&run)?;
                }
                Err(e) => {
                    error!("Stage {} failed: {}", stage, e);
                    run.warnings.extend(report);
                    run = run.fail(stage, e.to_string());
                    run.updated_at = Utc::now();
                    dir.save_manifest(&run)?;
                    return Err(e.in_stage(stage.label()));
                }
            }
        }

        info!(
            "Run finished with {} warnings ({} degraded clips, {} timing conflicts)",
            run.warnings.warnings.len(),
            run.warnings.degraded_clips(),
            run.warnings.timing_conflicts()
        );
        Ok(run)
    }

    async fn run_stage_with_timeout(
        &self,
        stage: Stage,
        run: &PipelineRun,
        dir: &RunDir,
        report: &mut QualityReport,
    ) -> Result<StageArtifacts> {
        let work = self.run_stage(stage, run, dir, report);
        match run.settings.config.pipeline.stage_timeout_secs {
            Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), work)
                .await
                .map_err(|_| DubError::StageTimeout {
                    stage: stage.label().to_string(),
                    seconds,
                })?,
            None => work.await,
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        run: &PipelineRun,
        dir: &RunDir,
        report: &mut QualityReport,
    ) -> Result<StageArtifacts> {
        match stage {
            Stage::Extracting => self.extract(run, dir).await,
            Stage::Transcribing => self.transcribe(run, dir, report).await,
            Stage::Translating => self.translate(run, dir).await,
            Stage::Synthesizing => self.synthesize(run, dir, report).await,
            Stage::Assembling => self.assemble(run, dir, report).await,
            Stage::Resyncing => self.resync(run, dir).await,
        }
    }

    async fn extract(&self, run: &PipelineRun, dir: &RunDir) -> Result<StageArtifacts> {
        let config = &run.settings.config;
        let extractor = SegmentExtractor::new(
            self.services.media.clone(),
            config.segment.audio_sample_rate,
            config.segment.speaker_reference_seconds,
        );

        let out = dir.stage_dir(Stage::Extracting)?;
        let segment = extractor
            .extract(&run.settings.options.source, run.segment, &out)
            .await?;
        let doc = dir.write_json(Stage::Extracting, SEGMENT_DOC, &segment)?;

        Ok(StageArtifacts::new()
            .with("segment", dir.relative(&doc))
            .with("video", dir.relative(&segment.video))
            .with("audio", dir.relative(&segment.audio))
            .with("speaker_reference", dir.relative(&segment.speaker_reference)))
    }

    async fn transcribe(&self, run: &PipelineRun, dir: &RunDir, report: &mut QualityReport) -> Result<StageArtifacts> {
        let segment: ExtractedSegment = read_artifact(run, dir, Stage::Extracting, "segment")?;
        let builder = TimedTranscriptBuilder::new(
            self.services.transcriber.clone(),
            &run.settings.config.transcriber,
        );

        let transcript = builder
            .build(
                &segment.audio,
                segment.duration(),
                run.settings.options.language_hint.as_deref(),
                report,
            )
            .await?;
        let doc = dir.write_json(Stage::Transcribing, TRANSCRIPT_DOC, &transcript)?;

        Ok(StageArtifacts::new().with("transcript", dir.relative(&doc)))
    }

    async fn translate(&self, run: &PipelineRun, dir: &RunDir) -> Result<StageArtifacts> {
        let transcript: Transcript = read_artifact(run, dir, Stage::Transcribing, "transcript")?;
        let adapter = TranslationAdapter::new(
            self.services.translator.clone(),
            run.settings.config.translate.batch_size,
        );

        let translation = adapter
            .translate(&transcript, &run.settings.options.target_language)
            .await?;
        let doc = dir.write_json(Stage::Translating, TRANSLATION_DOC, &translation)?;

        Ok(StageArtifacts::new().with("translation", dir.relative(&doc)))
    }

    async fn synthesize(&self, run: &PipelineRun, dir: &RunDir, report: &mut QualityReport) -> Result<StageArtifacts> {
        let segment: ExtractedSegment = read_artifact(run, dir, Stage::Extracting, "segment")?;
        let translation: Translation = read_artifact(run, dir, Stage::Translating, "translation")?;
        let config = &run.settings.config;

        let synthesizer = DurationMatchedSynthesizer::new(
            self.services.synthesizer.clone(),
            self.services.stretcher.clone(),
            &config.synthesis,
            config.synthesis_language(),
            config.assembly.sample_rate,
        );

        let out = dir.stage_dir(Stage::Synthesizing)?;
        let clips = synthesizer
            .synthesize_all(&translation, &segment.speaker_reference, &out, report)
            .await?;
        let doc = dir.write_json(Stage::Synthesizing, CLIPS_DOC, &clips)?;

        Ok(StageArtifacts::new().with("clips", dir.relative(&doc)))
    }

    async fn assemble(&self, run: &PipelineRun, dir: &RunDir, report: &mut QualityReport) -> Result<StageArtifacts> {
        let segment: ExtractedSegment = read_artifact(run, dir, Stage::Extracting, "segment")?;
        let clips: Vec<SynthesizedClip> = read_artifact(run, dir, Stage::Synthesizing, "clips")?;
        let config = &run.settings.config.assembly;

        let assembler = TimelineAssembler::new(config.sample_rate, config.tolerance);
        let output = dir.stage_dir(Stage::Assembling)?.join(DUBBED_AUDIO);
        let timeline = assembler.assemble(&clips, segment.duration(), &output, report)?;
        let doc = dir.write_json(Stage::Assembling, TIMELINE_DOC, &timeline)?;

        Ok(StageArtifacts::new()
            .with("timeline", dir.relative(&doc))
            .with("audio", dir.relative(&timeline.audio)))
    }

    /// Sidecars are written before resynthesis so a failed resync still
    /// leaves the text next to the audio-only result
    async fn resync(&self, run: &PipelineRun, dir: &RunDir) -> Result<StageArtifacts> {
        let segment: ExtractedSegment = read_artifact(run, dir, Stage::Extracting, "segment")?;
        let translation: Translation = read_artifact(run, dir, Stage::Translating, "translation")?;
        let timeline: AssembledTimeline = read_artifact(run, dir, Stage::Assembling, "timeline")?;
        let options = &run.settings.options;

        tokio::fs::create_dir_all(&options.output_dir).await?;
        let outputs = OutputPaths::new(
            &options.output_dir,
            &options.source,
            options.output_stem.as_deref(),
            &options.target_language,
        )?;
        generate_srt(&translation, &outputs.srt).await?;
        write_json_sidecar(&Sidecar::new(&translation, run.segment), &outputs.json).await?;

        let adapter = ResynthesisAdapter::new(
            self.services.media.clone(),
            self.services.lip_syncer.clone(),
            self.services.face_restorer.clone(),
            run.settings.config.resync.fps,
        );
        let work_dir = dir.stage_dir(Stage::Resyncing)?;
        let result = adapter
            .resynthesize(&segment.video, &timeline.audio, options.flags, &work_dir, &outputs.video)
            .await?;
        let doc = dir.write_json(Stage::Resyncing, RESYNC_DOC, &result)?;

        info!("Dubbed video written to {}", result.video.display());
        Ok(StageArtifacts::new()
            .with("resync", dir.relative(&doc))
            .with("video", result.video)
            .with("srt", outputs.srt)
            .with("json", outputs.json))
    }
}

fn read_artifact<T: serde::de::DeserializeOwned>(
    run: &PipelineRun,
    dir: &RunDir,
    stage: Stage,
    name: &str,
) -> Result<T> {
    let path = run.artifact(stage, name).ok_or_else(|| {
        DubError::RunState(format!("run {} has no '{}' artifact from {}", run.id, name, stage))
    })?;
    dir.read_json(path)
}
