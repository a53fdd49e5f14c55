//! Run state machine.
//!
//! `PipelineRun` is only changed through the transition functions below,
//! which take the run by value and return the next one. They do no I/O so
//! the orchestrator can persist the result before acting on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{DubError, Result};
use crate::quality::QualityReport;
use crate::resync::ResyncFlags;
use crate::timing::TimeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extracting,
    Transcribing,
    Translating,
    Synthesizing,
    Assembling,
    Resyncing,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Extracting,
        Stage::Transcribing,
        Stage::Translating,
        Stage::Synthesizing,
        Stage::Assembling,
        Stage::Resyncing,
    ];

    /// Label used in logs, error messages and working-area directory names
    pub fn label(self) -> &'static str {
        match self {
            Stage::Extracting => "extracting",
            Stage::Transcribing => "transcribing",
            Stage::Translating => "translating",
            Stage::Synthesizing => "synthesizing",
            Stage::Assembling => "assembling",
            Stage::Resyncing => "resyncing",
        }
    }

    pub fn next(self) -> Option<Stage> {
        let position = Stage::ALL.iter().position(|s| *s == self)?;
        Stage::ALL.get(position + 1).copied()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunState {
    Active {
        stage: Stage,
    },
    Done,
    Failed {
        stage: Stage,
        reason: String,
        last_completed: Option<Stage>,
    },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Active { stage } => write!(f, "{}", stage),
            RunState::Done => write!(f, "done"),
            RunState::Failed { stage, reason, .. } => write!(f, "failed while {}: {}", stage, reason),
        }
    }
}

/// Files a stage wrote, by name, relative to the run directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageArtifacts {
    pub files: BTreeMap<String, PathBuf>,
}

impl StageArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, path: impl Into<PathBuf>) -> Self {
        self.files.insert(name.to_string(), path.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PathBuf> {
        self.files.get(name)
    }
}

/// Per-run options from the command line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub source: PathBuf,
    pub output_dir: PathBuf,
    pub language_hint: Option<String>,
    pub target_language: String,
    pub flags: ResyncFlags,
    /// Base name of the final outputs when the source stem is not unique
    #[serde(default)]
    pub output_stem: Option<String>,
}

/// Immutable snapshot of everything that parameterizes a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub config: Config,
    pub options: RunOptions,
}

impl RunSettings {
    /// Freeze the configuration for one run. Lip-sync that cannot run turns
    /// into an audio-only dub here, once, rather than failing later.
    pub fn resolve(config: Config, mut options: RunOptions, lip_sync_available: bool) -> Self {
        if !config.resync.face_restore {
            options.flags.skip_face_restore = true;
        }
        if !options.flags.skip_lipsync && !lip_sync_available {
            tracing::warn!("Lip-sync model unavailable, producing an audio-only dub");
            options.flags.skip_lipsync = true;
        }
        Self { config, options }
    }
}

/// One dubbing run of one segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub segment: TimeWindow,
    pub state: RunState,
    pub artifacts: BTreeMap<Stage, StageArtifacts>,
    pub settings: RunSettings,
    pub warnings: QualityReport,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineRun {
    pub fn new(id: impl Into<String>, segment: TimeWindow, settings: RunSettings) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            segment,
            state: RunState::Active {
                stage: Stage::Extracting,
            },
            artifacts: BTreeMap::new(),
            settings,
            warnings: QualityReport::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn current_stage(&self) -> Option<Stage> {
        match self.state {
            RunState::Active { stage } => Some(stage),
            _ => None,
        }
    }

    /// Latest stage whose artifacts were persisted, counting only an
    /// unbroken prefix of the stage order
    pub fn last_completed(&self) -> Option<Stage> {
        Stage::ALL
            .iter()
            .take_while(|stage| self.artifacts.contains_key(stage))
            .last()
            .copied()
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.state, RunState::Active { .. })
    }

    pub fn artifact(&self, stage: Stage, name: &str) -> Option<&PathBuf> {
        self.artifacts.get(&stage).and_then(|a| a.get(name))
    }

    /// Record a stage's outputs and move to the next stage (or `Done`)
    pub fn complete_stage(
        mut self,
        stage: Stage,
        artifacts: StageArtifacts,
        warnings: QualityReport,
    ) -> Result<PipelineRun> {
        if self.current_stage() != Some(stage) {
            return Err(DubError::RunState(format!(
                "cannot complete {} while run {} is {}",
                stage, self.id, self.state
            )));
        }
        self.artifacts.insert(stage, artifacts);
        self.warnings.extend(warnings);
        self.state = match stage.next() {
            Some(next) => RunState::Active { stage: next },
            None => RunState::Done,
        };
        Ok(self)
    }

    /// Terminal failure. Artifacts of completed stages are kept.
    pub fn fail(mut self, stage: Stage, reason: impl Into<String>) -> PipelineRun {
        let last_completed = self.last_completed();
        self.state = RunState::Failed {
            stage,
            reason: reason.into(),
            last_completed,
        };
        self
    }

    /// Re-enter the stage after the last completed one
    pub fn resume(mut self) -> Result<PipelineRun> {
        if self.state == RunState::Done {
            return Err(DubError::RunState(format!("run {} is already done", self.id)));
        }
        let stage = match self.last_completed() {
            Some(done) => done.next(),
            None => Some(Stage::Extracting),
        };
        // Everything persisted but never marked done
        let Some(stage) = stage else {
            self.state = RunState::Done;
            return Ok(self);
        };
        // Drop anything recorded past the resume point
        self.artifacts.retain(|s, _| *s < stage);
        self.state = RunState::Active { stage };
        Ok(self)
    }
}
