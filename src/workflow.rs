use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{DubError, Result};
use crate::pipeline::{Orchestrator, PipelineRun, RunOptions, Services};
use crate::resync::ResyncFlags;
use crate::timing::TimeWindow;
use crate::workspace::Workspace;

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// What to dub, as given on the command line
#[derive(Debug, Clone, Default)]
pub struct DubRequest {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub language_hint: Option<String>,
    pub target_language: Option<String>,
    /// Defaults to the directory of the source video
    pub output_dir: Option<PathBuf>,
    /// Defaults to the file stem of the source video
    pub output_stem: Option<String>,
    pub flags: ResyncFlags,
}

/// Outcome of a directory run
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub completed: Vec<(PathBuf, String)>,
    pub failed: Vec<(PathBuf, DubError)>,
}

/// Front end over the orchestrator. Cloning is cheap and every clone shares
/// the same collaborators.
#[derive(Clone)]
pub struct Workflow {
    config: Config,
    orchestrator: Arc<Orchestrator>,
}

impl Workflow {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let services = Services::from_config(&config)?;

        // Check dependencies
        services.media.check_availability()?;
        services.transcriber.check_availability()?;
        services.synthesizer.check_availability()?;

        Self::with_services(config, Arc::new(services))
    }

    /// Build around existing collaborators, loaded once by the caller
    pub fn with_services(config: Config, services: Arc<Services>) -> Result<Self> {
        let workspace = Workspace::new(&config.pipeline.work_dir)?;
        Ok(Self {
            config,
            orchestrator: Arc::new(Orchestrator::new(services, workspace)),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        self.orchestrator.workspace()
    }

    /// Dub one segment of a single video file
    pub async fn process_single_file<P: AsRef<Path>>(
        &self,
        input_path: P,
        request: &DubRequest,
    ) -> Result<PipelineRun> {
        let input_path = input_path.as_ref();
        info!("Processing single file: {}", input_path.display());

        if !input_path.exists() {
            return Err(DubError::FileNotFound(input_path.display().to_string()));
        }

        let window = TimeWindow::new(
            request.start.unwrap_or(self.config.segment.default_start),
            request.end.unwrap_or(self.config.segment.default_end),
        )?;

        let output_dir = match &request.output_dir {
            Some(dir) => dir.clone(),
            None => input_path
                .parent()
                .ok_or_else(|| DubError::Config("Cannot determine output directory".to_string()))?
                .to_path_buf(),
        };

        let target_language = request
            .target_language
            .clone()
            .unwrap_or_else(|| self.config.translate.target_language.clone());

        let options = RunOptions {
            source: input_path.to_path_buf(),
            output_dir,
            language_hint: request.language_hint.clone(),
            target_language,
            flags: request.flags,
            output_stem: request.output_stem.clone(),
        };

        self.orchestrator.start(self.config.clone(), options, window).await
    }

    /// Dub the same segment of every video under `input_dir`, running up to
    /// `jobs` files at once. A failing file does not stop the others.
    pub async fn process_directory<P: AsRef<Path>>(
        &self,
        input_dir: P,
        request: &DubRequest,
        jobs: usize,
    ) -> Result<BatchSummary> {
        let input_dir = input_dir.as_ref();
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(DubError::Config("Input path is not a directory".to_string()));
        }

        let video_files = find_videos(input_dir);
        info!("Found {} video files to process with {} workers", video_files.len(), jobs);

        let permits = Arc::new(Semaphore::new(jobs.max(1)));
        let mut tasks = JoinSet::new();

        for target in plan_outputs(input_dir, video_files, request.output_dir.as_deref()) {
            let permits = permits.clone();
            let workflow = self.clone();
            let video_path = target.video;
            let request = DubRequest {
                output_dir: target.output_dir,
                output_stem: target.output_stem,
                ..request.clone()
            };

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => workflow.process_single_file(&video_path, &request).await,
                    Err(e) => Err(DubError::RunState(format!("Worker pool closed: {}", e))),
                };
                (video_path, result)
            });
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = tasks.join_next().await {
            let (video_path, result) = joined
                .map_err(|e| DubError::RunState(format!("Batch worker panicked: {}", e)))?;
            match result {
                Ok(run) => {
                    info!("Successfully processed: {} (run {})", video_path.display(), run.id);
                    summary.completed.push((video_path, run.id));
                }
                Err(e) => {
                    error!("Failed to process {}: {}", video_path.display(), e);
                    summary.failed.push((video_path, e));
                }
            }
        }

        summary.completed.sort();
        summary.failed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(summary)
    }

    pub async fn resume(&self, run_id: &str) -> Result<PipelineRun> {
        self.orchestrator.resume(run_id).await
    }

    pub fn status(&self, run_id: &str) -> Result<PipelineRun> {
        self.workspace().load_run(run_id)
    }
}

/// Where one video of a batch writes its outputs
#[derive(Debug, Clone, PartialEq)]
struct BatchTarget {
    video: PathBuf,
    output_dir: Option<PathBuf>,
    output_stem: Option<String>,
}

/// Give every video of a batch its own output names. Sub-directories of the
/// input are mirrored under `output_dir`, and videos that would still share
/// a stem in the same directory get their extension appended to it.
fn plan_outputs(input_dir: &Path, videos: Vec<PathBuf>, output_dir: Option<&Path>) -> Vec<BatchTarget> {
    let placed: Vec<(PathBuf, PathBuf, String)> = videos
        .into_iter()
        .map(|video| {
            let parent = video.parent().map(Path::to_path_buf).unwrap_or_default();
            let dir = match output_dir {
                Some(root) => match parent.strip_prefix(input_dir) {
                    Ok(nested) if !nested.as_os_str().is_empty() => root.join(nested),
                    _ => root.to_path_buf(),
                },
                None => parent,
            };
            let stem = video
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            (video, dir, stem)
        })
        .collect();

    let mut taken: HashMap<(PathBuf, String), usize> = HashMap::new();
    for (_, dir, stem) in &placed {
        *taken.entry((dir.clone(), stem.clone())).or_default() += 1;
    }

    placed
        .into_iter()
        .map(|(video, dir, stem)| {
            let shared = taken.get(&(dir.clone(), stem.clone())).is_some_and(|n| *n > 1);
            let output_stem = match video.extension() {
                Some(ext) if shared => Some(format!("{}_{}", stem, ext.to_string_lossy())),
                _ => None,
            };
            BatchTarget {
                video,
                output_dir: Some(dir),
                output_stem,
            }
        })
        .collect()
}

fn find_videos(input_dir: &Path) -> Vec<PathBuf> {
    let mut video_files: Vec<PathBuf> = WalkDir::new(input_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .map(|entry| entry.path().to_path_buf())
        .collect();
    video_files.sort();
    video_files
}
