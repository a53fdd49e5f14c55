//! dubsync - lip-synced video dubbing
//!
//! Entry point: parses the command line, sets up logging, loads the
//! configuration and hands off to the workflow.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dubsync::cli::{Args, Commands, DubOptions};
use dubsync::config::Config;
use dubsync::error::{exit_code, DubError};
use dubsync::pipeline::{PipelineRun, RunState};
use dubsync::resync::ResyncFlags;
use dubsync::setup::{checkpoints, SetupManager};
use dubsync::workflow::{DubRequest, Workflow};

const DEFAULT_CONFIG: &str = "dubsync.toml";

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = setup_logging(args.verbose) {
        eprintln!("{:#}", e);
        return ExitCode::from(exit_code::GENERIC);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new(DEFAULT_CONFIG).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG);
                Config::from_file(DEFAULT_CONFIG)?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Models { download } => {
            let registry = checkpoints(&config.resync);
            println!("\nCheckpoints:");
            println!("{:<12} {:<40} {:<10} {:<10}", "Name", "Description", "Size (MB)", "Status");
            println!("{}", "-".repeat(75));
            for checkpoint in &registry {
                let status = if checkpoint.is_present() { "Downloaded" } else { "Missing" };
                println!(
                    "{:<12} {:<40} {:<10.0} {:<10}",
                    checkpoint.name, checkpoint.description, checkpoint.size_mb, status
                );
            }

            if download {
                info!("Downloading missing checkpoints...");
                let setup_manager = SetupManager::new()?;
                for checkpoint in registry.iter().filter(|c| !c.is_present()) {
                    setup_manager.download_checkpoint(checkpoint).await?;
                }
                info!("All checkpoints downloaded");
            }
        }
        Commands::Status { run_id } => {
            let workspace = dubsync::workspace::Workspace::new(&config.pipeline.work_dir)?;
            match run_id {
                Some(id) => print_run(&workspace.load_run(&id)?),
                None => {
                    for id in workspace.list_runs()? {
                        let run = workspace.load_run(&id)?;
                        println!("{}  {:<40} {}", run.id, run.settings.options.source.display(), run.state);
                    }
                }
            }
        }
        Commands::Dub { video_path, options, resume } => {
            apply_overrides(&mut config, &options);
            let workflow = Workflow::new(config)?;

            let run = match (resume, video_path) {
                (Some(id), _) => workflow.resume(&id).await?,
                (None, Some(video_path)) => {
                    info!("Dubbing video file: {}", video_path.display());
                    workflow.process_single_file(&video_path, &dub_request(&options)).await?
                }
                (None, None) => {
                    return Err(DubError::Config("A video path or --resume <run-id> is required".to_string()).into());
                }
            };
            print_run(&run);
        }
        Commands::Batch { input_dir, options, jobs } => {
            apply_overrides(&mut config, &options);
            let jobs = jobs.unwrap_or(config.pipeline.jobs);
            let workflow = Workflow::new(config)?;

            let summary = workflow
                .process_directory(&input_dir, &dub_request(&options), jobs)
                .await?;
            println!("Completed: {}  Failed: {}", summary.completed.len(), summary.failed.len());
            for (path, run_id) in &summary.completed {
                println!("  ok    {} (run {})", path.display(), run_id);
            }
            for (path, e) in &summary.failed {
                println!("  fail  {}: {}", path.display(), e);
            }
            // The batch exits with the code of the first failure
            if let Some((_, e)) = summary.failed.into_iter().next() {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut Config, options: &DubOptions) {
    if let Some(model) = options.whisper_model {
        config.transcriber.model = model;
    }
    if let Some(target) = &options.target_language {
        config.translate.target_language = target.clone();
    }
}

fn dub_request(options: &DubOptions) -> DubRequest {
    DubRequest {
        start: options.start,
        end: options.end,
        language_hint: options.language.clone(),
        target_language: options.target_language.clone(),
        output_dir: options.output_dir.clone(),
        output_stem: None,
        flags: ResyncFlags {
            skip_lipsync: options.no_lipsync,
            skip_face_restore: options.no_face_restore,
        },
    }
}

fn print_run(run: &PipelineRun) {
    println!("Run:        {}", run.id);
    println!("Source:     {}", run.settings.options.source.display());
    println!("Segment:    {}", run.segment);
    println!("State:      {}", run.state);
    if let RunState::Failed { last_completed, .. } = &run.state {
        let last = last_completed.map(|s| s.label()).unwrap_or("none");
        println!("Last completed stage: {}", last);
    }
    for (stage, artifacts) in &run.artifacts {
        for (name, path) in &artifacts.files {
            println!("  {:<13} {:<18} {}", stage, name, path.display());
        }
    }
    if !run.warnings.is_empty() {
        println!("Warnings ({}):", run.warnings.warnings.len());
        for warning in &run.warnings.warnings {
            println!("  {}", warning);
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<DubError>()
        .map(DubError::exit_code)
        .unwrap_or(exit_code::GENERIC)
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".dubsync").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "dubsync.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(verbose)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("dubsync.log").display()
    );

    Ok(())
}
