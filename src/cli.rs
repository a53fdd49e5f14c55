use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ModelSize;

#[derive(Parser)]
#[command(author, version, about = "Dub a segment of a video into another language with matching lips", long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by single-file and batch dubbing
#[derive(ClapArgs, Debug, Clone)]
pub struct DubOptions {
    /// Segment start in seconds
    #[arg(long)]
    pub start: Option<f64>,

    /// Segment end in seconds
    #[arg(long)]
    pub end: Option<f64>,

    /// Whisper model size (accuracy vs. speed)
    #[arg(long)]
    pub whisper_model: Option<ModelSize>,

    /// Source language; detected when omitted
    #[arg(short, long)]
    pub language: Option<String>,

    /// Target language for the dub
    #[arg(short, long)]
    pub target_language: Option<String>,

    /// Output directory for the dubbed video and sidecars
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Mux the dubbed audio onto the original video without lip-sync
    #[arg(long = "no_lipsync", alias = "no-lipsync")]
    pub no_lipsync: bool,

    /// Skip face restoration after lip-sync
    #[arg(long = "no_face_restore", alias = "no-face-restore")]
    pub no_face_restore: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dub one segment of a video file
    Dub {
        /// Input video file
        video_path: Option<PathBuf>,

        #[command(flatten)]
        options: DubOptions,

        /// Resume a failed or interrupted run instead of starting a new one
        #[arg(long, conflicts_with = "video_path")]
        resume: Option<String>,
    },

    /// Dub the same segment of every video in a directory
    Batch {
        /// Input directory containing video files
        #[arg(short, long)]
        input_dir: PathBuf,

        #[command(flatten)]
        options: DubOptions,

        /// Number of videos processed concurrently
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Show the state of a run, or list runs when no id is given
    Status {
        run_id: Option<String>,
    },

    /// List lip-sync and face restoration checkpoints and their status
    Models {
        /// Download all missing checkpoints
        #[arg(long)]
        download: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dub_accepts_snake_case_skip_flags() {
        let args = Args::try_parse_from([
            "dubsync", "dub", "talk.mp4", "--start", "15", "--end", "30", "--no_lipsync", "--no-face-restore",
        ])
        .unwrap();
        match args.command {
            Commands::Dub { video_path, options, resume } => {
                assert_eq!(video_path, Some(PathBuf::from("talk.mp4")));
                assert_eq!(options.start, Some(15.0));
                assert!(options.no_lipsync);
                assert!(options.no_face_restore);
                assert!(resume.is_none());
            }
            _ => panic!("expected dub"),
        }
    }

    #[test]
    fn test_whisper_model_is_parsed() {
        let args = Args::try_parse_from(["dubsync", "dub", "talk.mp4", "--whisper-model", "small"]).unwrap();
        match args.command {
            Commands::Dub { options, .. } => assert_eq!(options.whisper_model, Some(ModelSize::Small)),
            _ => panic!("expected dub"),
        }
    }

    #[test]
    fn test_resume_conflicts_with_video_path() {
        assert!(Args::try_parse_from(["dubsync", "dub", "talk.mp4", "--resume", "abc"]).is_err());
        assert!(Args::try_parse_from(["dubsync", "dub", "--resume", "abc"]).is_ok());
    }
}
