use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{DubError, Result};
use crate::timing::TimeWindow;
use crate::transcript::Translation;

/// Final outputs of a run, all named after the source video
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub video: PathBuf,
    pub srt: PathBuf,
    pub json: PathBuf,
}

impl OutputPaths {
    /// `<stem>_dubbed_<lang>.{mp4,srt,json}` inside `output_dir`. The stem
    /// is the source's file stem unless `output_stem` overrides it.
    pub fn new(
        output_dir: &Path,
        source: &Path,
        output_stem: Option<&str>,
        target_language: &str,
    ) -> Result<Self> {
        let stem = match output_stem {
            Some(stem) => stem.to_string(),
            None => source
                .file_stem()
                .ok_or_else(|| DubError::Config(format!("Invalid video filename: {}", source.display())))?
                .to_string_lossy()
                .to_string(),
        };
        let base = format!("{}_dubbed_{}", stem, target_language);
        Ok(Self {
            video: output_dir.join(format!("{}.mp4", base)),
            srt: output_dir.join(format!("{}.srt", base)),
            json: output_dir.join(format!("{}.json", base)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarUnit {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub source_text: String,
    pub text: String,
}

/// Transcript and translation side by side, timed relative to the segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub source_language: String,
    pub target_language: String,
    /// Where the segment sits in the source video
    pub segment: TimeWindow,
    pub units: Vec<SidecarUnit>,
}

impl Sidecar {
    pub fn new(translation: &Translation, segment: TimeWindow) -> Self {
        let units = translation
            .units
            .iter()
            .enumerate()
            .map(|(index, unit)| SidecarUnit {
                index,
                start: unit.window().start(),
                end: unit.window().end(),
                source_text: unit.source.text.clone(),
                text: unit.text.clone(),
            })
            .collect();

        Self {
            source_language: translation.source_language.clone(),
            target_language: translation.target_language.clone(),
            segment,
            units,
        }
    }
}

/// Generate an SRT subtitle file from the translated units
pub async fn generate_srt<P: AsRef<Path>>(translation: &Translation, output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Generating SRT file: {}", output_path.display());

    fs::write(output_path, render_srt(translation)).await?;
    Ok(())
}

pub async fn write_json_sidecar<P: AsRef<Path>>(sidecar: &Sidecar, output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!("Writing transcript sidecar: {}", output_path.display());

    fs::write(output_path, serde_json::to_vec_pretty(sidecar)?).await?;
    Ok(())
}

fn render_srt(translation: &Translation) -> String {
    let mut srt_content = String::new();
    let spoken = translation.units.iter().filter(|u| !u.text.trim().is_empty());

    for (number, unit) in spoken.enumerate() {
        let window = unit.window();
        srt_content.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            number + 1,
            format_srt_time(window.start()),
            format_srt_time(window.end()),
            unit.text.trim()
        ));
    }
    srt_content
}

/// Format time in seconds to SRT time format (HH:MM:SS,mmm)
fn format_srt_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{TimedTextUnit, TranslatedUnit};

    fn unit(start: f64, end: f64, source: &str, text: &str) -> TranslatedUnit {
        TranslatedUnit {
            source: TimedTextUnit {
                text: source.to_string(),
                window: TimeWindow::new(start, end).unwrap(),
                source_language: "en".to_string(),
                words: Vec::new(),
            },
            text: text.to_string(),
            target_language: "hi".to_string(),
        }
    }

    fn translation() -> Translation {
        Translation {
            source_language: "en".to_string(),
            target_language: "hi".to_string(),
            units: vec![
                unit(0.0, 2.5, "Hello there", "नमस्ते"),
                unit(2.5, 3.0, "um", ""),
                unit(4.0, 6.25, "Good morning", "सुप्रभात"),
            ],
        }
    }

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(65.123), "00:01:05,123");
        assert_eq!(format_srt_time(3661.500), "01:01:01,500");
    }

    #[test]
    fn test_srt_skips_silent_units_and_renumbers() {
        let srt = render_srt(&translation());
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:02,500\nनमस्ते\n\n"));
        assert!(srt.contains("2\n00:00:04,000 --> 00:00:06,250\nसुप्रभात\n"));
        assert!(!srt.contains("3\n"));
    }

    #[test]
    fn test_sidecar_keeps_every_unit_in_order() {
        let sidecar = Sidecar::new(&translation(), TimeWindow::new(15.0, 30.0).unwrap());
        assert_eq!(sidecar.units.len(), 3);
        assert_eq!(sidecar.units[1].source_text, "um");
        assert_eq!(sidecar.units[2].start, 4.0);
        assert_eq!(sidecar.segment.start(), 15.0);
    }

    #[test]
    fn test_output_paths_follow_source_stem() {
        let paths = OutputPaths::new(Path::new("out"), Path::new("/videos/talk.mp4"), None, "hi").unwrap();
        assert_eq!(paths.video, PathBuf::from("out/talk_dubbed_hi.mp4"));
        assert_eq!(paths.srt, PathBuf::from("out/talk_dubbed_hi.srt"));
        assert_eq!(paths.json, PathBuf::from("out/talk_dubbed_hi.json"));
    }

    #[test]
    fn test_output_stem_overrides_source_name() {
        let paths =
            OutputPaths::new(Path::new("out"), Path::new("/videos/talk.mkv"), Some("talk_mkv"), "hi").unwrap();
        assert_eq!(paths.video, PathBuf::from("out/talk_mkv_dubbed_hi.mp4"));
    }

    #[tokio::test]
    async fn test_sidecars_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let srt = dir.path().join("a.srt");
        let json = dir.path().join("a.json");
        generate_srt(&translation(), &srt).await.unwrap();
        write_json_sidecar(&Sidecar::new(&translation(), TimeWindow::new(0.0, 10.0).unwrap()), &json)
            .await
            .unwrap();

        let back: Sidecar = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(back.target_language, "hi");
        assert!(std::fs::read_to_string(&srt).unwrap().contains("सुप्रभात"));
    }
}
