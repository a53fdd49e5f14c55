//! Per-run working areas: `<work_dir>/<run-id>/<stage>/...` plus a `run.json`
//! manifest describing the run.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DubError, Result};
use crate::pipeline::{PipelineRun, Stage};

pub const MANIFEST_FILE: &str = "run.json";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// The root is made absolute so artifact paths survive a change of directory
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_run(&self, id: &str) -> Result<RunDir> {
        let dir = self.root.join(id);
        std::fs::create_dir_all(&dir)?;
        Ok(RunDir { dir })
    }

    pub fn open_run(&self, id: &str) -> Result<RunDir> {
        let dir = self.root.join(id);
        if !dir.join(MANIFEST_FILE).is_file() {
            return Err(DubError::RunState(format!("No run '{}' under {}", id, self.root.display())));
        }
        Ok(RunDir { dir })
    }

    pub fn load_run(&self, id: &str) -> Result<PipelineRun> {
        self.open_run(id)?.load_manifest()
    }

    /// Ids of every run with a manifest, oldest directory name first
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.root.is_dir() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().join(MANIFEST_FILE).is_file() {
                ids.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Working directory of one run; each stage writes only under its own subdirectory
#[derive(Debug, Clone)]
pub struct RunDir {
    dir: PathBuf,
}

impl RunDir {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn stage_dir(&self, stage: Stage) -> Result<PathBuf> {
        let dir = self.dir.join(stage.label());
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Path relative to the run directory, for the manifest
    pub fn relative(&self, path: &Path) -> PathBuf {
        pathdiff::diff_paths(path, &self.dir).unwrap_or_else(|| path.to_path_buf())
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    /// Write a JSON document into a stage directory and return its absolute path
    pub fn write_json<T: Serialize>(&self, stage: Stage, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.stage_dir(stage)?.join(name);
        write_atomically(&path, &serde_json::to_vec_pretty(value)?)?;
        Ok(path)
    }

    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let path = self.resolve(path);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| DubError::RunState(format!("Missing artifact {}: {}", path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_manifest(&self, run: &PipelineRun) -> Result<()> {
        let path = self.dir.join(MANIFEST_FILE);
        write_atomically(&path, &serde_json::to_vec_pretty(run)?)?;
        debug!("Saved manifest for run {} ({})", run.id, run.state);
        Ok(())
    }

    pub fn load_manifest(&self) -> Result<PipelineRun> {
        let content = std::fs::read_to_string(self.dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// A crash mid-write must leave the previous version intact
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
