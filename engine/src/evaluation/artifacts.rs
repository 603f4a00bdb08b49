//! Run artifacts on disk
//!
//! Layout of one run directory:
//!
//! ```text
//! {runs_dir}/{YYYYMMDD_HHMMSS}_{model}_{label}_t{temperature}/
//!     run.toml
//!     frozen_context.json
//!     metrics.json
//!     judgments.json
//!     trials/trial_01.json ...
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::alignment::JudgmentRecord;
use super::assembler::{path_component, RunMetrics, RunResult};
use super::sampler::GenerationMode;
use super::trial::Trial;

pub const MANIFEST_FILE: &str = "run.toml";
pub const CONTEXT_FILE: &str = "frozen_context.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const JUDGMENTS_FILE: &str = "judgments.json";
pub const TRIALS_DIR: &str = "trials";

/// Contents of `run.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub created_at: String,
    pub engine_version: String,
    pub build_commit: String,
    pub provider: String,
    pub model: String,
    pub label: String,
    pub mode: GenerationMode,
    pub trials: usize,
    pub temperature: f64,
    pub context_hash: String,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub embedding_model: String,
    pub judge_model: String,
    pub min_strategies: usize,
    pub max_strategies: usize,
    pub taxonomy: Vec<String>,
}

impl RunManifest {
    pub fn from_result(result: &RunResult) -> Self {
        let bounds = result.taxonomy.bounds();
        Self {
            run_id: result.run_id.clone(),
            created_at: result.created_at.to_rfc3339(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            build_commit: env!("GIT_COMMIT_HASH").to_string(),
            provider: result.provider.clone(),
            model: result.model.clone(),
            label: result.request.label.clone(),
            mode: result.request.mode,
            trials: result.request.trials,
            temperature: result.request.temperature,
            context_hash: result.context.content_hash().to_string(),
            language: result.context.language().to_string(),
            session_id: result.context.session_id().map(str::to_string),
            embedding_model: result.embedding_model.clone(),
            judge_model: result.judge_model.clone(),
            min_strategies: bounds.min,
            max_strategies: bounds.max,
            taxonomy: result.taxonomy.ids().map(str::to_string).collect(),
        }
    }
}

/// A run read back from disk
#[derive(Debug, Clone)]
pub struct LoadedRun {
    pub dir: PathBuf,
    pub manifest: RunManifest,
    pub metrics: RunMetrics,
    pub trials: Vec<Trial>,
    pub judgments: Vec<JudgmentRecord>,
}

fn persistence_error(action: &str, path: &Path, err: impl std::fmt::Display) -> EngineError {
    EngineError::Persistence(format!("failed to {} {}: {}", action, path.display(), err))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), EngineError> {
    let contents = serde_json::to_string_pretty(value)?;
    fs::write(path, contents).map_err(|e| persistence_error("write", path, e))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, EngineError> {
    let contents = fs::read_to_string(path).map_err(|e| persistence_error("read", path, e))?;
    serde_json::from_str(&contents).map_err(|e| persistence_error("parse", path, e))
}

pub fn trial_file_name(index: usize) -> String {
    format!("trial_{:02}.json", index)
}

/// Writes and reads run directories under one root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory for `run_id`; never reuses an existing one
    fn create_run_dir(&self, run_id: &str) -> Result<PathBuf, EngineError> {
        fs::create_dir_all(&self.root).map_err(|e| persistence_error("create", &self.root, e))?;

        let base = path_component(run_id);
        for attempt in 0..1000 {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt + 1)
            };
            let dir = self.root.join(name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(persistence_error("create", &dir, e)),
            }
        }

        Err(EngineError::Persistence(format!(
            "no free run directory for {} under {}",
            base,
            self.root.display()
        )))
    }

    /// Write every artifact of a run and return its directory
    pub fn persist(&self, result: &RunResult) -> Result<PathBuf, EngineError> {
        let dir = self.create_run_dir(&result.run_id)?;

        let manifest = RunManifest::from_result(result);
        let manifest_toml = toml::to_string_pretty(&manifest)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let manifest_path = dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, manifest_toml)
            .map_err(|e| persistence_error("write", &manifest_path, e))?;

        write_json(&dir.join(CONTEXT_FILE), result.context.as_ref())?;

        let trials_dir = dir.join(TRIALS_DIR);
        fs::create_dir_all(&trials_dir).map_err(|e| persistence_error("create", &trials_dir, e))?;
        for trial in &result.trials {
            write_json(&trials_dir.join(trial_file_name(trial.index)), trial)?;
        }

        write_json(&dir.join(METRICS_FILE), &result.metrics)?;
        write_json(&dir.join(JUDGMENTS_FILE), &result.judgments)?;

        tracing::debug!(
            "Wrote {} trial files to {}",
            result.trials.len(),
            trials_dir.display()
        );
        Ok(dir)
    }

    /// Read a run directory written by [`ArtifactStore::persist`]
    pub fn load_run(dir: &Path) -> Result<LoadedRun, EngineError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest_toml = fs::read_to_string(&manifest_path)
            .map_err(|e| persistence_error("read", &manifest_path, e))?;
        let manifest: RunManifest = toml::from_str(&manifest_toml)
            .map_err(|e| persistence_error("parse", &manifest_path, e))?;

        let metrics: RunMetrics = read_json(&dir.join(METRICS_FILE))?;
        let judgments: Vec<JudgmentRecord> = read_json(&dir.join(JUDGMENTS_FILE))?;

        let trials_dir = dir.join(TRIALS_DIR);
        let entries =
            fs::read_dir(&trials_dir).map_err(|e| persistence_error("read", &trials_dir, e))?;
        let mut trials = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| persistence_error("read", &trials_dir, e))?
                .path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                trials.push(read_json::<Trial>(&path)?);
            }
        }
        trials.sort_by_key(|t| t.index);

        Ok(LoadedRun {
            dir: dir.to_path_buf(),
            manifest,
            metrics,
            trials,
            judgments,
        })
    }

    /// Run directories under the root, oldest first
    pub fn list_runs(&self) -> Result<Vec<PathBuf>, EngineError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let entries =
            fs::read_dir(&self.root).map_err(|e| persistence_error("read", &self.root, e))?;
        let mut runs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(MANIFEST_FILE).is_file())
            .collect();
        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_trial_file_names_are_padded() {
        assert_eq!(trial_file_name(1), "trial_01.json");
        assert_eq!(trial_file_name(12), "trial_12.json");
        assert_eq!(trial_file_name(100), "trial_100.json");
    }

    #[test]
    fn test_run_dirs_are_never_reused() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path().join("runs"));

        let first = store.create_run_dir("20260101_120000_m_label_t0.70").unwrap();
        let second = store.create_run_dir("20260101_120000_m_label_t0.70").unwrap();

        assert_ne!(first, second);
        assert!(second
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_2"));
    }

    #[test]
    fn test_list_runs_on_missing_root() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path().join("nothing-here"));
        assert!(store.list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_load_run_reports_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let err = ArtifactStore::load_run(temp.path()).unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
    }
}
