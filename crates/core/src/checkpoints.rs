//! Training run discovery from the checkpoint directory.
//!
//! Every `*.safetensors` file below the checkpoint root is a checkpoint.
//! Its training run is the file stem with a trailing step suffix removed,
//! so `my-lora-step00002000.safetensors`, `my-lora-000500.safetensors` and
//! the final `my-lora.safetensors` all belong to run `my-lora`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::CoreError;

/// File extension of checkpoint files.
pub const CHECKPOINT_EXTENSION: &str = "safetensors";

/// Trailing step suffix: a `-` or `_` separator, an optional `step`/`steps`/
/// `epoch`/`e`/`s` marker, then digits up to the end of the stem.
static STEP_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<run>.+?)[-_](?:steps?|epoch|e|s)?(?P<step>\d+)$").expect("valid regex")
});

/// One checkpoint file of a training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointFile {
    /// Bare file name, e.g. `my-lora-step00001000.safetensors`.
    pub filename: String,
    /// Path relative to the checkpoint root.
    pub relative_path: PathBuf,
    /// Training step parsed from the name; `None` for the final checkpoint.
    pub step: Option<u64>,
}

/// A named group of checkpoints produced by one training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrainingRun {
    pub name: String,
    /// Ordered by step ascending; the unsuffixed final checkpoint is last.
    pub checkpoints: Vec<CheckpointFile>,
}

impl TrainingRun {
    /// Find a checkpoint of this run by file name.
    pub fn checkpoint(&self, filename: &str) -> Option<&CheckpointFile> {
        self.checkpoints.iter().find(|c| c.filename == filename)
    }
}

/// Split a checkpoint file stem into its run name and optional step.
///
/// ```
/// use sampler_core::checkpoints::split_run_name;
///
/// assert_eq!(split_run_name("my-lora-step00002000"), ("my-lora".to_string(), Some(2000)));
/// assert_eq!(split_run_name("my-lora"), ("my-lora".to_string(), None));
/// ```
pub fn split_run_name(stem: &str) -> (String, Option<u64>) {
    if let Some(caps) = STEP_SUFFIX_RE.captures(stem) {
        if let Ok(step) = caps["step"].parse::<u64>() {
            return (caps["run"].to_string(), Some(step));
        }
    }
    (stem.to_string(), None)
}

/// Scan `root` recursively and group checkpoints into training runs.
///
/// Runs are returned sorted by name. A missing root yields no runs. When
/// two files in one run share a file name, the first found (in sorted path
/// order) wins.
pub fn discover_training_runs(root: &Path) -> Result<Vec<TrainingRun>, CoreError> {
    let mut files = Vec::new();
    collect_checkpoint_files(root, root, &mut files)?;
    files.sort();

    let mut runs: BTreeMap<String, Vec<CheckpointFile>> = BTreeMap::new();
    for relative_path in files {
        let Some(filename) = relative_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = relative_path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let (run_name, step) = split_run_name(stem);
        let checkpoints = runs.entry(run_name).or_default();
        if checkpoints.iter().any(|c| c.filename == filename) {
            continue;
        }
        checkpoints.push(CheckpointFile {
            filename: filename.to_string(),
            relative_path: relative_path.clone(),
            step,
        });
    }

    Ok(runs
        .into_iter()
        .map(|(name, mut checkpoints)| {
            checkpoints.sort_by_key(|c| (c.step.is_none(), c.step, c.filename.clone()));
            TrainingRun { name, checkpoints }
        })
        .collect())
}

/// Find a single training run by name.
pub fn find_training_run(root: &Path, name: &str) -> Result<Option<TrainingRun>, CoreError> {
    Ok(discover_training_runs(root)?
        .into_iter()
        .find(|run| run.name == name))
}

fn collect_checkpoint_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<PathBuf>,
) -> Result<(), CoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(CoreError::Internal(format!(
                "Failed to read checkpoint directory {}: {e}",
                dir.display()
            )))
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| CoreError::Internal(e.to_string()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        if file_type.is_dir() {
            collect_checkpoint_files(root, &path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(CHECKPOINT_EXTENSION) {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn split_recognises_common_step_suffixes() {
        assert_eq!(split_run_name("model_000123"), ("model".into(), Some(123)));
        assert_eq!(split_run_name("model-e3"), ("model".into(), Some(3)));
        assert_eq!(split_run_name("sdxl_v1-000010"), ("sdxl_v1".into(), Some(10)));
        assert_eq!(split_run_name("sdxl-v2"), ("sdxl-v2".into(), None));
    }

    #[test]
    fn checkpoints_are_grouped_and_ordered_by_step() {
        let root = tempfile::tempdir().unwrap();
        touch(root.path(), "my-lora/my-lora.safetensors");
        touch(root.path(), "my-lora/my-lora-step00002000.safetensors");
        touch(root.path(), "my-lora/my-lora-step00001000.safetensors");
        touch(root.path(), "other-000050.safetensors");
        touch(root.path(), "notes.txt");

        let runs = discover_training_runs(root.path()).unwrap();

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].name, "my-lora");
        let names: Vec<_> = runs[0]
            .checkpoints
            .iter()
            .map(|c| c.filename.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "my-lora-step00001000.safetensors",
                "my-lora-step00002000.safetensors",
                "my-lora.safetensors",
            ]
        );
        assert_eq!(
            runs[0].checkpoints[0].relative_path,
            PathBuf::from("my-lora/my-lora-step00001000.safetensors")
        );
        assert_eq!(runs[1].name, "other");
    }

    #[test]
    fn missing_root_has_no_runs() {
        let root = tempfile::tempdir().unwrap();
        let runs = discover_training_runs(&root.path().join("absent")).unwrap();
        assert!(runs.is_empty());
    }

    #[test]
    fn find_by_name() {
        let root = tempfile::tempdir().unwrap();
        touch(root.path(), "alpha-000010.safetensors");

        let run = find_training_run(root.path(), "alpha").unwrap().unwrap();
        assert!(run.checkpoint("alpha-000010.safetensors").is_some());
        assert!(find_training_run(root.path(), "beta").unwrap().is_none());
    }
}
