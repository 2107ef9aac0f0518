//! Sample output naming convention.
//!
//! Every generated image is written to
//! `{output_root}/{training_run}/{checkpoint_stem}/{params}_{batch}.png`
//! where `{params}` encodes each varying parameter as `key=value` pairs
//! joined by `&`, and `{batch}` is the engine's batch counter (`00001_`).
//! Downstream scanners rebuild the parameter grid purely from this path.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::expansion::WorkItem;

/// Separator between `key=value` pairs.
pub const PAIR_SEPARATOR: char = '&';

/// Separator between the parameter stem and the batch suffix the engine
/// appends.
pub const BATCH_SEPARATOR: char = '_';

/// Characters that would break the path or the `key=value` grammar.
const RESERVED_CHARS: &[char] = &['/', '\\', '&', '=', '?'];

/// Replace reserved characters in a parameter value with `_`.
///
/// # Examples
///
/// ```
/// use sampler_core::naming::sanitize_value;
///
/// assert_eq!(sanitize_value("cats & dogs"), "cats _ dogs");
/// assert_eq!(sanitize_value("a/b=c"), "a_b_c");
/// ```
pub fn sanitize_value(value: &str) -> String {
    value
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Format a CFG value without trailing zeros (`7.0` -> `7`, `7.5` -> `7.5`).
pub fn format_cfg(cfg: f64) -> String {
    cfg.to_string()
}

/// File name of a checkpoint without its extension.
pub fn checkpoint_stem(checkpoint_filename: &str) -> &str {
    Path::new(checkpoint_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(checkpoint_filename)
}

/// Encode an item's parameters as the filename stem.
///
/// Convention: `prompt={name}&steps={n}&cfg={cfg}&sampler={s}&scheduler={s}&seed={n}`
pub fn sample_params_stem(item: &WorkItem) -> String {
    let pairs = [
        ("prompt", sanitize_value(&item.prompt_name)),
        ("steps", item.steps.to_string()),
        ("cfg", format_cfg(item.cfg)),
        ("sampler", sanitize_value(&item.sampler_name)),
        ("scheduler", sanitize_value(&item.scheduler)),
        ("seed", item.seed.to_string()),
    ];

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(&PAIR_SEPARATOR.to_string())
}

/// Filename prefix handed to the engine's save node, relative to its
/// output folder. The engine appends the batch suffix itself.
pub fn sample_filename_prefix(training_run: &str, item: &WorkItem) -> String {
    format!(
        "{}/{}/{}",
        sanitize_value(training_run),
        sanitize_value(checkpoint_stem(&item.checkpoint_filename)),
        sample_params_stem(item)
    )
}

/// Directory holding every output for one checkpoint of a training run.
pub fn checkpoint_output_dir(
    output_root: &Path,
    training_run: &str,
    checkpoint_filename: &str,
) -> PathBuf {
    output_root
        .join(sanitize_value(training_run))
        .join(sanitize_value(checkpoint_stem(checkpoint_filename)))
}

/// File names already present in one checkpoint's output directory.
///
/// Built with a single directory read so that skip detection over a whole
/// job costs one scan per checkpoint rather than one per item.
#[derive(Debug, Clone, Default)]
pub struct ExistingOutputs {
    dir: PathBuf,
    names: BTreeSet<String>,
}

impl ExistingOutputs {
    /// Read the output directory of one checkpoint. A missing directory
    /// means nothing was generated yet.
    pub fn scan(
        output_root: &Path,
        training_run: &str,
        checkpoint_filename: &str,
    ) -> io::Result<Self> {
        let dir = checkpoint_output_dir(output_root, training_run, checkpoint_filename);
        let mut names = BTreeSet::new();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self { dir, names }),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(Self { dir, names })
    }

    /// The already generated output of `item`, if any.
    ///
    /// Matches a file whose name is the parameter stem followed by the
    /// batch separator.
    pub fn find(&self, item: &WorkItem) -> Option<PathBuf> {
        let prefix = format!("{}{BATCH_SEPARATOR}", sample_params_stem(item));
        // Names sharing a prefix are contiguous in sorted order, starting at
        // the first name not less than the prefix.
        self.names
            .range(prefix.clone()..)
            .next()
            .filter(|name| name.starts_with(&prefix))
            .map(|name| self.dir.join(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Delete every output generated for one checkpoint.
///
/// Returns `true` if a directory was removed.
pub fn clear_checkpoint_outputs(
    output_root: &Path,
    training_run: &str,
    checkpoint_filename: &str,
) -> io::Result<bool> {
    let dir = checkpoint_output_dir(output_root, training_run, checkpoint_filename);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> WorkItem {
        WorkItem {
            checkpoint_filename: "my-lora-step00001000.safetensors".into(),
            checkpoint_path: "my-lora/my-lora-step00001000.safetensors".into(),
            prompt_name: "portrait".into(),
            prompt_text: "a portrait photo".into(),
            negative_prompt: String::new(),
            steps: 20,
            cfg: 7.0,
            sampler_name: "euler".into(),
            scheduler: "normal".into(),
            seed: 42,
            width: 512,
            height: 512,
        }
    }

    #[test]
    fn params_stem_encodes_every_parameter() {
        assert_eq!(
            sample_params_stem(&item()),
            "prompt=portrait&steps=20&cfg=7&sampler=euler&scheduler=normal&seed=42"
        );
    }

    #[test]
    fn fractional_cfg_keeps_decimals() {
        assert_eq!(format_cfg(7.5), "7.5");
        assert_eq!(format_cfg(3.25), "3.25");
    }

    #[test]
    fn reserved_characters_in_prompt_name_are_replaced() {
        let mut it = item();
        it.prompt_name = "a&b=c".into();
        assert!(sample_params_stem(&it).starts_with("prompt=a_b_c&steps="));
    }

    #[test]
    fn filename_prefix_nests_run_and_checkpoint() {
        assert_eq!(
            sample_filename_prefix("my-lora", &item()),
            "my-lora/my-lora-step00001000/prompt=portrait&steps=20&cfg=7&sampler=euler&scheduler=normal&seed=42"
        );
    }

    #[test]
    fn existing_output_is_detected_by_stem_and_batch_suffix() {
        let root = tempfile::tempdir().unwrap();
        let it = item();
        let missing = ExistingOutputs::scan(root.path(), "my-lora", &it.checkpoint_filename)
            .unwrap();
        assert!(missing.is_empty());
        assert!(missing.find(&it).is_none());

        let dir = checkpoint_output_dir(root.path(), "my-lora", &it.checkpoint_filename);
        std::fs::create_dir_all(&dir).unwrap();
        // A different seed must not count.
        std::fs::write(
            dir.join("prompt=portrait&steps=20&cfg=7&sampler=euler&scheduler=normal&seed=420_00001_.png"),
            b"x",
        )
        .unwrap();
        let outputs = ExistingOutputs::scan(root.path(), "my-lora", &it.checkpoint_filename)
            .unwrap();
        assert!(outputs.find(&it).is_none());

        let expected = dir.join(format!("{}_00001_.png", sample_params_stem(&it)));
        std::fs::write(&expected, b"x").unwrap();
        let outputs = ExistingOutputs::scan(root.path(), "my-lora", &it.checkpoint_filename)
            .unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs.find(&it), Some(expected));
    }

    #[test]
    fn one_scan_answers_every_item_of_a_checkpoint() {
        let root = tempfile::tempdir().unwrap();
        let dir = checkpoint_output_dir(root.path(), "my-lora", &item().checkpoint_filename);
        std::fs::create_dir_all(&dir).unwrap();
        for seed in [1, 3] {
            let mut it = item();
            it.seed = seed;
            let name = format!("{}_00001_.png", sample_params_stem(&it));
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.join("nested")).unwrap();

        let outputs =
            ExistingOutputs::scan(root.path(), "my-lora", &item().checkpoint_filename).unwrap();
        let found: Vec<bool> = (1..=4)
            .map(|seed| {
                let mut it = item();
                it.seed = seed;
                outputs.find(&it).is_some()
            })
            .collect();
        assert_eq!(found, [true, false, true, false]);
    }

    #[test]
    fn clearing_removes_checkpoint_directory_only() {
        let root = tempfile::tempdir().unwrap();
        let a = checkpoint_output_dir(root.path(), "run", "a.safetensors");
        let b = checkpoint_output_dir(root.path(), "run", "b.safetensors");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();

        assert!(clear_checkpoint_outputs(root.path(), "run", "a.safetensors").unwrap());
        assert!(!a.exists());
        assert!(b.exists());
        assert!(!clear_checkpoint_outputs(root.path(), "run", "a.safetensors").unwrap());
    }
}
