//! Workflow templates and their materialization.
//!
//! A template is a ComfyUI API-format graph stored as `<name>.json` in the
//! workflow directory: an object mapping node ids to
//! `{"class_type": ..., "inputs": {...}}`. Materialization writes one work
//! item's parameters into the nodes that consume them, located by
//! `class_type`, and leaves every other node untouched.

use std::collections::HashSet;
use std::path::Path;

use sampler_core::expansion::WorkItem;
use serde_json::{Map, Value};

/* --------------------------------------------------------------------------
   Node classes
   -------------------------------------------------------------------------- */

const CHECKPOINT_LOADERS: &[(&str, &str)] = &[
    ("CheckpointLoaderSimple", "ckpt_name"),
    ("UNETLoader", "unet_name"),
];
const SAMPLER: &str = "KSampler";
const TEXT_ENCODER: &str = "CLIPTextEncode";
const LATENT_IMAGES: &[&str] = &["EmptyLatentImage", "EmptySD3LatentImage"];
const SAVE_IMAGE: &str = "SaveImage";
const VAE_LOADER: &str = "VAELoader";
const CLIP_LOADER: &str = "CLIPLoader";
const SHIFT_NODES: &[&str] = &["ModelSamplingAuraFlow", "ModelSamplingSD3"];

/// Errors loading or using a workflow template.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid workflow name '{0}'")]
    InvalidName(String),

    #[error("Workflow '{0}' not found")]
    NotFound(String),

    #[error("Failed to read workflow '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Workflow '{name}' is malformed: {reason}")]
    Malformed { name: String, reason: String },

    /// The requested options do not fit the workflow.
    #[error("{0}")]
    Unsupported(String),
}

/// Per-item values written into a template.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowInputs<'a> {
    pub item: &'a WorkItem,
    pub filename_prefix: &'a str,
    pub vae: Option<&'a str>,
    pub clip: Option<&'a str>,
    pub shift: Option<f64>,
}

/// A validated workflow graph.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    name: String,
    graph: Map<String, Value>,
}

impl WorkflowTemplate {
    /// Load `<dir>/<name>.json` and validate it.
    ///
    /// `name` must be a bare file stem; path separators and `..` are rejected.
    pub fn load(dir: &Path, name: &str) -> Result<Self, WorkflowError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(WorkflowError::InvalidName(name.to_string()));
        }

        let path = dir.join(format!("{name}.json"));
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WorkflowError::NotFound(name.to_string()))
            }
            Err(source) => {
                return Err(WorkflowError::Io {
                    name: name.to_string(),
                    source,
                })
            }
        };

        let value: Value = serde_json::from_str(&text).map_err(|e| WorkflowError::Malformed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_value(name, value)
    }

    /// Validate an in-memory graph.
    pub fn from_value(name: &str, value: Value) -> Result<Self, WorkflowError> {
        let malformed = |reason: String| WorkflowError::Malformed {
            name: name.to_string(),
            reason,
        };

        let Value::Object(graph) = value else {
            return Err(malformed("top level must be an object of nodes".into()));
        };
        for (id, node) in &graph {
            if node.get("class_type").and_then(Value::as_str).is_none() {
                return Err(malformed(format!("node {id} has no class_type")));
            }
            if !node.get("inputs").is_some_and(Value::is_object) {
                return Err(malformed(format!("node {id} has no inputs object")));
            }
        }

        let template = Self {
            name: name.to_string(),
            graph,
        };

        let loaders: Vec<&str> = CHECKPOINT_LOADERS.iter().map(|(class, _)| *class).collect();
        for (required, what) in [
            (loaders.as_slice(), "checkpoint loader"),
            (&[SAMPLER][..], "KSampler"),
            (&[TEXT_ENCODER][..], "CLIPTextEncode"),
            (LATENT_IMAGES, "empty latent image"),
            (&[SAVE_IMAGE][..], "SaveImage"),
        ] {
            if template.nodes_of(required).next().is_none() {
                return Err(malformed(format!("missing {what} node")));
            }
        }
        Ok(template)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the graph contains a model-sampling node taking `shift`.
    pub fn requires_shift(&self) -> bool {
        self.nodes_of(SHIFT_NODES).next().is_some()
    }

    /// Check that the job-level options fit this workflow.
    ///
    /// A shift workflow requires `shift` and any other workflow must not
    /// receive one; `vae`/`clip` need a matching loader node.
    pub fn check_options(
        &self,
        vae: Option<&str>,
        clip: Option<&str>,
        shift: Option<f64>,
    ) -> Result<(), WorkflowError> {
        match (self.requires_shift(), shift) {
            (true, None) => {
                return Err(WorkflowError::Unsupported(format!(
                    "Workflow '{}' requires a shift value",
                    self.name
                )))
            }
            (false, Some(_)) => {
                return Err(WorkflowError::Unsupported(format!(
                    "Workflow '{}' does not take a shift value",
                    self.name
                )))
            }
            (true, Some(value)) if !value.is_finite() => {
                return Err(WorkflowError::Unsupported("Shift must be a finite number".into()))
            }
            _ => {}
        }
        if vae.is_some() && self.nodes_of(&[VAE_LOADER]).next().is_none() {
            return Err(WorkflowError::Unsupported(format!(
                "Workflow '{}' has no VAE loader",
                self.name
            )));
        }
        if clip.is_some() && self.nodes_of(&[CLIP_LOADER]).next().is_none() {
            return Err(WorkflowError::Unsupported(format!(
                "Workflow '{}' has no CLIP loader",
                self.name
            )));
        }
        Ok(())
    }

    /// Produce the graph to submit for one item.
    pub fn materialize(&self, inputs: &WorkflowInputs<'_>) -> Value {
        let item = inputs.item;
        let negative_ids = self.negative_text_nodes();
        let mut graph = self.graph.clone();

        for (id, node) in graph.iter_mut() {
            let class = node
                .get("class_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let Some(fields) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
                continue;
            };

            if let Some((_, field)) = CHECKPOINT_LOADERS.iter().find(|(c, _)| *c == class) {
                fields.insert((*field).into(), item.checkpoint_path.clone().into());
            } else if class == SAMPLER {
                fields.insert("seed".into(), item.seed.into());
                fields.insert("steps".into(), item.steps.into());
                fields.insert("cfg".into(), item.cfg.into());
                fields.insert("sampler_name".into(), item.sampler_name.clone().into());
                fields.insert("scheduler".into(), item.scheduler.clone().into());
            } else if class == TEXT_ENCODER {
                let text = if negative_ids.contains(id.as_str()) {
                    &item.negative_prompt
                } else {
                    &item.prompt_text
                };
                fields.insert("text".into(), text.clone().into());
            } else if LATENT_IMAGES.contains(&class.as_str()) {
                fields.insert("width".into(), item.width.into());
                fields.insert("height".into(), item.height.into());
            } else if class == SAVE_IMAGE {
                fields.insert("filename_prefix".into(), inputs.filename_prefix.into());
            } else if class == VAE_LOADER {
                if let Some(vae) = inputs.vae {
                    fields.insert("vae_name".into(), vae.into());
                }
            } else if class == CLIP_LOADER {
                if let Some(clip) = inputs.clip {
                    fields.insert("clip_name".into(), clip.into());
                }
            } else if SHIFT_NODES.contains(&class.as_str()) {
                if let Some(shift) = inputs.shift {
                    fields.insert("shift".into(), shift.into());
                }
            }
        }

        Value::Object(graph)
    }

    fn nodes_of<'s>(
        &'s self,
        classes: &'s [&'s str],
    ) -> impl Iterator<Item = (&'s String, &'s Value)> + 's {
        self.graph.iter().filter(move |(_, node)| {
            node.get("class_type")
                .and_then(Value::as_str)
                .is_some_and(|c| classes.contains(&c))
        })
    }

    /// Text encoders feeding a sampler's `negative` input, plus any whose
    /// title mentions "negative".
    fn negative_text_nodes(&self) -> HashSet<String> {
        let mut ids: HashSet<String> = self
            .nodes_of(&[SAMPLER])
            .filter_map(|(_, node)| node.pointer("/inputs/negative/0"))
            .filter_map(|link| match link {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect();

        for (id, node) in self.nodes_of(&[TEXT_ENCODER]) {
            let titled_negative = node
                .pointer("/_meta/title")
                .and_then(Value::as_str)
                .is_some_and(|t| t.to_lowercase().contains("negative"));
            if titled_negative {
                ids.insert(id.clone());
            }
        }
        ids
    }
}
