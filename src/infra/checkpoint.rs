// ============================================================
// Layer 6 — Checkpoint Directories
// ============================================================
// Every model the pipeline runs is shipped as one directory:
//
//   <model dir>/
//     config.json      ← architecture (burn #[derive(Config)] as JSON)
//     model.mpk        ← weights (burn CompactRecorder)
//     tokenizer.json   ← HuggingFace tokenizer   (language models only)
//     labels.json      ← {"0": "...", ...}       (segmentation only)
//
// The config is read first so the exact architecture can be
// rebuilt on the target device before the weights go into it;
// CompactRecorder refuses records that do not match.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::categories::CategoryTable;
use crate::domain::error::PipelineError;

const CONFIG_FILE:    &str = "config.json";
const WEIGHTS_STEM:   &str = "model";
const TOKENIZER_FILE: &str = "tokenizer.json";
const LABELS_FILE:    &str = "labels.json";

pub struct CheckpointDir {
    dir: PathBuf,
}

impl CheckpointDir {
    /// Fails with `MissingInput` when the directory does not exist.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(PipelineError::MissingInput(dir).into());
        }
        Ok(Self { dir })
    }

    /// Create the directory if needed, for writing a checkpoint.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    /// Last path component, used as the model identifier in answers.
    pub fn name(&self) -> Option<String> {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    // ── Architecture ──

    pub fn load_config<C: DeserializeOwned>(&self) -> Result<C> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read model config '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid model config '{}'", path.display()))
    }

    pub fn save_config<C: Serialize>(&self, config: &C) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(config)?)
            .with_context(|| format!("Cannot write model config '{}'", path.display()))?;
        tracing::debug!("Saved model config to '{}'", path.display());
        Ok(())
    }

    // ── Weights ──

    /// Restore weights into a freshly initialised `model`.
    pub fn load_weights<B: Backend, M: Module<B>>(&self, model: M, device: &B::Device) -> Result<M> {
        let path = self.dir.join(WEIGHTS_STEM);
        let record: <M as Module<B>>::Record = Recorder::<B>::load(&CompactRecorder::new(), path.clone(), device)
            .with_context(|| format!("Cannot load weights '{}.mpk'", path.display()))?;
        Ok(model.load_record(record))
    }

    pub fn save_weights<B: Backend, M: Module<B>>(&self, model: &M) -> Result<()> {
        let path = self.dir.join(WEIGHTS_STEM);
        Recorder::<B>::record(&CompactRecorder::new(), model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save weights to '{}'", path.display()))?;
        tracing::debug!("Saved weights to '{}.mpk'", path.display());
        Ok(())
    }

    // ── Category labels ──

    /// labels.json when present, otherwise `category_000..` for `fallback_count` layers.
    pub fn load_labels(&self, fallback_count: usize) -> Result<CategoryTable> {
        let path = self.dir.join(LABELS_FILE);
        if !path.exists() {
            tracing::warn!(
                "No {} in '{}'; using generated category names",
                LABELS_FILE,
                self.dir.display()
            );
            return Ok(CategoryTable::numbered(fallback_count));
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Cannot read '{}'", path.display()))?;
        let map: BTreeMap<String, String> = serde_json::from_str(&json)
            .with_context(|| format!("Invalid label map '{}'", path.display()))?;
        Ok(CategoryTable::from_id2label(&map)?)
    }

    pub fn save_labels(&self, table: &CategoryTable) -> Result<()> {
        let map: BTreeMap<String, String> = table
            .iter()
            .map(|(i, l)| (i.to_string(), l.to_string()))
            .collect();
        let path = self.dir.join(LABELS_FILE);
        fs::write(&path, serde_json::to_string_pretty(&map)?)
            .with_context(|| format!("Cannot write '{}'", path.display()))
    }
}
