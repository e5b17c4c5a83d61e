// ============================================================
// Layer 4 — JSONL Manifests
// ============================================================
// Newline-delimited JSON: one object per line, blank lines
// ignored. Used for question manifests, answer files and
// reference answers alike.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

use crate::domain::error::PipelineError;
use crate::domain::record::QuestionRecord;
use crate::domain::traits::QuestionSource;

/// Read every non-blank line of `path` as a `T`.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()).into());
    }
    let file = File::open(path).with_context(|| format!("Cannot open '{}'", path.display()))?;

    let mut out = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Cannot read '{}'", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let value = serde_json::from_str(&line)
            .with_context(|| format!("Invalid JSON on line {} of '{}'", n + 1, path.display()))?;
        out.push(value);
    }
    Ok(out)
}

/// Write `items` as JSONL, creating parent directories.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    create_parent(path)?;
    let file = File::create(path).with_context(|| format!("Cannot create '{}'", path.display()))?;
    let mut w = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut w, item)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

/// Pretty-printed JSON document, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    create_parent(path)?;
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()).into());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in '{}'", path.display()))
}

pub(crate) fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }
    Ok(())
}

// ─── JsonlManifest ────────────────────────────────────────────────────────────
/// The question manifest: `{question_id, image, text}` per line.
pub struct JsonlManifest {
    path: PathBuf,
}

impl JsonlManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl QuestionSource for JsonlManifest {
    fn load_all(&self) -> Result<Vec<QuestionRecord>> {
        let questions: Vec<QuestionRecord> = read_jsonl(&self.path)?;
        tracing::info!("Read {} questions from '{}'", questions.len(), self.path.display());
        Ok(questions)
    }
}
