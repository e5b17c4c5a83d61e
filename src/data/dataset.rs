// ============================================================
// Layer 4 — Datasets
// ============================================================
// Two burn Datasets over the inputs of a run:
//
//   FolderDataset   image directory → ImageRecord per file
//   QuestionDataset manifest slice  → PromptSample per question
//                                      (image via FileLoader,
//                                       prompt via PromptEncoder)
//
// Both also implement IndexedSource so the prefetcher can load
// samples on worker threads.
//
// Reference: Burn Book §4 (Datasets)

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use burn::prelude::*;

use crate::data::batcher::PromptSample;
use crate::data::loader::{FileKind, FileLoader, ImageRecord};
use crate::domain::error::PipelineError;
use crate::domain::record::QuestionRecord;
use crate::domain::traits::PromptEncoder;

/// Random access to loadable samples, shared with prefetch workers.
pub trait IndexedSource<S>: Send + Sync {
    fn count(&self) -> usize;

    fn load(&self, index: usize) -> Result<S>;

    /// Short human-readable name of the sample, for log lines.
    fn describe(&self, index: usize) -> String;
}

// ─── FolderDataset ────────────────────────────────────────────────────────────
/// Every supported image file of a directory, in listing order.
pub struct FolderDataset<B: Backend> {
    files:  Vec<PathBuf>,
    loader: FileLoader<B>,
}

impl<B: Backend> FolderDataset<B> {
    pub fn from_dir(dir: &Path, loader: FileLoader<B>) -> Result<Self> {
        if !dir.exists() {
            return Err(PipelineError::MissingInput(dir.to_path_buf()).into());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)
            .with_context(|| format!("Cannot read directory '{}'", dir.display()))?
        {
            let path = entry?.path();
            if path.is_file() && FileKind::is_supported(&path) {
                files.push(path);
            }
        }
        tracing::info!("Found {} image files in '{}'", files.len(), dir.display());
        Ok(Self { files, loader })
    }

    pub fn from_paths(files: Vec<PathBuf>, loader: FileLoader<B>) -> Self {
        Self { files, loader }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

impl<B: Backend> Dataset<PathBuf> for FolderDataset<B> {
    fn get(&self, index: usize) -> Option<PathBuf> {
        self.files.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.files.len()
    }
}

impl<B: Backend> IndexedSource<ImageRecord<B>> for FolderDataset<B> {
    fn count(&self) -> usize {
        self.files.len()
    }

    fn load(&self, index: usize) -> Result<ImageRecord<B>> {
        let path = self
            .files
            .get(index)
            .ok_or_else(|| PipelineError::invariant(format!("sample index {index} out of range")))?;
        self.loader.load(path)
    }

    fn describe(&self, index: usize) -> String {
        self.files
            .get(index)
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

// ─── QuestionDataset ──────────────────────────────────────────────────────────
/// One shard of the question manifest, resolved against an image folder.
pub struct QuestionDataset<B: Backend> {
    questions:    Vec<QuestionRecord>,
    image_folder: PathBuf,
    loader:       FileLoader<B>,
    encoder:      Arc<dyn PromptEncoder>,
}

impl<B: Backend> QuestionDataset<B> {
    pub fn new(
        questions:    Vec<QuestionRecord>,
        image_folder: impl Into<PathBuf>,
        loader:       FileLoader<B>,
        encoder:      Arc<dyn PromptEncoder>,
    ) -> Self {
        Self { questions, image_folder: image_folder.into(), loader, encoder }
    }
}

impl<B: Backend> Dataset<QuestionRecord> for QuestionDataset<B> {
    fn get(&self, index: usize) -> Option<QuestionRecord> {
        self.questions.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.questions.len()
    }
}

impl<B: Backend> IndexedSource<PromptSample<B>> for QuestionDataset<B> {
    fn count(&self) -> usize {
        self.questions.len()
    }

    fn load(&self, index: usize) -> Result<PromptSample<B>> {
        let q = self
            .questions
            .get(index)
            .ok_or_else(|| PipelineError::invariant(format!("question index {index} out of range")))?;

        let path = self.image_folder.join(&q.image);
        let image = self
            .loader
            .load(&path)
            .with_context(|| format!("Cannot load image for question {}", q.question_id))?;
        let input_ids = self.encoder.encode_prompt(&q.text)?;

        Ok(PromptSample {
            question_id: q.question_id.clone(),
            prompt:      q.text.clone(),
            input_ids,
            image:       image.data,
            image_size:  image.file_size,
        })
    }

    fn describe(&self, index: usize) -> String {
        self.questions
            .get(index)
            .map(|q| format!("question {} ({})", q.question_id, q.image))
            .unwrap_or_default()
    }
}
