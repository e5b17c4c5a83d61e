// ============================================================
// Layer 2 — SegmentUseCase
// ============================================================
// Segments chest X-rays and exports the masks:
//
//   Step 1: Resolve the input           (txt list / folder / single file)
//   Step 2: Pick the compute device     (Layer 5 - device selector)
//   Step 3: Load the model + labels     (Layer 6 - checkpoint)
//   Step 4: Prefetch + batch images     (Layer 4 - data)
//   Step 5: Segment, threshold at 0.5   (Layer 5 - ml)
//   Step 6: Export each mask            (Layer 6 - saver)
//
// A missing input fails before any model is loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::{data::dataloader::batcher::Batcher, prelude::*};
use serde::{Deserialize, Serialize};

use crate::data::batcher::ImageBatcher;
use crate::data::dataset::FolderDataset;
use crate::data::loader::FileLoader;
use crate::data::prefetch::{FailurePolicy, Prefetcher};
use crate::domain::error::PipelineError;
use crate::infra::checkpoint::CheckpointDir;
use crate::infra::saver::{ExportMode, FileSaver};
use crate::ml::device::{run_on, select_devices, DeviceInventory, DeviceTask};
use crate::ml::segmenter::{threshold_masks, AnatomyUnet, Segmenter, MASK_THRESHOLD};

/// COCO annotation ids restart here for every exported file.
const BASE_ANNOTATION_ID: u64 = 1;

// ─── Segment Configuration ───────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub input:         PathBuf,
    pub base_path:     Option<PathBuf>,
    pub output:        PathBuf,
    pub mode:          ExportMode,
    pub device:        String,
    pub accelerators:  usize,
    pub model_dir:     PathBuf,
    pub batch_size:    usize,
    pub num_workers:   usize,
    pub skip_failures: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            input:         PathBuf::from("images"),
            base_path:     None,
            output:        PathBuf::from("output"),
            mode:          ExportMode::Png,
            device:        "cpu".to_string(),
            accelerators:  1,
            model_dir:     PathBuf::from("models/anatomy-unet"),
            batch_size:    1,
            num_workers:   4,
            skip_failures: false,
        }
    }
}

// ─── Input resolution ─────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentInput {
    /// Every supported file in a directory
    Folder(PathBuf),
    /// An explicit list of files
    Files(Vec<PathBuf>),
}

/// A `.txt` file lists one path per line (joined onto `base_path`);
/// a directory is enumerated; any other file stands alone.
pub fn resolve_input(input: &Path, base_path: Option<&Path>) -> Result<SegmentInput> {
    if !input.exists() {
        return Err(PipelineError::MissingInput(input.to_path_buf()).into());
    }
    if input.is_dir() {
        return Ok(SegmentInput::Folder(input.to_path_buf()));
    }

    let is_list = input
        .extension()
        .map(|e| e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    if !is_list {
        return Ok(SegmentInput::Files(vec![input.to_path_buf()]));
    }

    let listing = fs::read_to_string(input)
        .with_context(|| format!("Cannot read path list '{}'", input.display()))?;
    let mut files = Vec::new();
    for line in listing.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let path = match base_path {
            Some(base) => base.join(line),
            None => PathBuf::from(line),
        };
        if path.is_file() {
            files.push(path);
        } else {
            tracing::warn!("Listed file '{}' does not exist; skipping", path.display());
        }
    }
    tracing::info!("Path list '{}' names {} existing files", input.display(), files.len());
    Ok(SegmentInput::Files(files))
}

// ─── Segmentation loop ────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentSummary {
    pub images:  usize,
    pub written: usize,
}

/// Segment every file of `dataset` and export each mask with `saver`.
pub fn segment_dataset<B: Backend, S: Segmenter<B>>(
    segmenter: &S,
    dataset:   FolderDataset<B>,
    saver:     &FileSaver,
    config:    &SegmentConfig,
    device:    &B::Device,
) -> Result<SegmentSummary> {
    let policy = if config.skip_failures { FailurePolicy::Skip } else { FailurePolicy::Abort };
    let total = dataset.files().len();
    let prefetcher = Prefetcher::spawn(Arc::new(dataset), config.batch_size, config.num_workers, policy)?;
    let batcher = ImageBatcher::<B>::new(device.clone());

    let mut summary = SegmentSummary::default();
    for records in prefetcher {
        let batch = batcher.batch(records?);
        let masks = threshold_masks(segmenter.segment(batch.data), MASK_THRESHOLD)?;

        for ((mask, filename), orig) in masks.iter().zip(&batch.filenames).zip(&batch.orig_data) {
            let paths = saver.save(mask, config.mode, &config.output, filename, orig, BASE_ANNOTATION_ID)?;
            summary.written += paths.len();
            summary.images += 1;
        }
        tracing::info!("Segmented {}/{} images", summary.images, total);
    }
    Ok(summary)
}

// ─── SegmentUseCase ───────────────────────────────────────────────────────────
pub struct SegmentUseCase {
    config: SegmentConfig,
}

impl SegmentUseCase {
    pub fn new(config: SegmentConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<SegmentSummary> {
        let cfg = &self.config;

        // ── Step 1: Resolve input ─────────────────────────────────────────────
        let input = resolve_input(&cfg.input, cfg.base_path.as_deref())?;

        // ── Step 2: Device ────────────────────────────────────────────────────
        let inventory = DeviceInventory::new(cfg.accelerators, cfg!(target_os = "macos"));
        let devices = select_devices(&cfg.device, &inventory);
        let device = devices.first().copied().unwrap_or(crate::ml::device::ComputeDevice::Cpu);
        if devices.len() > 1 {
            tracing::info!("Device selector '{}' names {} devices; using {}", cfg.device, devices.len(), device);
        }

        // ── Steps 3-6 on the chosen backend ──────────────────────────────────
        run_on(device, SegmentTask { config: cfg.clone(), input })
    }
}

struct SegmentTask {
    config: SegmentConfig,
    input:  SegmentInput,
}

impl DeviceTask for SegmentTask {
    type Output = SegmentSummary;

    fn run<B: Backend>(self, device: B::Device) -> Result<SegmentSummary> {
        let ckpt = CheckpointDir::open(&self.config.model_dir)?;
        let model = AnatomyUnet::<B>::load(&ckpt, &device)?;
        let categories = ckpt.load_labels(model.num_categories())?;

        let loader = FileLoader::<B>::new(device.clone());
        let dataset = match self.input {
            SegmentInput::Folder(dir) => FolderDataset::from_dir(&dir, loader)?,
            SegmentInput::Files(files) => FolderDataset::from_paths(files, loader),
        };
        tracing::info!("Segmenting {} images as {}", dataset.files().len(), self.config.mode);

        let summary = segment_dataset(&model, dataset, &FileSaver::new(categories), &self.config, &device)?;
        tracing::info!(
            "Wrote {} files for {} images to '{}'",
            summary.written,
            summary.images,
            self.config.output.display()
        );
        Ok(summary)
    }
}
