// ============================================================
// Layer 4 — Batchers
// ============================================================
// Implements Burn's Batcher trait for the two sample kinds:
//
//   ImageRecord  → ImageBatch   (segmentation)
//   PromptSample → PromptBatch  (question answering)
//
// A batch is a struct of arrays: every per-sample field becomes
// a Vec in sample order, except the pixel tensors, which are
// concatenated along the batch dimension.
//
// Prompts have different token lengths, so PromptBatcher
// right-pads them to the longest sequence of the batch:
//
//   [t1 t2 t3 t4]        [t1 t2 t3 t4]   mask [1 1 1 1]
//   [u1 u2]          →   [u1 u2 P  P ]        [1 1 0 0]
//
// Reference: Burn Book §4 (Batcher)

use std::path::PathBuf;

use burn::{data::dataloader::batcher::Batcher, prelude::*};
use ndarray::Array3;

use crate::data::loader::ImageRecord;
use crate::domain::record::QuestionId;

// ─── ImageBatch ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// shape: [batch, 3, S, S]
    pub data:       Tensor<B, 4>,
    pub orig_data:  Vec<Array3<u8>>,
    pub filenames:  Vec<PathBuf>,
    pub file_sizes: Vec<(usize, usize)>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<ImageRecord<B>, ImageBatch<B>> for ImageBatcher<B> {
    /// Callers never pass an empty batch; the prefetcher drops them.
    fn batch(&self, items: Vec<ImageRecord<B>>) -> ImageBatch<B> {
        let mut tensors    = Vec::with_capacity(items.len());
        let mut orig_data  = Vec::with_capacity(items.len());
        let mut filenames  = Vec::with_capacity(items.len());
        let mut file_sizes = Vec::with_capacity(items.len());

        for item in items {
            tensors.push(item.data);
            orig_data.push(item.orig_data);
            filenames.push(item.filename);
            file_sizes.push(item.file_size);
        }

        ImageBatch {
            data: Tensor::cat(tensors, 0).to_device(&self.device),
            orig_data,
            filenames,
            file_sizes,
        }
    }
}

// ─── PromptSample / PromptBatch ───────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct PromptSample<B: Backend> {
    pub question_id: QuestionId,
    /// Question text as it appeared in the manifest
    pub prompt:      String,
    /// Templated prompt tokens, image placeholder included
    pub input_ids:   Vec<i32>,
    /// shape: [1, 3, S, S]
    pub image:       Tensor<B, 4>,
    pub image_size:  (usize, usize),
}

#[derive(Debug, Clone)]
pub struct PromptBatch<B: Backend> {
    pub question_ids:   Vec<QuestionId>,
    pub prompts:        Vec<String>,
    /// Unpadded token ids, one row per sample
    pub token_ids:      Vec<Vec<i32>>,
    /// shape: [batch, max_len], right-padded with the pad id
    pub input_ids:      Tensor<B, 2, Int>,
    /// shape: [batch, max_len], 1 = real token
    pub attention_mask: Tensor<B, 2, Int>,
    /// shape: [batch, 3, S, S]
    pub images:         Tensor<B, 4>,
    pub image_sizes:    Vec<(usize, usize)>,
}

impl<B: Backend> PromptBatch<B> {
    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }
}

/// Right-pad every row to the longest one.
/// Returns (flat ids, flat mask, max_len).
pub fn pad_right(rows: &[Vec<i32>], pad_id: i32) -> (Vec<i32>, Vec<i32>, usize) {
    let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut ids  = Vec::with_capacity(rows.len() * max_len);
    let mut mask = Vec::with_capacity(rows.len() * max_len);
    for row in rows {
        ids.extend_from_slice(row);
        ids.extend(std::iter::repeat(pad_id).take(max_len - row.len()));
        mask.extend(std::iter::repeat(1).take(row.len()));
        mask.extend(std::iter::repeat(0).take(max_len - row.len()));
    }
    (ids, mask, max_len)
}

#[derive(Clone, Debug)]
pub struct PromptBatcher<B: Backend> {
    pub pad_id: i32,
    pub device: B::Device,
}

impl<B: Backend> PromptBatcher<B> {
    pub fn new(pad_id: i32, device: B::Device) -> Self {
        Self { pad_id, device }
    }
}

impl<B: Backend> Batcher<PromptSample<B>, PromptBatch<B>> for PromptBatcher<B> {
    fn batch(&self, items: Vec<PromptSample<B>>) -> PromptBatch<B> {
        let batch_size = items.len();

        let mut question_ids = Vec::with_capacity(batch_size);
        let mut prompts      = Vec::with_capacity(batch_size);
        let mut token_ids    = Vec::with_capacity(batch_size);
        let mut images       = Vec::with_capacity(batch_size);
        let mut image_sizes  = Vec::with_capacity(batch_size);

        for item in items {
            question_ids.push(item.question_id);
            prompts.push(item.prompt);
            token_ids.push(item.input_ids);
            images.push(item.image);
            image_sizes.push(item.image_size);
        }

        // ── Pad and build the id / mask tensors ───────────────────────────────
        let (ids_flat, mask_flat, max_len) = pad_right(&token_ids, self.pad_id);

        let input_ids = Tensor::<B, 1, Int>::from_ints(ids_flat.as_slice(), &self.device)
            .reshape([batch_size, max_len]);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), &self.device)
            .reshape([batch_size, max_len]);

        PromptBatch {
            question_ids,
            prompts,
            token_ids,
            input_ids,
            attention_mask,
            images: Tensor::cat(images, 0).to_device(&self.device),
            image_sizes,
        }
    }
}
