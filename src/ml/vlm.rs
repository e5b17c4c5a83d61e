// ============================================================
// Layer 5 — Tiny Vision-Language Model
// ============================================================
// A LLaVA-shaped generator small enough to ship with the repo:
//
//   image [3, S, S]
//     → Conv2d(patch, stride = patch)      [vision_dim, S/p, S/p]
//     → flatten to patches                 [P, vision_dim]
//     → vision TransformerStack
//     → projector Linear → GELU → Linear   [P, d_model]
//
//   prompt ids  ... t₁ t₂ -200 t₃ t₄ ...
//                          │
//                          └─ replaced by the P projected patches
//
//   [prompt embeddings ‖ generated-token embeddings]
//     + positions → causal TransformerStack → LayerNorm → lm_head
//
// Sequences are right-padded inside a step; under the causal mask
// no real position sees a padded one, so the logits at each
// sample's last real position are unaffected by padding.
// Sequences longer than max_seq_len keep their last max_seq_len
// positions.
//
// Reference: Liu et al. (2023) Visual Instruction Tuning

use anyhow::{anyhow, Result};
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::gelu,
};

use crate::data::batcher::PromptBatch;
use crate::domain::error::ensure_invariant;
use crate::infra::checkpoint::CheckpointDir;
use crate::infra::tokenizer_store::IMAGE_TOKEN_INDEX;
use crate::ml::generation::{decode, GenerationParams, NextTokenScorer, ScoreRow, TextGenerator};
use crate::ml::model::{position_ids, AttentionMask, TransformerConfig, TransformerStack};

#[derive(Config, Debug)]
pub struct TinyVlmConfig {
    pub vocab_size:    usize,
    pub max_seq_len:   usize,
    pub d_model:       usize,
    pub num_heads:     usize,
    pub num_layers:    usize,
    pub d_ff:          usize,
    #[config(default = 32)]
    pub patch_size:    usize,
    #[config(default = 64)]
    pub vision_dim:    usize,
    #[config(default = 1)]
    pub vision_layers: usize,
}

impl TinyVlmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TinyVlm<B> {
        let p = self.patch_size;
        TinyVlm {
            patch_embed: Conv2dConfig::new([3, self.vision_dim], [p, p])
                .with_stride([p, p])
                .init(device),
            vision: TransformerConfig::new(self.vision_dim, self.num_heads, self.vision_layers, 2 * self.vision_dim)
                .init(device),
            projector_in:       LinearConfig::new(self.vision_dim, self.d_model).init(device),
            projector_out:      LinearConfig::new(self.d_model, self.d_model).init(device),
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device),
            language: TransformerConfig::new(self.d_model, self.num_heads, self.num_layers, self.d_ff)
                .init(device),
            final_norm: LayerNormConfig::new(self.d_model).init(device),
            lm_head:    LinearConfig::new(self.d_model, self.vocab_size).init(device),
            max_seq_len: self.max_seq_len,
        }
    }
}

#[derive(Module, Debug)]
pub struct TinyVlm<B: Backend> {
    pub patch_embed:        Conv2d<B>,
    pub vision:             TransformerStack<B>,
    pub projector_in:       Linear<B>,
    pub projector_out:      Linear<B>,
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub language:           TransformerStack<B>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Linear<B>,
    pub max_seq_len:        usize,
}

impl<B: Backend> TinyVlm<B> {
    pub fn load(ckpt: &CheckpointDir, device: &B::Device) -> Result<Self> {
        let config: TinyVlmConfig = ckpt.load_config()?;
        let model = ckpt.load_weights::<B, _>(config.init(device), device)?;
        tracing::info!(
            "Vision-language model loaded from '{}' (vocab {}, {} layers)",
            ckpt.path().display(),
            config.vocab_size,
            config.num_layers
        );
        Ok(model)
    }

    /// Rows of the token embedding table.
    pub fn vocab_size(&self) -> usize {
        self.token_embedding.weight.val().dims()[0]
    }

    /// images: [batch, 3, S, S] → projected patches [batch, P, d_model]
    pub fn encode_images(&self, images: Tensor<B, 4>) -> Tensor<B, 3> {
        let patches = self.patch_embed.forward(images); // [batch, vd, S/p, S/p]
        let [batch, vd, gh, gw] = patches.dims();
        let patches = patches.reshape([batch, vd, gh * gw]).swap_dims(1, 2);
        let features = self.vision.forward(patches, &AttentionMask::Full);
        self.projector_out.forward(gelu(self.projector_in.forward(features)))
    }

    fn embed_tokens(&self, ids: &[i32], device: &B::Device) -> Tensor<B, 2> {
        let n = ids.len();
        let ids = Tensor::<B, 1, Int>::from_ints(ids, device).reshape([1, n]);
        let emb = self.token_embedding.forward(ids); // [1, n, d]
        let [_, _, d] = emb.dims();
        emb.reshape([n, d])
    }

    /// Prompt embeddings with every IMAGE_TOKEN_INDEX replaced by the
    /// sample's image patches: one [len, d_model] tensor per sample.
    pub fn prompt_embeddings(&self, batch: &PromptBatch<B>) -> Result<Vec<Tensor<B, 2>>> {
        let device = batch.images.device();
        let image_features = self.encode_images(batch.images.clone());
        let [n_images, p, d] = image_features.dims();
        ensure_invariant(n_images == batch.len(), || {
            format!("{} images for {} prompts", n_images, batch.len())
        })?;

        let mut out = Vec::with_capacity(batch.len());
        for (i, ids) in batch.token_ids.iter().enumerate() {
            let image = image_features.clone().slice([i..i + 1, 0..p, 0..d]).reshape([p, d]);
            let mut pieces = Vec::new();
            for (k, segment) in ids.split(|&t| t == IMAGE_TOKEN_INDEX).enumerate() {
                if k > 0 {
                    pieces.push(image.clone());
                }
                if !segment.is_empty() {
                    pieces.push(self.embed_tokens(segment, &device));
                }
            }
            ensure_invariant(!pieces.is_empty(), || format!("prompt {i} has no tokens"))?;
            out.push(Tensor::cat(pieces, 0));
        }
        Ok(out)
    }

    /// Last-position logits for each sequence of embeddings.
    fn last_logits(&self, sequences: Vec<Tensor<B, 2>>) -> Result<Vec<Vec<f32>>> {
        let Some(first) = sequences.first() else {
            return Ok(Vec::new());
        };
        let device = first.device();
        let [_, d] = first.dims();

        let mut lengths = Vec::with_capacity(sequences.len());
        let mut rows = Vec::with_capacity(sequences.len());
        for seq in sequences {
            let [len, _] = seq.dims();
            let seq = if len > self.max_seq_len {
                seq.slice([len - self.max_seq_len..len, 0..d])
            } else {
                seq
            };
            lengths.push(len.min(self.max_seq_len));
            rows.push(seq);
        }
        let max_len = lengths.iter().copied().max().unwrap_or(1);
        let batch = rows.len();

        let padded: Vec<Tensor<B, 2>> = rows
            .into_iter()
            .zip(&lengths)
            .map(|(row, &len)| {
                if len < max_len {
                    Tensor::cat(vec![row, Tensor::zeros([max_len - len, d], &device)], 0)
                } else {
                    row
                }
            })
            .collect();

        let x = Tensor::stack::<3>(padded, 0)
            + self.position_embedding.forward(position_ids::<B>(batch, max_len, &device));
        let x = self.final_norm.forward(self.language.forward(x, &AttentionMask::Causal));
        let logits = self.lm_head.forward(x); // [batch, max_len, vocab]
        let [_, _, vocab] = logits.dims();

        lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| {
                logits
                    .clone()
                    .slice([i..i + 1, len - 1..len, 0..vocab])
                    .into_data()
                    .to_vec::<f32>()
                    .map_err(|e| anyhow!("Cannot read logits: {e:?}"))
            })
            .collect()
    }
}

// ─── Generation ───────────────────────────────────────────────────────────────
/// One batch's prompt embeddings, scored against growing continuations.
struct VlmSession<'a, B: Backend> {
    model:   &'a TinyVlm<B>,
    prompts: Vec<Tensor<B, 2>>,
}

impl<B: Backend> NextTokenScorer for VlmSession<'_, B> {
    fn next_logits(&self, rows: &[ScoreRow<'_>]) -> Result<Vec<Vec<f32>>> {
        let mut sequences = Vec::with_capacity(rows.len());
        for row in rows {
            let prompt = self
                .prompts
                .get(row.sample)
                .ok_or_else(|| anyhow!("No prompt for sample {}", row.sample))?
                .clone();
            if row.generated.is_empty() {
                sequences.push(prompt);
            } else {
                let ids: Vec<i32> = row.generated.iter().map(|&t| t as i32).collect();
                let generated = self.model.embed_tokens(&ids, &prompt.device());
                sequences.push(Tensor::cat(vec![prompt, generated], 0));
            }
        }
        self.model.last_logits(sequences)
    }
}

impl<B: Backend> TextGenerator<B> for TinyVlm<B> {
    fn generate(&self, batch: &PromptBatch<B>, params: &GenerationParams) -> Result<Vec<Vec<u32>>> {
        let session = VlmSession { model: self, prompts: self.prompt_embeddings(batch)? };
        decode(&session, batch.len(), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::{PromptBatcher, PromptSample};
    use burn::backend::NdArray;
    use burn::data::dataloader::batcher::Batcher;

    type TestBackend = NdArray;

    fn config() -> TinyVlmConfig {
        TinyVlmConfig::new(12, 64, 8, 2, 1, 16)
            .with_patch_size(4)
            .with_vision_dim(8)
    }

    fn batch(rows: Vec<Vec<i32>>) -> PromptBatch<TestBackend> {
        let device = Default::default();
        let samples = rows
            .into_iter()
            .enumerate()
            .map(|(i, ids)| PromptSample {
                question_id: format!("q{i}").into(),
                prompt:      "Describe".into(),
                input_ids:   ids,
                image:       Tensor::ones([1, 3, 8, 8], &device),
                image_size:  (8, 8),
            })
            .collect();
        PromptBatcher::<TestBackend>::new(0, device).batch(samples)
    }

    #[test]
    fn test_image_token_expands_to_patches() {
        let model = config().init::<TestBackend>(&Default::default());
        // 8×8 image, 4×4 patches → 4 image positions
        let emb = model.prompt_embeddings(&batch(vec![vec![2, IMAGE_TOKEN_INDEX, 5, 6]])).unwrap();
        assert_eq!(emb[0].dims(), [1 + 4 + 2, 8]);
    }

    #[test]
    fn test_generate_respects_max_new_tokens() {
        let model = config().init::<TestBackend>(&Default::default());
        let params = GenerationParams { temperature: 0.0, max_new_tokens: 3, eos_id: None, ..Default::default() };
        let out = model
            .generate(&batch(vec![vec![2, IMAGE_TOKEN_INDEX, 5], vec![2, IMAGE_TOKEN_INDEX, 5, 6, 7]]), &params)
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|ids| ids.len() == 3 && ids.iter().all(|&t| t < 12)));
    }

    #[test]
    fn test_padding_does_not_change_greedy_output() {
        let model = config().init::<TestBackend>(&Default::default());
        let params = GenerationParams { temperature: 0.0, max_new_tokens: 2, eos_id: None, ..Default::default() };
        let short = vec![2, IMAGE_TOKEN_INDEX, 5];

        let alone = model.generate(&batch(vec![short.clone()]), &params).unwrap();
        let mixed = model.generate(&batch(vec![short, vec![2, IMAGE_TOKEN_INDEX, 5, 6, 7, 8]]), &params).unwrap();
        assert_eq!(alone[0], mixed[0]);
    }
}
