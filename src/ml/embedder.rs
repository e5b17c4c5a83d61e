// ============================================================
// Layer 5 — Sentence Encoder
// ============================================================
// Bidirectional transformer encoder with mean pooling, used by
// the semantic similarity metric:
//
//   text → tokenizer → ids (≤ max_seq_len)
//        → token + position embeddings
//        → TransformerStack (padding keys masked)
//        → LayerNorm
//        → mean over real tokens → [d_model]
//
// An empty text has no real tokens and embeds to the zero
// vector, which the cosine metric scores as 0.
//
// Reference: Reimers & Gurevych (2019) Sentence-BERT

use anyhow::{anyhow, Result};
use burn::{
    nn::{Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig},
    prelude::*,
};

use crate::data::batcher::pad_right;
use crate::domain::traits::SentenceEmbedder;
use crate::infra::checkpoint::CheckpointDir;
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::model::{position_ids, AttentionMask, TransformerConfig, TransformerStack};

#[derive(Config, Debug)]
pub struct SentenceEncoderConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
}

impl SentenceEncoderConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SentenceEncoderModel<B> {
        SentenceEncoderModel {
            token_embedding:    EmbeddingConfig::new(self.vocab_size, self.d_model).init(device),
            position_embedding: EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device),
            encoder: TransformerConfig::new(self.d_model, self.num_heads, self.num_layers, self.d_ff)
                .init(device),
            final_norm: LayerNormConfig::new(self.d_model).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct SentenceEncoderModel<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub encoder:            TransformerStack<B>,
    pub final_norm:         LayerNorm<B>,
}

impl<B: Backend> SentenceEncoderModel<B> {
    /// input_ids, attention_mask: [batch, seq] → [batch, d_model]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>, attention_mask: Tensor<B, 2, Int>) -> Tensor<B, 2> {
        let [batch, seq] = input_ids.dims();
        let device = input_ids.device();

        let x = self.token_embedding.forward(input_ids)
            + self.position_embedding.forward(position_ids::<B>(batch, seq, &device));
        let pad = AttentionMask::Padding(attention_mask.clone().equal_elem(0));
        let x = self.final_norm.forward(self.encoder.forward(x, &pad)); // [batch, seq, d]

        // Mean pooling over real tokens
        let weights = attention_mask.float().unsqueeze_dim::<3>(2); // [batch, seq, 1]
        let summed = (x * weights.clone()).sum_dim(1);             // [batch, 1, d]
        let counts = weights.sum_dim(1).clamp_min(1e-9);           // [batch, 1, 1]
        let pooled = summed / counts;
        let [_, _, d] = pooled.dims();
        pooled.reshape([batch, d])
    }
}

// ─── SentenceEncoder ──────────────────────────────────────────────────────────
pub struct SentenceEncoder<B: Backend> {
    model:       SentenceEncoderModel<B>,
    tokenizer:   TokenizerStore,
    max_seq_len: usize,
    device:      B::Device,
}

impl<B: Backend> SentenceEncoder<B> {
    pub fn new(model: SentenceEncoderModel<B>, tokenizer: TokenizerStore, max_seq_len: usize, device: B::Device) -> Self {
        Self { model, tokenizer, max_seq_len, device }
    }

    /// config.json + model.mpk + tokenizer.json from one directory.
    pub fn load(ckpt: &CheckpointDir, device: B::Device) -> Result<Self> {
        let config: SentenceEncoderConfig = ckpt.load_config()?;
        let model = ckpt.load_weights::<B, _>(config.init(&device), &device)?;
        let tokenizer = TokenizerStore::load(&ckpt.tokenizer_path())?;
        tokenizer.ensure_fits(config.vocab_size)?;
        tracing::info!("Sentence encoder loaded from '{}'", ckpt.path().display());
        Ok(Self::new(model, tokenizer, config.max_seq_len, device))
    }
}

impl<B: Backend> SentenceEmbedder for SentenceEncoder<B> {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::with_capacity(texts.len());
        for text in texts {
            let mut ids: Vec<i32> = self.tokenizer.encode(text)?.into_iter().map(|t| t as i32).collect();
            ids.truncate(self.max_seq_len);
            rows.push(ids);
        }
        let pad_id = self.tokenizer.pad_id() as i32;
        let (mut ids, mut mask, mut seq) = pad_right(&rows, pad_id);
        if seq == 0 {
            // every text empty: one masked pad column keeps the tensors non-empty
            ids = vec![pad_id; rows.len()];
            mask = vec![0; rows.len()];
            seq = 1;
        }

        let batch = rows.len();
        let input_ids = Tensor::<B, 1, Int>::from_ints(ids.as_slice(), &self.device).reshape([batch, seq]);
        let attention_mask = Tensor::<B, 1, Int>::from_ints(mask.as_slice(), &self.device).reshape([batch, seq]);

        let pooled = self.model.forward(input_ids, attention_mask);
        let [_, d] = pooled.dims();
        let flat = pooled
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("Cannot read embeddings: {e:?}"))?;
        Ok(flat.chunks(d.max(1)).map(<[f32]>::to_vec).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::PipelineError;
    use crate::infra::metrics::cosine;
    use crate::infra::tokenizer_store::tests::write_test_tokenizer;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn encoder() -> (tempfile::TempDir, SentenceEncoder<TestBackend>) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_tokenizer(dir.path(), &["clear", "lungs", "normal", "heart", "size"]);
        let tokenizer = TokenizerStore::load(&path).unwrap();
        let config = SentenceEncoderConfig::new(tokenizer.vocab_size(), 16, 8, 2, 1, 16);
        let device = Default::default();
        let model = config.init::<TestBackend>(&device);
        (dir, SentenceEncoder::new(model, tokenizer, 16, device))
    }

    #[test]
    fn test_one_vector_per_text() {
        let (_dir, enc) = encoder();
        let out = enc.embed(&["clear lungs", "normal heart size", ""]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|v| v.len() == 8));
        assert!(out[2].iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_identical_texts_have_cosine_one() {
        let (_dir, enc) = encoder();
        let out = enc.embed(&["clear lungs", "clear lungs"]).unwrap();
        assert!((cosine(&out[0], &out[1]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_padding_does_not_change_embedding() {
        let (_dir, enc) = encoder();
        let alone = enc.embed(&["clear lungs"]).unwrap();
        let padded = enc.embed(&["clear lungs", "normal heart size clear lungs"]).unwrap();
        assert!((cosine(&alone[0], &padded[0]) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_load_rejects_tokenizer_outside_vocab() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = CheckpointDir::create(dir.path()).unwrap();
        write_test_tokenizer(dir.path(), &["clear", "lungs", "normal"]);
        let config = SentenceEncoderConfig::new(3, 16, 8, 2, 1, 16);
        ckpt.save_config(&config).unwrap();
        ckpt.save_weights::<TestBackend, _>(&config.init::<TestBackend>(&Default::default())).unwrap();

        let err = SentenceEncoder::<TestBackend>::load(&ckpt, Default::default()).err().unwrap();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InvariantViolation(_))));
    }
}
