// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All networks and everything that drives them.
//
//   model.rs      — Transformer block and stack shared by the
//                   encoder and the language model
//                   (full, padding or causal attention mask)
//
//   segmenter.rs  — Segmenter trait + AnatomyUnet
//                   [B,3,512,512] → [B,N,512,512] probabilities
//
//   vlm.rs        — TinyVlm: patch vision tower, projector,
//                   causal LM; image features spliced in at
//                   the image token
//
//   embedder.rs   — SentenceEncoder: mean-pooled encoder for
//                   the semantic similarity metric
//
//   generation.rs — TextGenerator trait; greedy, beam search
//                   and top-p sampling
//
//   inferencer.rs — InferenceDriver: shard → batches →
//                   generate → decode → answer file
//
//   device.rs     — device selector strings → burn backend
//
// Reference: Burn Book §3 (Building Blocks)
//            Vaswani et al. (2017) Attention Is All You Need

/// Transformer building blocks
pub mod model;

/// Anatomy segmentation network
pub mod segmenter;

/// Vision-language generator
pub mod vlm;

/// Sentence embeddings for semantic similarity
pub mod embedder;

/// Decoding strategies
pub mod generation;

/// Batched question answering over a manifest shard
pub mod inferencer;

/// Device selection and backend dispatch
pub mod device;
