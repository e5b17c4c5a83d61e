// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams between the pipeline and its collaborators.
// Implementations live in the data, ml and infra layers:
//
//   QuestionSource   ← JsonlManifest          (data/manifest.rs)
//   AnswerSink       ← AnswerWriter           (infra/answer_writer.rs)
//   SentenceEmbedder ← SentenceEncoder        (ml/embedder.rs)
//   PromptEncoder    ← ConversationEncoder    (infra/tokenizer_store.rs)
//
// Framework-specific seams (segmentation network, generative
// model) take burn tensors and therefore live in the ml layer.

use anyhow::Result;

use crate::domain::record::{AnswerRecord, QuestionRecord};

// ─── QuestionSource ───────────────────────────────────────────────────────────
/// Anything that yields the full, ordered list of questions for a run.
pub trait QuestionSource {
    fn load_all(&self) -> Result<Vec<QuestionRecord>>;
}

// ─── AnswerSink ───────────────────────────────────────────────────────────────
/// Append-only destination for answer records.
///
/// `write_batch` must make the whole batch durable before returning,
/// so an interrupted run loses at most the batch in flight.
pub trait AnswerSink {
    fn write_batch(&mut self, records: &[AnswerRecord]) -> Result<()>;
}

impl AnswerSink for Vec<AnswerRecord> {
    fn write_batch(&mut self, records: &[AnswerRecord]) -> Result<()> {
        self.extend_from_slice(records);
        Ok(())
    }
}

// ─── SentenceEmbedder ─────────────────────────────────────────────────────────
/// Maps texts to fixed-size embedding vectors, one per input text.
pub trait SentenceEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

// ─── PromptEncoder ────────────────────────────────────────────────────────────
/// Turns a raw question into the token ids the generator consumes,
/// with the image placeholder already spliced in.
pub trait PromptEncoder: Send + Sync {
    fn encode_prompt(&self, question: &str) -> Result<Vec<i32>>;

    /// Value used to right-pad sequences within a batch.
    fn pad_id(&self) -> i32;
}
