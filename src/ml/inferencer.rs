// ============================================================
// Layer 5 — Inference Driver
// ============================================================
// Runs one shard of a question manifest through a generator:
//
//   questions ── get_chunk(num_chunks, chunk_idx) ──► shard
//   shard ── QuestionDataset ── Prefetcher ──► Vec<PromptSample>   (batch_size each)
//   samples ── PromptBatcher ──► PromptBatch (right-padded, on device)
//   batch ── TextGenerator::generate ──► new token ids
//   ids ── tokenizer.decode ── trim ──► AnswerRecord per sample
//   records ── AnswerSink::write_batch  (durable before the next batch)
//
// Output order is shard order. For a fixed (num_chunks,
// chunk_idx, batch_size) the answer file is reproducible up to
// the random answer ids.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use burn::{data::dataloader::batcher::Batcher, prelude::*};
use serde::{Deserialize, Serialize};

use crate::data::batcher::PromptBatcher;
use crate::data::chunker::get_chunk;
use crate::data::dataset::QuestionDataset;
use crate::data::loader::FileLoader;
use crate::data::prefetch::{FailurePolicy, Prefetcher};
use crate::domain::error::ensure_invariant;
use crate::domain::record::{AnswerRecord, QuestionRecord};
use crate::domain::traits::{AnswerSink, PromptEncoder};
use crate::infra::answer_writer::new_answer_id;
use crate::infra::tokenizer_store::ConversationEncoder;
use crate::ml::generation::{GenerationParams, TextGenerator};

/// Everything a run needs, passed explicitly instead of living in globals.
pub struct InferenceContext<B: Backend, G: TextGenerator<B>> {
    pub generator: G,
    pub encoder:   Arc<ConversationEncoder>,
    pub device:    B::Device,
    pub params:    GenerationParams,
    pub model_id:  Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardOptions {
    pub num_chunks:  usize,
    pub chunk_idx:   usize,
    pub batch_size:  usize,
    pub num_workers: usize,
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self { num_chunks: 1, chunk_idx: 0, batch_size: 1, num_workers: 16 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InferenceSummary {
    pub shard_len: usize,
    pub answered:  usize,
    pub batches:   usize,
}

pub struct InferenceDriver<B: Backend, G: TextGenerator<B>> {
    ctx:          InferenceContext<B, G>,
    image_folder: PathBuf,
    policy:       FailurePolicy,
}

impl<B: Backend, G: TextGenerator<B>> InferenceDriver<B, G> {
    pub fn new(ctx: InferenceContext<B, G>, image_folder: impl Into<PathBuf>) -> Self {
        Self { ctx, image_folder: image_folder.into(), policy: FailurePolicy::Abort }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn run(
        &self,
        questions: &[QuestionRecord],
        shard:     &ShardOptions,
        sink:      &mut dyn AnswerSink,
    ) -> Result<InferenceSummary> {
        let chunk = get_chunk(questions, shard.num_chunks, shard.chunk_idx)?;
        tracing::info!(
            "Chunk {}/{}: {} of {} questions",
            shard.chunk_idx + 1,
            shard.num_chunks,
            chunk.len(),
            questions.len()
        );

        let encoder: Arc<dyn PromptEncoder> = self.ctx.encoder.clone();
        let dataset = QuestionDataset::new(
            chunk.to_vec(),
            self.image_folder.clone(),
            FileLoader::<B>::new(self.ctx.device.clone()),
            encoder,
        );
        let prefetcher = Prefetcher::spawn(Arc::new(dataset), shard.batch_size, shard.num_workers, self.policy)?;
        let batcher = PromptBatcher::<B>::new(self.ctx.encoder.pad_id(), self.ctx.device.clone());

        let mut summary = InferenceSummary { shard_len: chunk.len(), ..Default::default() };
        for samples in prefetcher {
            let batch = batcher.batch(samples?);
            let outputs = self.ctx.generator.generate(&batch, &self.ctx.params)?;
            ensure_invariant(outputs.len() == batch.len(), || {
                format!("generator returned {} outputs for {} prompts", outputs.len(), batch.len())
            })?;

            let mut records = Vec::with_capacity(batch.len());
            for ((question_id, prompt), ids) in batch.question_ids.iter().zip(&batch.prompts).zip(&outputs) {
                let text = self.ctx.encoder.store().decode(ids)?;
                records.push(AnswerRecord {
                    question_id: question_id.clone(),
                    prompt:      prompt.clone(),
                    text:        text.trim().to_string(),
                    answer_id:   new_answer_id(),
                    model_id:    self.ctx.model_id.clone(),
                    metadata:    Default::default(),
                });
            }
            sink.write_batch(&records)?;

            summary.answered += records.len();
            summary.batches += 1;
            tracing::debug!("Batch {} done ({} answers so far)", summary.batches, summary.answered);
        }

        tracing::info!("Answered {} of {} questions", summary.answered, summary.shard_len);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::PromptBatch;
    use crate::data::conversation::ConvMode;
    use crate::data::loader::tests::write_test_png;
    use crate::infra::tokenizer_store::tests::write_test_tokenizer;
    use crate::infra::tokenizer_store::TokenizerStore;
    use burn::backend::NdArray;
    use std::collections::HashSet;

    type TestBackend = NdArray;

    /// Answers every prompt with the ids of "normal heart".
    struct Canned {
        ids: Vec<u32>,
    }

    impl TextGenerator<TestBackend> for Canned {
        fn generate(&self, batch: &PromptBatch<TestBackend>, _: &GenerationParams) -> Result<Vec<Vec<u32>>> {
            Ok(vec![self.ids.clone(); batch.len()])
        }
    }

    fn question(id: &str, image: &str) -> QuestionRecord {
        QuestionRecord { question_id: id.into(), image: image.into(), text: "<image>\nDescribe".into() }
    }

    fn driver(dir: &std::path::Path) -> InferenceDriver<TestBackend, Canned> {
        let tok = write_test_tokenizer(dir, &["describe", "normal", "heart"]);
        let store = TokenizerStore::load(&tok).unwrap();
        let ids = store.encode("normal heart").unwrap();
        let ctx = InferenceContext {
            generator: Canned { ids },
            encoder:   Arc::new(ConversationEncoder::new(store, ConvMode::Plain)),
            device:    Default::default(),
            params:    GenerationParams::default(),
            model_id:  Some("tiny-vlm".into()),
        };
        InferenceDriver::new(ctx, dir)
    }

    #[test]
    fn test_two_questions_two_ordered_answers() {
        let dir = tempfile::tempdir().unwrap();
        write_test_png(&dir.path().join("x.jpg"), 6, 4);
        write_test_png(&dir.path().join("y.jpg"), 4, 4);

        let mut answers: Vec<AnswerRecord> = Vec::new();
        let shard = ShardOptions { batch_size: 2, num_workers: 2, ..Default::default() };
        let summary = driver(dir.path())
            .run(&[question("a", "x.jpg"), question("b", "y.jpg")], &shard, &mut answers)
            .unwrap();

        assert_eq!(summary, InferenceSummary { shard_len: 2, answered: 2, batches: 1 });
        let ids: Vec<String> = answers.iter().map(|a| a.question_id.to_string()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(answers.iter().map(|a| &a.answer_id).collect::<HashSet<_>>().len(), 2);
        assert_eq!(answers[0].text, "normal heart");
        assert_eq!(answers[0].prompt, "<image>\nDescribe");
        assert_eq!(answers[1].model_id.as_deref(), Some("tiny-vlm"));
    }

    #[test]
    fn test_chunk_selects_shard() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1.png", "2.png", "3.png"] {
            write_test_png(&dir.path().join(name), 4, 4);
        }
        let questions = [question("q1", "1.png"), question("q2", "2.png"), question("q3", "3.png")];

        let mut answers: Vec<AnswerRecord> = Vec::new();
        let shard = ShardOptions { num_chunks: 2, chunk_idx: 1, batch_size: 1, num_workers: 1 };
        let summary = driver(dir.path()).run(&questions, &shard, &mut answers).unwrap();

        assert_eq!(summary.batches, 1);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].question_id.to_string(), "q3");
    }

    #[test]
    fn test_missing_image_aborts_by_default_and_skips_on_request() {
        let dir = tempfile::tempdir().unwrap();
        write_test_png(&dir.path().join("ok.png"), 4, 4);
        let questions = [question("bad", "missing.png"), question("good", "ok.png")];
        let shard = ShardOptions { batch_size: 1, num_workers: 1, ..Default::default() };

        let mut answers: Vec<AnswerRecord> = Vec::new();
        assert!(driver(dir.path()).run(&questions, &shard, &mut answers).is_err());
        assert!(answers.is_empty());

        let mut answers: Vec<AnswerRecord> = Vec::new();
        let summary = driver(dir.path())
            .with_failure_policy(FailurePolicy::Skip)
            .run(&questions, &shard, &mut answers)
            .unwrap();
        assert_eq!(summary.answered, 1);
        assert_eq!(answers[0].question_id.to_string(), "good");
    }
}
