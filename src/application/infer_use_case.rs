// ============================================================
// Layer 2 — InferUseCase
// ============================================================
// Answers a question manifest with the vision-language model:
//
//   Step 1: Read the question manifest      (Layer 4 - manifest)
//   Step 2: Pick the compute device         (Layer 5 - device selector)
//   Step 3: Load model + tokenizer          (Layer 6 - checkpoint)
//   Step 4: Open the answer file            (Layer 6 - answer writer)
//   Step 5: Run this process's shard        (Layer 5 - inference driver)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::conversation::ConvMode;
use crate::data::manifest::JsonlManifest;
use crate::data::prefetch::FailurePolicy;
use crate::domain::record::QuestionRecord;
use crate::domain::traits::QuestionSource;
use crate::infra::answer_writer::AnswerWriter;
use crate::infra::checkpoint::CheckpointDir;
use crate::infra::tokenizer_store::{ConversationEncoder, TokenizerStore};
use crate::ml::device::{run_on, select_devices, ComputeDevice, DeviceInventory, DeviceTask};
use crate::ml::generation::GenerationParams;
use crate::ml::inferencer::{InferenceContext, InferenceDriver, InferenceSummary, ShardOptions};
use crate::ml::vlm::TinyVlm;

// ─── Inference Configuration ─────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferConfig {
    pub model_path:     PathBuf,
    /// Written as model_id; defaults to the model directory name
    pub model_base:     Option<String>,
    pub image_folder:   PathBuf,
    pub question_file:  PathBuf,
    pub answers_file:   PathBuf,
    pub conv_mode:      ConvMode,
    pub temperature:    f64,
    pub top_p:          Option<f64>,
    pub num_beams:      usize,
    pub max_new_tokens: usize,
    pub seed:           u64,
    pub shard:          ShardOptions,
    pub device:         String,
    pub accelerators:   usize,
    pub skip_failures:  bool,
}

impl Default for InferConfig {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            model_path:     PathBuf::from("models/tiny-vlm"),
            model_base:     None,
            image_folder:   PathBuf::from("images"),
            question_file:  PathBuf::from("questions.jsonl"),
            answers_file:   PathBuf::from("answers.jsonl"),
            conv_mode:      ConvMode::Llama,
            temperature:    params.temperature,
            top_p:          params.top_p,
            num_beams:      params.num_beams,
            max_new_tokens: params.max_new_tokens,
            seed:           params.seed,
            shard:          ShardOptions::default(),
            device:         "cpu".to_string(),
            accelerators:   1,
            skip_failures:  false,
        }
    }
}

impl InferConfig {
    fn generation_params(&self, eos_id: Option<u32>) -> GenerationParams {
        GenerationParams {
            temperature:    self.temperature,
            top_p:          self.top_p,
            num_beams:      self.num_beams,
            max_new_tokens: self.max_new_tokens,
            eos_id,
            seed:           self.seed,
        }
    }
}

// ─── InferUseCase ─────────────────────────────────────────────────────────────
pub struct InferUseCase {
    config: InferConfig,
}

impl InferUseCase {
    pub fn new(config: InferConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<InferenceSummary> {
        let cfg = &self.config;

        // ── Step 1: Questions ─────────────────────────────────────────────────
        let questions = JsonlManifest::new(&cfg.question_file).load_all()?;
        tracing::info!("Loaded {} questions from '{}'", questions.len(), cfg.question_file.display());

        // ── Step 2: Device ────────────────────────────────────────────────────
        let inventory = DeviceInventory::new(cfg.accelerators, cfg!(target_os = "macos"));
        let device = select_devices(&cfg.device, &inventory)
            .first()
            .copied()
            .unwrap_or(ComputeDevice::Cpu);

        // ── Steps 3-5 on the chosen backend ──────────────────────────────────
        run_on(device, InferTask { config: cfg.clone(), questions })
    }
}

struct InferTask {
    config:    InferConfig,
    questions: Vec<QuestionRecord>,
}

impl DeviceTask for InferTask {
    type Output = InferenceSummary;

    fn run<B: Backend>(self, device: B::Device) -> Result<InferenceSummary> {
        let cfg = &self.config;

        // ── Step 3: Model and tokenizer ───────────────────────────────────────
        let ckpt = CheckpointDir::open(&cfg.model_path)?;
        let generator = TinyVlm::<B>::load(&ckpt, &device)?;
        let store = TokenizerStore::load(&ckpt.tokenizer_path())?;
        store.ensure_fits(generator.vocab_size())?;
        let params = cfg.generation_params(store.eos_id());
        tracing::info!(
            "Decoding: temperature={} top_p={:?} beams={} max_new_tokens={}",
            params.temperature,
            params.top_p,
            params.num_beams,
            params.max_new_tokens
        );

        let ctx = InferenceContext {
            generator,
            encoder:  Arc::new(ConversationEncoder::new(store, cfg.conv_mode)),
            device,
            params,
            model_id: cfg.model_base.clone().or_else(|| ckpt.name()),
        };

        // ── Step 4: Answer file ───────────────────────────────────────────────
        let mut writer = AnswerWriter::create(&cfg.answers_file)?;

        // ── Step 5: Shard ─────────────────────────────────────────────────────
        let policy = if cfg.skip_failures { FailurePolicy::Skip } else { FailurePolicy::Abort };
        let driver = InferenceDriver::new(ctx, cfg.image_folder.clone()).with_failure_policy(policy);
        let summary = driver.run(&self.questions, &cfg.shard, &mut writer)?;

        tracing::info!("Wrote {} answers to '{}'", writer.written(), cfg.answers_file.display());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::tests::write_test_png;
    use crate::data::manifest::{read_jsonl, write_jsonl};
    use crate::domain::error::PipelineError;
    use crate::domain::record::AnswerRecord;
    use crate::infra::tokenizer_store::tests::write_test_tokenizer;
    use crate::ml::vlm::TinyVlmConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_end_to_end_with_saved_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("tiny-vlm");
        let ckpt = CheckpointDir::create(&model_dir).unwrap();
        let tok = write_test_tokenizer(&model_dir, &["describe", "normal", "heart"]);
        let vocab = TokenizerStore::load(&tok).unwrap().vocab_size();

        let config = TinyVlmConfig::new(vocab, 128, 8, 2, 1, 16).with_patch_size(128).with_vision_dim(8);
        ckpt.save_config(&config).unwrap();
        ckpt.save_weights::<TestBackend, _>(&config.init::<TestBackend>(&Default::default())).unwrap();

        write_test_png(&dir.path().join("x.jpg"), 8, 8);
        let questions = vec![
            QuestionRecord { question_id: "a".into(), image: "x.jpg".into(), text: "<image>\nDescribe".into() },
            QuestionRecord { question_id: "b".into(), image: "x.jpg".into(), text: "Describe the heart".into() },
        ];
        let question_file = dir.path().join("questions.jsonl");
        write_jsonl(&question_file, &questions).unwrap();

        let config = InferConfig {
            model_path:     model_dir,
            image_folder:   dir.path().to_path_buf(),
            question_file,
            answers_file:   dir.path().join("out/answers.jsonl"),
            temperature:    0.0,
            max_new_tokens: 3,
            shard:          ShardOptions { batch_size: 2, num_workers: 1, ..Default::default() },
            ..Default::default()
        };
        let summary = InferUseCase::new(config.clone()).execute().unwrap();
        assert_eq!(summary.answered, 2);

        let answers: Vec<AnswerRecord> = read_jsonl(&config.answers_file).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[0].question_id, "a".into());
        assert_eq!(answers[1].question_id, "b".into());
        assert_ne!(answers[0].answer_id, answers[1].answer_id);
        assert_eq!(answers[0].model_id.as_deref(), Some("tiny-vlm"));
    }

    #[test]
    fn test_tokenizer_larger_than_model_vocab_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("tiny-vlm");
        let ckpt = CheckpointDir::create(&model_dir).unwrap();
        write_test_tokenizer(&model_dir, &["describe", "normal", "heart", "lungs"]);

        let config = TinyVlmConfig::new(3, 128, 8, 2, 1, 16).with_patch_size(128).with_vision_dim(8);
        ckpt.save_config(&config).unwrap();
        ckpt.save_weights::<TestBackend, _>(&config.init::<TestBackend>(&Default::default())).unwrap();

        write_test_png(&dir.path().join("x.jpg"), 8, 8);
        let question_file = dir.path().join("questions.jsonl");
        write_jsonl(&question_file, &[QuestionRecord {
            question_id: "a".into(),
            image:       "x.jpg".into(),
            text:        "Describe".into(),
        }])
        .unwrap();

        let config = InferConfig {
            model_path:   model_dir,
            image_folder: dir.path().to_path_buf(),
            question_file,
            answers_file: dir.path().join("answers.jsonl"),
            temperature:  0.0,
            ..Default::default()
        };
        let err = InferUseCase::new(config.clone()).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InvariantViolation(_))));
        assert!(!config.answers_file.exists());
    }
}
