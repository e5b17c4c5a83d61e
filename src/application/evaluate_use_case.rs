// ============================================================
// Layer 2 — EvaluateUseCase / AverageUseCase
// ============================================================
// evaluate:
//   Step 1: Read reference + answer JSONL       (Layer 4 - manifest)
//   Step 2: Pair and check every question_id    (Layer 6 - metrics)
//   Step 3: Optionally load the sentence model  (Layer 5 - embedder)
//   Step 4: Score each pair, aggregate means    (Layer 6 - metrics)
//   Step 5: Write per-pair results + averages   (Layer 4 - manifest)
//
// average:
//   per-pair results JSON → averages JSON
//
// A mismatched pair fails the run before any pair is scored.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use burn::backend::{ndarray::NdArrayDevice, NdArray};
use serde::{Deserialize, Serialize};

use crate::data::manifest::{read_json, read_jsonl, write_json};
use crate::domain::record::{MetricRecord, TextRecord};
use crate::domain::traits::SentenceEmbedder;
use crate::infra::checkpoint::CheckpointDir;
use crate::infra::metrics::{pair_records, MetricAggregator, MetricSuite, PairingMode};
use crate::ml::embedder::SentenceEncoder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateConfig {
    pub reference_file: PathBuf,
    pub answers_file:   PathBuf,
    pub pairing:        PairingMode,
    /// Sentence encoder checkpoint; enables the SEMANTIC metric
    pub embedder:       Option<PathBuf>,
    pub results_file:   PathBuf,
    pub averages_file:  PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub per_pair: Vec<MetricRecord>,
    pub averages: BTreeMap<String, f64>,
}

/// Score already-loaded records.
pub fn evaluate_records(
    reference:  Vec<TextRecord>,
    hypothesis: Vec<TextRecord>,
    pairing:    PairingMode,
    embedder:   Option<&dyn SentenceEmbedder>,
) -> Result<Evaluation> {
    let pairs = pair_records(reference, hypothesis, pairing)?;
    let suite = MetricSuite::new(embedder);
    let mut aggregator = MetricAggregator::new();

    let mut per_pair = Vec::with_capacity(pairs.len());
    for (r, h) in pairs {
        let metrics = suite.score(&r.text, &h.text)?;
        aggregator.add(&metrics);
        per_pair.push(MetricRecord { question_id: r.question_id, metrics });
    }
    Ok(Evaluation { per_pair, averages: aggregator.averages() })
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<Evaluation> {
        let cfg = &self.config;

        // ── Step 1: Both sides ────────────────────────────────────────────────
        let reference: Vec<TextRecord> = read_jsonl(&cfg.reference_file)?;
        let hypothesis: Vec<TextRecord> = read_jsonl(&cfg.answers_file)?;
        tracing::info!(
            "Comparing {} reference and {} answer records ({:?} pairing)",
            reference.len(),
            hypothesis.len(),
            cfg.pairing
        );

        // ── Step 3: Sentence encoder, CPU ─────────────────────────────────────
        let encoder = match &cfg.embedder {
            Some(dir) => Some(SentenceEncoder::<NdArray>::load(&CheckpointDir::open(dir)?, NdArrayDevice::Cpu)?),
            None => None,
        };

        // ── Steps 2 and 4 ────────────────────────────────────────────────────
        let embedder = encoder.as_ref().map(|e| e as &dyn SentenceEmbedder);
        let evaluation = evaluate_records(reference, hypothesis, cfg.pairing, embedder)?;

        // ── Step 5: Write ─────────────────────────────────────────────────────
        write_json(&cfg.results_file, &evaluation.per_pair)?;
        write_json(&cfg.averages_file, &evaluation.averages)?;
        for (name, value) in &evaluation.averages {
            tracing::info!("{:<9} {:.4}", name, value);
        }
        tracing::info!(
            "Scored {} pairs; results in '{}', averages in '{}'",
            evaluation.per_pair.len(),
            cfg.results_file.display(),
            cfg.averages_file.display()
        );
        Ok(evaluation)
    }
}

// ─── AverageUseCase ───────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AverageConfig {
    pub results_file: PathBuf,
    pub output:       Option<PathBuf>,
}

pub struct AverageUseCase {
    config: AverageConfig,
}

impl AverageUseCase {
    pub fn new(config: AverageConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<BTreeMap<String, f64>> {
        let records: Vec<MetricRecord> = read_json(&self.config.results_file)?;
        let mut aggregator = MetricAggregator::new();
        for record in &records {
            aggregator.add(&record.metrics);
        }
        let averages = aggregator.averages();
        tracing::info!("Averaged {} metric records", records.len());

        if let Some(out) = &self.config.output {
            write_json(out, &averages)?;
        }
        Ok(averages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::manifest::write_jsonl;
    use crate::domain::error::PipelineError;
    use crate::domain::record::AnswerRecord;

    fn text(id: &str, t: &str) -> TextRecord {
        TextRecord { question_id: id.into(), text: t.into() }
    }

    #[test]
    fn test_identical_answers_average_to_one() {
        let refs = vec![text("q1", "lungs are clear"), text("q2", "heart size is normal")];
        let eval = evaluate_records(refs.clone(), refs, PairingMode::Ordered, None).unwrap();
        assert_eq!(eval.per_pair.len(), 2);
        assert!((eval.averages["BLEU-1"] - 1.0).abs() < 1e-9);
        assert!((eval.averages["ROUGE-L"] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_mismatch_aborts_before_scoring() {
        let err = evaluate_records(
            vec![text("q1", "a"), text("q2", "b")],
            vec![text("q1", "a"), text("q3", "b")],
            PairingMode::Ordered,
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::IdentifierMismatch { left, right }) if left == "q2" && right == "q3"
        ));
    }

    #[test]
    fn test_files_round_trip_through_average() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.jsonl");
        let answers = dir.path().join("answers.jsonl");
        write_jsonl(&reference, &[serde_json::json!({"question_id": "q1", "image": "x.jpg", "prompt": "p", "text": "no acute findings"})]).unwrap();
        write_jsonl(&answers, &[AnswerRecord {
            question_id: "q1".into(),
            prompt:      "p".into(),
            text:        "no findings".into(),
            answer_id:   "id".into(),
            model_id:    None,
            metadata:    Default::default(),
        }]).unwrap();

        let config = EvaluateConfig {
            reference_file: reference,
            answers_file:   answers,
            pairing:        PairingMode::ByKey,
            embedder:       None,
            results_file:   dir.path().join("results.json"),
            averages_file:  dir.path().join("averages.json"),
        };
        let eval = EvaluateUseCase::new(config.clone()).execute().unwrap();

        let averages = AverageUseCase::new(AverageConfig { results_file: config.results_file, output: None })
            .execute()
            .unwrap();
        assert_eq!(averages, eval.averages);
        assert!(averages["BLEU-1"] > 0.0 && averages["BLEU-1"] < 1.0);
    }
}
