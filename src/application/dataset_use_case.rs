// ============================================================
// Layer 2 — Dataset Tooling
// ============================================================
// split:
//   JSON array ── shuffle(seed) ──► test.json  (first ⌊n·fraction⌋)
//                                 └► train.json (the rest)
//
// make-eval:
//   conversation dataset ──► question manifest (JSONL)
//                        └─► reference answers (JSONL)
//
//   turn i of entry `id` (1-based):
//     human → question "{id}_{i}", "<image>" added when absent
//     gpt   → reference answer "{id}_{i-1}" to the preceding human turn

use std::path::PathBuf;

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::conversation::IMAGE_PLACEHOLDER;
use crate::data::manifest::{read_json, write_json, write_jsonl};
use crate::data::splitter::split_test_train;
use crate::domain::record::{ConversationEntry, QuestionId, QuestionRecord, ReferenceAnswer};

// ─── Split ────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub input:         PathBuf,
    pub test_output:   PathBuf,
    pub train_output:  PathBuf,
    pub test_fraction: f64,
    pub seed:          u64,
}

pub struct SplitUseCase {
    config: SplitConfig,
}

impl SplitUseCase {
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    /// Returns (test count, train count).
    pub fn execute(&self) -> Result<(usize, usize)> {
        let cfg = &self.config;
        let entries: Vec<serde_json::Value> = read_json(&cfg.input)?;
        let (test, train) = split_test_train(entries, cfg.test_fraction, cfg.seed);

        write_json(&cfg.test_output, &test)?;
        write_json(&cfg.train_output, &train)?;
        tracing::info!("Split complete: {} train, {} test", train.len(), test.len());
        Ok((test.len(), train.len()))
    }
}

// ─── Make-eval ────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeEvalConfig {
    pub input:          PathBuf,
    pub questions_file: PathBuf,
    pub answers_file:   PathBuf,
    pub seed:           u64,
}

/// Questions and reference answers for every conversation, in file order.
pub fn build_eval_files(entries: &[ConversationEntry], seed: u64) -> (Vec<QuestionRecord>, Vec<ReferenceAnswer>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut questions = Vec::new();
    let mut answers = Vec::new();

    for entry in entries {
        let mut question_text = String::new();
        for (i, turn) in entry.conversations.iter().enumerate().map(|(i, t)| (i + 1, t)) {
            match turn.from.as_str() {
                "human" => {
                    question_text = if turn.value.contains(IMAGE_PLACEHOLDER) {
                        turn.value.clone()
                    } else if rng.gen_bool(0.5) {
                        format!("{IMAGE_PLACEHOLDER}\n{}", turn.value)
                    } else {
                        format!("{}\n{IMAGE_PLACEHOLDER}", turn.value)
                    };
                    questions.push(QuestionRecord {
                        question_id: turn_id(&entry.id, i),
                        image:       entry.image.clone(),
                        text:        question_text.clone(),
                    });
                }
                "gpt" => answers.push(ReferenceAnswer {
                    question_id: turn_id(&entry.id, i - 1),
                    image:       entry.image.clone(),
                    prompt:      question_text.clone(),
                    text:        turn.value.clone(),
                }),
                other => tracing::debug!("Ignoring '{}' turn in entry {}", other, entry.id),
            }
        }
    }
    (questions, answers)
}

fn turn_id(id: &QuestionId, turn: usize) -> QuestionId {
    QuestionId::Text(format!("{id}_{turn}"))
}

pub struct MakeEvalUseCase {
    config: MakeEvalConfig,
}

impl MakeEvalUseCase {
    pub fn new(config: MakeEvalConfig) -> Self {
        Self { config }
    }

    /// Returns (question count, answer count).
    pub fn execute(&self) -> Result<(usize, usize)> {
        let cfg = &self.config;
        let entries: Vec<ConversationEntry> = read_json(&cfg.input)?;
        let (questions, answers) = build_eval_files(&entries, cfg.seed);

        write_jsonl(&cfg.questions_file, &questions)?;
        write_jsonl(&cfg.answers_file, &answers)?;
        tracing::info!(
            "{} conversations → {} questions in '{}', {} answers in '{}'",
            entries.len(),
            questions.len(),
            cfg.questions_file.display(),
            answers.len(),
            cfg.answers_file.display()
        );
        Ok((questions.len(), answers.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Turn;

    fn turn(from: &str, value: &str) -> Turn {
        Turn { from: from.into(), value: value.into() }
    }

    #[test]
    fn test_turn_ids_and_prompts() {
        let entry = ConversationEntry {
            id:    QuestionId::Int(7),
            image: "p1/s1.jpg".into(),
            conversations: vec![
                turn("human", "<image>\nWhat is seen?"),
                turn("gpt", "Clear lungs."),
                turn("human", "Any effusion?"),
                turn("gpt", "No."),
            ],
        };
        let (qs, ans) = build_eval_files(&[entry], 42);

        let ids: Vec<String> = qs.iter().map(|q| q.question_id.to_string()).collect();
        assert_eq!(ids, ["7_1", "7_3"]);
        assert_eq!(ans[0].question_id, qs[0].question_id);
        assert_eq!(ans[1].question_id.to_string(), "7_3");
        assert_eq!(ans[0].prompt, "<image>\nWhat is seen?");

        // the marker is added exactly once, at one end
        let second = &qs[1].text;
        assert_eq!(second.matches(IMAGE_PLACEHOLDER).count(), 1);
        assert!(second.starts_with(IMAGE_PLACEHOLDER) || second.ends_with(IMAGE_PLACEHOLDER));
        assert_eq!(&ans[1].prompt, second);
    }

    #[test]
    fn test_split_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("all.json");
        let entries: Vec<serde_json::Value> = (0..20).map(|i| serde_json::json!({"id": i})).collect();
        write_json(&input, &entries).unwrap();

        let config = SplitConfig {
            input,
            test_output:   dir.path().join("test.json"),
            train_output:  dir.path().join("train.json"),
            test_fraction: 0.1,
            seed:          42,
        };
        assert_eq!(SplitUseCase::new(config.clone()).execute().unwrap(), (2, 18));

        let test: Vec<serde_json::Value> = read_json(&config.test_output).unwrap();
        let train: Vec<serde_json::Value> = read_json(&config.train_output).unwrap();
        assert_eq!(test.len() + train.len(), 20);
    }
}
