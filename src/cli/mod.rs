// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Commands:
//   1. `segment`   — anatomy masks for one image, a folder or a path list
//   2. `infer`     — answers one shard of a question manifest
//   3. `evaluate`  — BLEU / METEOR / ROUGE-L / SEMANTIC against references
//   4. `average`   — means of a per-pair metrics file
//   5. `split`     — seeded test/train split of a JSON dataset
//   6. `make-eval` — question manifest + references from conversations
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Commands;

use crate::application::dataset_use_case::{MakeEvalUseCase, SplitUseCase};
use crate::application::evaluate_use_case::{AverageUseCase, EvaluateUseCase};
use crate::application::infer_use_case::InferUseCase;
use crate::application::segment_use_case::SegmentUseCase;

#[derive(Parser, Debug)]
#[command(
    name = "cxr-vqa",
    version = "0.1.0",
    about = "Chest X-ray anatomy segmentation, visual question answering and answer evaluation."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Segment(args) => {
                tracing::info!("Segmenting '{}' as {}", args.input.display(), args.mode);
                let summary = SegmentUseCase::new(args.into()).execute()?;
                println!("Segmented {} images, wrote {} files.", summary.images, summary.written);
            }
            Commands::Infer(args) => {
                let answers_file = args.answers_file.clone();
                let summary = InferUseCase::new(args.into()).execute()?;
                println!(
                    "Answered {}/{} questions in {} batches → {}",
                    summary.answered,
                    summary.shard_len,
                    summary.batches,
                    answers_file.display()
                );
            }
            Commands::Evaluate(args) => {
                let evaluation = EvaluateUseCase::new(args.into()).execute()?;
                println!("\nAverages over {} pairs:", evaluation.per_pair.len());
                print_metrics(&evaluation.averages);
            }
            Commands::Average(args) => {
                let averages = AverageUseCase::new(args.into()).execute()?;
                print_metrics(&averages);
            }
            Commands::Split(args) => {
                let (test, train) = SplitUseCase::new(args.into()).execute()?;
                println!("Split complete: {test} test, {train} train.");
            }
            Commands::MakeEval(args) => {
                let (questions, answers) = MakeEvalUseCase::new(args.into()).execute()?;
                println!("Wrote {questions} questions and {answers} reference answers.");
            }
        }
        Ok(())
    }
}

fn print_metrics(metrics: &std::collections::BTreeMap<String, f64>) {
    for (name, value) in metrics {
        println!("  {name:<9} {value:.4}");
    }
}
