// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// One subcommand per pipeline tool, each with its flags.
// Every Args struct converts into its application-layer config,
// so Layer 2 never sees clap types.
//
// Enum-valued flags (--mode, --conv-mode, --pairing) parse
// through the types' FromStr, which reports UnsupportedFormat.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::dataset_use_case::{MakeEvalConfig, SplitConfig};
use crate::application::evaluate_use_case::{AverageConfig, EvaluateConfig};
use crate::application::infer_use_case::InferConfig;
use crate::application::segment_use_case::SegmentConfig;
use crate::data::conversation::ConvMode;
use crate::infra::metrics::PairingMode;
use crate::infra::saver::ExportMode;
use crate::ml::inferencer::ShardOptions;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Segment chest X-rays and export the anatomy masks
    Segment(SegmentArgs),

    /// Answer a question manifest with the vision-language model
    Infer(InferArgs),

    /// Score an answer file against reference answers
    Evaluate(EvaluateArgs),

    /// Average a per-pair metrics file
    Average(AverageArgs),

    /// Shuffle a JSON dataset into test and train files
    Split(SplitArgs),

    /// Build a question manifest and reference answers from conversations
    MakeEval(MakeEvalArgs),
}

// ─── segment ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct SegmentArgs {
    /// Image file, directory of images, or .txt list of paths
    #[arg(short, long)]
    pub input: PathBuf,

    /// Prefix joined onto every path of a .txt list
    #[arg(long)]
    pub base_path: Option<PathBuf>,

    /// Output directory, created if absent
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// Export format: json | npy | npz | jpg | png | dicom-seg
    #[arg(short, long, default_value = "png")]
    pub mode: ExportMode,

    /// cpu, mps, cuda:<n>, a bare index, or a comma-separated list
    #[arg(long, default_value = "cpu")]
    pub gpus: String,

    /// Number of accelerators on this machine
    #[arg(long, default_value_t = 1)]
    pub accelerators: usize,

    /// Segmentation model directory (config.json, model.mpk, labels.json)
    #[arg(long, default_value = "models/anatomy-unet")]
    pub model: PathBuf,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Background image-loading threads
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    /// Skip unreadable images with a warning instead of aborting
    #[arg(long)]
    pub skip_failures: bool,
}

impl From<SegmentArgs> for SegmentConfig {
    fn from(a: SegmentArgs) -> Self {
        SegmentConfig {
            input:         a.input,
            base_path:     a.base_path,
            output:        a.output,
            mode:          a.mode,
            device:        a.gpus,
            accelerators:  a.accelerators,
            model_dir:     a.model,
            batch_size:    a.batch_size,
            num_workers:   a.num_workers,
            skip_failures: a.skip_failures,
        }
    }
}

// ─── infer ────────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct InferArgs {
    /// Model directory (config.json, model.mpk, tokenizer.json)
    #[arg(long, default_value = "models/tiny-vlm")]
    pub model_path: PathBuf,

    /// Model identifier written into every answer
    #[arg(long)]
    pub model_base: Option<String>,

    /// Prefix joined onto every manifest image path
    #[arg(long)]
    pub image_folder: Option<PathBuf>,

    /// Question manifest (JSONL: question_id, image, text)
    #[arg(long, default_value = "tables/question.jsonl")]
    pub question_file: PathBuf,

    #[arg(long, default_value = "answer.jsonl")]
    pub answers_file: PathBuf,

    /// Conversation template: plain | phi | llama
    #[arg(long, default_value = "llama")]
    pub conv_mode: ConvMode,

    #[arg(long, default_value_t = 1)]
    pub num_chunks: usize,

    #[arg(long, default_value_t = 0)]
    pub chunk_idx: usize,

    /// 0 decodes greedily (or by beam search with --num-beams > 1)
    #[arg(long, default_value_t = 0.2)]
    pub temperature: f64,

    #[arg(long)]
    pub top_p: Option<f64>,

    #[arg(long, default_value_t = 1)]
    pub num_beams: usize,

    #[arg(long, default_value_t = 128)]
    pub max_new_tokens: usize,

    /// Sampling seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Background image-loading threads
    #[arg(long, default_value_t = 16)]
    pub num_workers: usize,

    /// cpu, mps, cuda:<n> or a bare index
    #[arg(long, default_value = "cpu")]
    pub device: String,

    #[arg(long, default_value_t = 1)]
    pub accelerators: usize,

    /// Skip questions whose image cannot be loaded instead of aborting
    #[arg(long)]
    pub skip_failures: bool,
}

impl From<InferArgs> for InferConfig {
    fn from(a: InferArgs) -> Self {
        InferConfig {
            model_path:     a.model_path,
            model_base:     a.model_base,
            image_folder:   a.image_folder.unwrap_or_default(),
            question_file:  a.question_file,
            answers_file:   a.answers_file,
            conv_mode:      a.conv_mode,
            temperature:    a.temperature,
            top_p:          a.top_p,
            num_beams:      a.num_beams,
            max_new_tokens: a.max_new_tokens,
            seed:           a.seed,
            shard: ShardOptions {
                num_chunks:  a.num_chunks,
                chunk_idx:   a.chunk_idx,
                batch_size:  a.batch_size,
                num_workers: a.num_workers,
            },
            device:         a.device,
            accelerators:   a.accelerators,
            skip_failures:  a.skip_failures,
        }
    }
}

// ─── evaluate / average ───────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Reference answers (JSONL with question_id and text)
    #[arg(long)]
    pub reference: PathBuf,

    /// Model answers (JSONL with question_id and text)
    #[arg(long)]
    pub answers: PathBuf,

    /// ordered (line by line) | by-key (sorted by question_id)
    #[arg(long, default_value = "by-key")]
    pub pairing: PairingMode,

    /// Sentence encoder directory; adds the SEMANTIC metric
    #[arg(long)]
    pub embedder: Option<PathBuf>,

    #[arg(long, default_value = "metrics_results.json")]
    pub results: PathBuf,

    #[arg(long, default_value = "average_metrics.json")]
    pub averages: PathBuf,
}

impl From<EvaluateArgs> for EvaluateConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateConfig {
            reference_file: a.reference,
            answers_file:   a.answers,
            pairing:        a.pairing,
            embedder:       a.embedder,
            results_file:   a.results,
            averages_file:  a.averages,
        }
    }
}

#[derive(Args, Debug)]
pub struct AverageArgs {
    /// Per-pair metrics written by `evaluate`
    #[arg(long, default_value = "metrics_results.json")]
    pub results: PathBuf,

    /// Also write the averages here
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl From<AverageArgs> for AverageConfig {
    fn from(a: AverageArgs) -> Self {
        AverageConfig { results_file: a.results, output: a.output }
    }
}

// ─── split / make-eval ────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct SplitArgs {
    /// JSON array to split
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long)]
    pub test_output: PathBuf,

    #[arg(long)]
    pub train_output: PathBuf,

    #[arg(long, default_value_t = 0.1)]
    pub test_fraction: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<SplitArgs> for SplitConfig {
    fn from(a: SplitArgs) -> Self {
        SplitConfig {
            input:         a.input,
            test_output:   a.test_output,
            train_output:  a.train_output,
            test_fraction: a.test_fraction,
            seed:          a.seed,
        }
    }
}

#[derive(Args, Debug)]
pub struct MakeEvalArgs {
    /// Conversation dataset (JSON array of {id, image, conversations})
    #[arg(long)]
    pub input: PathBuf,

    /// Defaults to <input>_questions.jsonl
    #[arg(long)]
    pub questions: Option<PathBuf>,

    /// Defaults to <input>_answers.jsonl
    #[arg(long)]
    pub answers: Option<PathBuf>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl From<MakeEvalArgs> for MakeEvalConfig {
    fn from(a: MakeEvalArgs) -> Self {
        let sibling = |suffix: &str| {
            let stem = a.input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            a.input.with_file_name(format!("{stem}_{suffix}.jsonl"))
        };
        MakeEvalConfig {
            questions_file: a.questions.clone().unwrap_or_else(|| sibling("questions")),
            answers_file:   a.answers.clone().unwrap_or_else(|| sibling("answers")),
            input:          a.input.clone(),
            seed:           a.seed,
        }
    }
}
