// ============================================================
// Layer 5 — Decoding Strategies
// ============================================================
// Turns a next-token scorer into generated token ids:
//
//   temperature == 0, num_beams == 1 → greedy (argmax)
//   temperature == 0, num_beams  > 1 → beam search
//   temperature  > 0                 → sampling: logits / T,
//                                      nucleus (top-p) filter
//
// Every sequence stops at the end-of-sequence id (not included
// in the output) or after max_new_tokens.
//
// The scorer is the only model-specific part: it sees the
// sample index plus the tokens generated so far, and returns
// last-position logits. Greedy and sampling score all live
// samples in one call; beam search scores all beams of one
// sample in one call.
//
// Reference: Holtzman et al. (2020) The Curious Case of Neural Text Degeneration

use anyhow::Result;
use burn::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::batcher::PromptBatch;
use crate::domain::error::{ensure_invariant, PipelineError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature:    f64,
    pub top_p:          Option<f64>,
    pub num_beams:      usize,
    pub max_new_tokens: usize,
    pub eos_id:         Option<u32>,
    pub seed:           u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature:    0.2,
            top_p:          None,
            num_beams:      1,
            max_new_tokens: 128,
            eos_id:         None,
            seed:           42,
        }
    }
}

impl GenerationParams {
    pub fn is_sampling(&self) -> bool {
        self.temperature > 0.0
    }
}

// ─── TextGenerator ────────────────────────────────────────────────────────────
/// A generative model over prompt batches: new token ids per sample,
/// in batch order.
pub trait TextGenerator<B: Backend> {
    fn generate(&self, batch: &PromptBatch<B>, params: &GenerationParams) -> Result<Vec<Vec<u32>>>;
}

// ─── NextTokenScorer ──────────────────────────────────────────────────────────
/// One row to score: which sample, and what has been generated after its prompt.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRow<'a> {
    pub sample:    usize,
    pub generated: &'a [u32],
}

pub trait NextTokenScorer {
    /// Last-position logits over the vocabulary, one vector per row.
    fn next_logits(&self, rows: &[ScoreRow<'_>]) -> Result<Vec<Vec<f32>>>;
}

/// Runs the strategy selected by `params` for `batch_len` samples.
pub fn decode(scorer: &dyn NextTokenScorer, batch_len: usize, params: &GenerationParams) -> Result<Vec<Vec<u32>>> {
    if params.is_sampling() {
        let mut rng = StdRng::seed_from_u64(params.seed);
        step_decode(scorer, batch_len, params, |logits| sample_top_p(logits, params.temperature, params.top_p, &mut rng))
    } else if params.num_beams > 1 {
        (0..batch_len)
            .map(|sample| beam_search(scorer, sample, params))
            .collect()
    } else {
        step_decode(scorer, batch_len, params, |logits| Ok(argmax(logits)))
    }
}

/// Token-by-token decoding shared by greedy and sampling.
fn step_decode(
    scorer:    &dyn NextTokenScorer,
    batch_len: usize,
    params:    &GenerationParams,
    mut pick:  impl FnMut(&[f32]) -> Result<u32>,
) -> Result<Vec<Vec<u32>>> {
    let mut outputs: Vec<Vec<u32>> = vec![Vec::new(); batch_len];
    let mut live: Vec<usize> = (0..batch_len).collect();

    for _ in 0..params.max_new_tokens {
        if live.is_empty() {
            break;
        }
        let rows: Vec<ScoreRow<'_>> = live
            .iter()
            .map(|&s| ScoreRow { sample: s, generated: &outputs[s] })
            .collect();
        let logits = scorer.next_logits(&rows)?;
        ensure_invariant(logits.len() == live.len(), || {
            format!("scorer returned {} rows for {} requested", logits.len(), live.len())
        })?;

        let mut still_live = Vec::with_capacity(live.len());
        for (&sample, row) in live.iter().zip(&logits) {
            let token = pick(row)?;
            if Some(token) == params.eos_id {
                continue;
            }
            outputs[sample].push(token);
            still_live.push(sample);
        }
        live = still_live;
    }
    Ok(outputs)
}

pub fn argmax(logits: &[f32]) -> u32 {
    logits
        .iter()
        .enumerate()
        .fold((0usize, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0 as u32
}

fn softmax(logits: &[f32], temperature: f64) -> Vec<f64> {
    let scaled: Vec<f64> = logits.iter().map(|&l| l as f64 / temperature).collect();
    let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn log_softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
    let log_sum = logits.iter().map(|&l| (l as f64 - max).exp()).sum::<f64>().ln();
    logits.iter().map(|&l| l as f64 - max - log_sum).collect()
}

/// Temperature sampling restricted to the smallest set of tokens whose
/// probability mass reaches `top_p` (all tokens when None).
pub fn sample_top_p(logits: &[f32], temperature: f64, top_p: Option<f64>, rng: &mut StdRng) -> Result<u32> {
    if logits.is_empty() {
        return Err(PipelineError::invariant("cannot sample from an empty vocabulary").into());
    }
    let probs = softmax(logits, temperature);
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let limit = top_p.unwrap_or(1.0);
    let mut kept = Vec::new();
    let mut mass = 0.0;
    for i in order {
        kept.push(i);
        mass += probs[i];
        if mass >= limit {
            break;
        }
    }

    let mut target = rng.gen::<f64>() * mass;
    for &i in &kept {
        target -= probs[i];
        if target <= 0.0 {
            return Ok(i as u32);
        }
    }
    Ok(kept[kept.len() - 1] as u32)
}

// ─── Beam search ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
struct Beam {
    tokens:   Vec<u32>,
    logprob:  f64,
    finished: bool,
}

impl Beam {
    /// Length-normalised score used to rank beams.
    fn score(&self) -> f64 {
        self.logprob / self.tokens.len().max(1) as f64
    }
}

fn beam_search(scorer: &dyn NextTokenScorer, sample: usize, params: &GenerationParams) -> Result<Vec<u32>> {
    let width = params.num_beams;
    let mut beams = vec![Beam { tokens: Vec::new(), logprob: 0.0, finished: false }];

    for _ in 0..params.max_new_tokens {
        let open: Vec<&Beam> = beams.iter().filter(|b| !b.finished).collect();
        if open.is_empty() {
            break;
        }
        let rows: Vec<ScoreRow<'_>> = open
            .iter()
            .map(|b| ScoreRow { sample, generated: &b.tokens })
            .collect();
        let logits = scorer.next_logits(&rows)?;

        let mut candidates: Vec<Beam> = beams.iter().filter(|b| b.finished).cloned().collect();
        for (beam, row) in open.iter().zip(&logits) {
            let logp = log_softmax(row);
            let mut order: Vec<usize> = (0..logp.len()).collect();
            order.sort_by(|&a, &b| logp[b].total_cmp(&logp[a]));
            for &token in order.iter().take(width) {
                let token = token as u32;
                let finished = Some(token) == params.eos_id;
                let mut tokens = beam.tokens.clone();
                if !finished {
                    tokens.push(token);
                }
                candidates.push(Beam { tokens, logprob: beam.logprob + logp[token as usize], finished });
            }
        }

        candidates.sort_by(|a, b| b.score().total_cmp(&a.score()));
        candidates.truncate(width);
        beams = candidates;
    }

    Ok(beams
        .into_iter()
        .max_by(|a, b| a.score().total_cmp(&b.score()))
        .map(|b| b.tokens)
        .unwrap_or_default())
}
