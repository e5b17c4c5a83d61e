// ============================================================
// Layer 6 — Text Similarity Metrics
// ============================================================
// Scores one (reference, hypothesis) text pair:
//
//   BLEU-1..4   whitespace tokens, case-sensitive, uniform weights
//               over orders 1..n, brevity penalty, no smoothing
//   METEOR      lowercased word tokens, exact-match alignment,
//               alpha 0.9, beta 3, gamma 0.5
//   ROUGE-L     lowercased alphanumeric tokens, LCS F-score
//   SEMANTIC    optional; TECHNIQUE / FINDINGS / IMPRESSION
//               sections embedded and cosine-compared, averaged
//
// and averages any number of scored pairs per metric name.
//
// How to read the scores:
//   - all metrics lie in [0, 1], 1 meaning identical text
//   - BLEU-n is 0 as soon as one order 1..n has no overlap
//   - ROUGE-L rewards long in-order overlaps, not exact n-grams
//
// Reference: Papineni et al. (2002) BLEU
//            Banerjee & Lavie (2005) METEOR
//            Lin (2004) ROUGE

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::PipelineError;
use crate::domain::record::TextRecord;
use crate::domain::traits::SentenceEmbedder;

pub const BLEU_ORDERS: usize = 4;
pub const METEOR_KEY:   &str = "METEOR";
pub const ROUGE_L_KEY:  &str = "ROUGE-L";
pub const SEMANTIC_KEY: &str = "SEMANTIC";

/// Stand-in reference when the real one is empty, so ROUGE-L has
/// something to divide by.
const EMPTY_REFERENCE_PLACEHOLDER: &str = "report";

const METEOR_ALPHA: f64 = 0.9;
const METEOR_BETA:  f64 = 3.0;
const METEOR_GAMMA: f64 = 0.5;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+(?:'\w+)?|[^\w\s]").expect("valid regex"));
static NON_ALNUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Report sections compared by the semantic metric, in order.
static SECTION_PATTERNS: Lazy<[(&'static str, Regex); 3]> = Lazy::new(|| {
    [
        ("TECHNIQUE", Regex::new(r"(?is)TECHNIQUE:(.*?)(?:COMPARISON:|FINDINGS:|IMPRESSION:)").expect("valid regex")),
        ("FINDINGS", Regex::new(r"(?is)FINDINGS:(.*?)IMPRESSION:").expect("valid regex")),
        ("IMPRESSION", Regex::new(r"(?is)IMPRESSION:(.*)").expect("valid regex")),
    ]
});

// ─── BLEU ─────────────────────────────────────────────────────────────────────

fn ngram_counts<'t>(tokens: &'t [&'t str], n: usize) -> HashMap<&'t [&'t str], usize> {
    let mut counts = HashMap::new();
    if tokens.len() >= n {
        for gram in tokens.windows(n) {
            *counts.entry(gram).or_insert(0) += 1;
        }
    }
    counts
}

/// Clipped n-gram matches and the hypothesis n-gram total.
fn modified_precision(reference: &[&str], hypothesis: &[&str], n: usize) -> (usize, usize) {
    let hyp = ngram_counts(hypothesis, n);
    let refs = ngram_counts(reference, n);
    let matched = hyp
        .iter()
        .map(|(gram, &count)| count.min(refs.get(gram).copied().unwrap_or(0)))
        .sum();
    let total = hyp.values().sum::<usize>().max(1);
    (matched, total)
}

/// Sentence BLEU with uniform weights over orders 1..=`order`.
pub fn bleu(reference: &str, hypothesis: &str, order: usize) -> f64 {
    let reference: Vec<&str> = reference.split_whitespace().collect();
    let hypothesis: Vec<&str> = hypothesis.split_whitespace().collect();
    let (r, c) = (reference.len(), hypothesis.len());
    if c == 0 || order == 0 {
        return 0.0;
    }

    let mut log_sum = 0.0;
    for n in 1..=order {
        let (matched, total) = modified_precision(&reference, &hypothesis, n);
        if matched == 0 {
            return 0.0;
        }
        log_sum += (matched as f64 / total as f64).ln() / order as f64;
    }

    let brevity = if c > r { 1.0 } else { (1.0 - r as f64 / c as f64).exp() };
    brevity * log_sum.exp()
}

// ─── METEOR ───────────────────────────────────────────────────────────────────

pub fn word_tokens(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD_RE.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

/// Exact-match alignment: hypothesis words are taken from the last
/// one backwards, each claiming the last unclaimed equal reference
/// word. Returns (hyp index, ref index) pairs sorted by hyp index.
fn align_exact(reference: &[String], hypothesis: &[String]) -> Vec<(usize, usize)> {
    let mut free_ref: Vec<(usize, &String)> = reference.iter().enumerate().collect();
    let mut matches = Vec::new();
    for (hi, word) in hypothesis.iter().enumerate().rev() {
        if let Some(pos) = free_ref.iter().rposition(|(_, r)| *r == word) {
            let (ri, _) = free_ref.remove(pos);
            matches.push((hi, ri));
        }
    }
    matches.sort_unstable();
    matches
}

/// Runs of matches that are contiguous in both texts.
fn count_chunks(matches: &[(usize, usize)]) -> usize {
    if matches.is_empty() {
        return 0;
    }
    1 + matches
        .windows(2)
        .filter(|w| !(w[1].0 == w[0].0 + 1 && w[1].1 == w[0].1 + 1))
        .count()
}

pub fn meteor(reference: &str, hypothesis: &str) -> f64 {
    let reference = word_tokens(reference);
    let hypothesis = word_tokens(hypothesis);
    let matches = align_exact(&reference, &hypothesis);
    let m = matches.len() as f64;
    if m == 0.0 {
        return 0.0;
    }

    let precision = m / hypothesis.len() as f64;
    let recall = m / reference.len() as f64;
    let fmean = precision * recall / (METEOR_ALPHA * precision + (1.0 - METEOR_ALPHA) * recall);
    let frag = count_chunks(&matches) as f64 / m;
    let penalty = METEOR_GAMMA * frag.powf(METEOR_BETA);
    (1.0 - penalty) * fmean
}

// ─── ROUGE-L ──────────────────────────────────────────────────────────────────

fn rouge_tokens(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    NON_ALNUM_RE
        .replace_all(&lower, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            cur[j + 1] = if x == y { prev[j] + 1 } else { prev[j + 1].max(cur[j]) };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// ROUGE-L F-score. An empty reference is replaced by a placeholder
/// word; an empty hypothesis scores 0.
pub fn rouge_l(reference: &str, hypothesis: &str) -> f64 {
    let reference = if reference.trim().is_empty() { EMPTY_REFERENCE_PLACEHOLDER } else { reference };
    let reference = rouge_tokens(reference);
    let hypothesis = rouge_tokens(hypothesis);
    if reference.is_empty() || hypothesis.is_empty() {
        return 0.0;
    }

    let lcs = lcs_len(&reference, &hypothesis) as f64;
    let r = lcs / reference.len() as f64;
    let p = lcs / hypothesis.len() as f64;
    let beta = p / (r + 1e-12);
    let num = (1.0 + beta * beta) * r * p;
    let denom = r + beta * beta * p;
    num / (denom + 1e-12)
}

// ─── SEMANTIC ─────────────────────────────────────────────────────────────────

/// Section name → trimmed section text ("" when absent).
pub fn extract_sections(text: &str) -> Vec<(&'static str, String)> {
    SECTION_PATTERNS
        .iter()
        .map(|(name, re)| {
            let body = re
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            (*name, body)
        })
        .collect()
}

pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Mean section-wise cosine similarity. A section empty on both
/// sides counts as identical.
pub fn semantic_similarity(embedder: &dyn SentenceEmbedder, reference: &str, hypothesis: &str) -> Result<f64> {
    let gt = extract_sections(reference);
    let test = extract_sections(hypothesis);

    let mut scores = Vec::with_capacity(gt.len());
    for ((_, a), (_, b)) in gt.iter().zip(&test) {
        if a.is_empty() && b.is_empty() {
            scores.push(1.0);
            continue;
        }
        let emb = embedder.embed(&[a.as_str(), b.as_str()])?;
        scores.push(match emb.as_slice() {
            [ea, eb] => cosine(ea, eb),
            _ => 0.0,
        });
    }
    Ok(scores.iter().sum::<f64>() / scores.len().max(1) as f64)
}

// ─── Pairing ──────────────────────────────────────────────────────────────────
/// How reference and hypothesis records are matched up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairingMode {
    /// i-th with i-th, as the files are written
    Ordered,
    /// Both sides sorted by question_id first
    #[default]
    ByKey,
}

impl FromStr for PairingMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordered" => Ok(PairingMode::Ordered),
            "by-key"  => Ok(PairingMode::ByKey),
            other     => Err(PipelineError::UnsupportedFormat(format!("pairing mode '{other}'"))),
        }
    }
}

/// Pairs the two sides and checks every pair's question_id before
/// any scoring happens. Differing lengths are an invariant violation.
pub fn pair_records(
    mut reference:  Vec<TextRecord>,
    mut hypothesis: Vec<TextRecord>,
    mode:           PairingMode,
) -> Result<Vec<(TextRecord, TextRecord)>, PipelineError> {
    if reference.len() != hypothesis.len() {
        return Err(PipelineError::invariant(format!(
            "record counts differ: {} reference vs {} hypothesis",
            reference.len(),
            hypothesis.len()
        )));
    }
    if mode == PairingMode::ByKey {
        reference.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        hypothesis.sort_by(|a, b| a.question_id.cmp(&b.question_id));
    }
    if let Some((r, h)) = reference.iter().zip(&hypothesis).find(|(r, h)| r.question_id != h.question_id) {
        return Err(PipelineError::IdentifierMismatch {
            left:  r.question_id.to_string(),
            right: h.question_id.to_string(),
        });
    }
    Ok(reference.into_iter().zip(hypothesis).collect())
}

// ─── MetricSuite ──────────────────────────────────────────────────────────────
/// The fixed metric set, with the semantic score when an embedder is given.
pub struct MetricSuite<'a> {
    embedder: Option<&'a dyn SentenceEmbedder>,
}

impl<'a> MetricSuite<'a> {
    pub fn new(embedder: Option<&'a dyn SentenceEmbedder>) -> Self {
        Self { embedder }
    }

    pub fn score(&self, reference: &str, hypothesis: &str) -> Result<BTreeMap<String, f64>> {
        let mut out = BTreeMap::new();
        for n in 1..=BLEU_ORDERS {
            out.insert(format!("BLEU-{n}"), bleu(reference, hypothesis, n));
        }
        out.insert(METEOR_KEY.to_string(), meteor(reference, hypothesis));
        out.insert(ROUGE_L_KEY.to_string(), rouge_l(reference, hypothesis));
        if let Some(embedder) = self.embedder {
            out.insert(SEMANTIC_KEY.to_string(), semantic_similarity(embedder, reference, hypothesis)?);
        }
        Ok(out)
    }
}

// ─── MetricAggregator ─────────────────────────────────────────────────────────
/// Running sum and count per metric name.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetricAggregator {
    sums:   BTreeMap<String, f64>,
    counts: BTreeMap<String, usize>,
}

impl MetricAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, metrics: &BTreeMap<String, f64>) {
        for (name, value) in metrics {
            *self.sums.entry(name.clone()).or_insert(0.0) += value;
            *self.counts.entry(name.clone()).or_insert(0) += 1;
        }
    }

    /// Arithmetic mean per metric name.
    pub fn averages(&self) -> BTreeMap<String, f64> {
        self.sums
            .iter()
            .map(|(name, sum)| {
                let n = self.counts.get(name).copied().unwrap_or(1).max(1);
                (name.clone(), sum / n as f64)
            })
            .collect()
    }

    pub fn pair_count(&self) -> usize {
        self.counts.values().copied().max().unwrap_or(0)
    }
}
