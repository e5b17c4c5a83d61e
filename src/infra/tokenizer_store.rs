// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the HuggingFace tokenizer that ships with a language
// model checkpoint and knows its special tokens.
//
// ConversationEncoder is the PromptEncoder used by inference:
//
//   question ─ prepare_question ─ template ─ split on "<image>"
//
//   "SYS USER: <image>\nDescribe ASSISTANT:"
//        │                  │
//        ▼                  ▼
//   [bos] ids("SYS USER: ")  -200  ids("\nDescribe ASSISTANT:")
//
// The image placeholder never reaches the tokenizer; its slot
// holds IMAGE_TOKEN_INDEX, which the model swaps for image
// features.
//
// Reference: tokenizers crate docs (Tokenizer::from_file)

use std::path::Path;

use anyhow::{anyhow, Result};
use tokenizers::Tokenizer;

use crate::data::conversation::{prepare_question, ConvMode, IMAGE_PLACEHOLDER};
use crate::domain::error::{ensure_invariant, PipelineError};
use crate::domain::traits::PromptEncoder;

/// Sentinel id marking where image features are spliced in.
pub const IMAGE_TOKEN_INDEX: i32 = -200;

const PAD_CANDIDATES: [&str; 4] = ["<pad>", "[PAD]", "<|endoftext|>", "<unk>"];
const EOS_CANDIDATES: [&str; 3] = ["</s>", "<|endoftext|>", "[SEP]"];
const BOS_CANDIDATES: [&str; 2] = ["<s>", "[CLS]"];

pub struct TokenizerStore {
    tokenizer: Tokenizer,
    pad_id:    u32,
    eos_id:    Option<u32>,
    bos_id:    Option<u32>,
}

impl TokenizerStore {
    pub fn load(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("Cannot load tokenizer from '{}': {}", path.display(), e))?;
        Ok(Self::from_tokenizer(tokenizer))
    }

    pub fn from_tokenizer(tokenizer: Tokenizer) -> Self {
        let find = |candidates: &[&str]| candidates.iter().find_map(|t| tokenizer.token_to_id(t));

        let pad_id = tokenizer
            .get_padding()
            .map(|p| p.pad_id)
            .or_else(|| find(&PAD_CANDIDATES))
            .unwrap_or(0);
        let eos_id = find(&EOS_CANDIDATES);
        let bos_id = find(&BOS_CANDIDATES);

        tracing::debug!("Tokenizer specials: pad={} eos={:?} bos={:?}", pad_id, eos_id, bos_id);
        Self { tokenizer, pad_id, eos_id, bos_id }
    }

    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    /// Every id this tokenizer emits must index a model embedding table
    /// of `model_vocab` rows.
    pub fn ensure_fits(&self, model_vocab: usize) -> Result<(), PipelineError> {
        let vocab = self.vocab_size();
        ensure_invariant(vocab <= model_vocab, || {
            format!("tokenizer has {vocab} tokens but the model embeds only {model_vocab}")
        })
    }

    /// Plain text → ids, no special tokens added.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow!("Tokenisation failed: {e}"))?;
        Ok(enc.get_ids().to_vec())
    }

    /// Ids → text with special tokens removed.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, true)
            .map_err(|e| anyhow!("Decoding failed: {e}"))
    }

    /// Tokenise `prompt`, replacing every image placeholder with IMAGE_TOKEN_INDEX.
    pub fn encode_with_image(&self, prompt: &str) -> Result<Vec<i32>> {
        let mut ids: Vec<i32> = self.bos_id.map(|b| b as i32).into_iter().collect();
        for (i, piece) in prompt.split(IMAGE_PLACEHOLDER).enumerate() {
            if i > 0 {
                ids.push(IMAGE_TOKEN_INDEX);
            }
            if !piece.is_empty() {
                ids.extend(self.encode(piece)?.into_iter().map(|t| t as i32));
            }
        }
        Ok(ids)
    }
}

// ─── ConversationEncoder ──────────────────────────────────────────────────────
pub struct ConversationEncoder {
    store: TokenizerStore,
    mode:  ConvMode,
}

impl ConversationEncoder {
    pub fn new(store: TokenizerStore, mode: ConvMode) -> Self {
        Self { store, mode }
    }

    pub fn store(&self) -> &TokenizerStore {
        &self.store
    }

    pub fn render(&self, question: &str) -> String {
        self.mode.render(&prepare_question(question))
    }
}

impl PromptEncoder for ConversationEncoder {
    fn encode_prompt(&self, question: &str) -> Result<Vec<i32>> {
        self.store.encode_with_image(&self.render(question))
    }

    fn pad_id(&self) -> i32 {
        self.store.pad_id() as i32
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A word-level tokenizer over a tiny vocabulary, written as
    /// HuggingFace JSON and loaded back through `from_file`.
    pub(crate) fn write_test_tokenizer(dir: &Path, words: &[&str]) -> std::path::PathBuf {
        let mut vocab: HashMap<String, u32> = HashMap::new();
        for (i, special) in ["<pad>", "<unk>", "<s>", "</s>"].iter().enumerate() {
            vocab.insert(special.to_string(), i as u32);
        }
        for w in words {
            let next = vocab.len() as u32;
            vocab.entry(w.to_lowercase()).or_insert(next);
        }

        let special = |id: u32, content: &str| serde_json::json!({
            "id": id, "content": content, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        });
        let json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [special(0, "<pad>"), special(1, "<unk>"), special(2, "<s>"), special(3, "</s>")],
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": { "type": "WordLevel", "vocab": vocab, "unk_token": "<unk>" }
        });

        let path = dir.join("tokenizer.json");
        std::fs::write(&path, serde_json::to_string_pretty(&json).unwrap()).unwrap();
        path
    }

    fn store() -> (tempfile::TempDir, TokenizerStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_tokenizer(dir.path(), &["describe", "the", "heart", "user", ":"]);
        let store = TokenizerStore::load(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn test_special_ids() {
        let (_dir, s) = store();
        assert_eq!(s.pad_id(), 0);
        assert_eq!(s.eos_id(), Some(3));
    }

    #[test]
    fn test_vocab_must_fit_model() {
        let (_dir, s) = store();
        assert!(s.ensure_fits(s.vocab_size()).is_ok());
        let err = s.ensure_fits(3).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(m) if m.contains("embeds only 3")));
    }

    #[test]
    fn test_image_placeholder_becomes_sentinel() {
        let (_dir, s) = store();
        let ids = s.encode_with_image("<image>\nDescribe the heart").unwrap();
        assert_eq!(ids[0], 2);
        assert_eq!(ids[1], IMAGE_TOKEN_INDEX);
        assert_eq!(ids.len(), 5);
        assert_eq!(ids.iter().filter(|&&t| t == IMAGE_TOKEN_INDEX).count(), 1);
    }

    #[test]
    fn test_decode_skips_specials() {
        let (_dir, s) = store();
        let ids = s.encode("describe the heart").unwrap();
        let mut with_eos = ids.clone();
        with_eos.push(3);
        assert_eq!(s.decode(&with_eos).unwrap(), "describe the heart");
    }

    #[test]
    fn test_conversation_encoder_uses_template() {
        let (_dir, s) = store();
        let enc = ConversationEncoder::new(s, ConvMode::Plain);
        assert_eq!(enc.render("Describe <image>"), "<image>\nDescribe\n");
        let ids = enc.encode_prompt("Describe").unwrap();
        assert_eq!(&ids[..2], &[2, IMAGE_TOKEN_INDEX]);
        assert_eq!(enc.pad_id(), 0);
    }
}
