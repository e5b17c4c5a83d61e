// ============================================================
// Layer 4 — Conversation Templates
// ============================================================
// Wraps a question into the chat format the language model was
// fine-tuned on. Every rendered prompt carries exactly one
// image placeholder, at the start of the user turn:
//
//   raw question   "<image>\nDescribe the heart."
//   prepared       "<image>\nDescribe the heart."   (marker moved to the front)
//   llama / phi    "{SYSTEM} USER: <image>\nDescribe the heart. ASSISTANT:"
//   plain          "<image>\nDescribe the heart.\n"
//
// The tokenizer later replaces the placeholder with the image
// token index; see infra/tokenizer_store.rs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::PipelineError;

/// The reserved marker that stands for the image in a prompt.
pub const IMAGE_PLACEHOLDER: &str = "<image>";

const SYSTEM_PROMPT: &str = "A chat between a curious user and an artificial intelligence assistant. \
The assistant gives helpful, detailed, and polite answers to the user's questions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvMode {
    Plain,
    Phi,
    #[default]
    Llama,
}

impl FromStr for ConvMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(ConvMode::Plain),
            "phi"   => Ok(ConvMode::Phi),
            "llama" => Ok(ConvMode::Llama),
            other   => Err(PipelineError::UnsupportedFormat(format!("conversation mode '{other}'"))),
        }
    }
}

impl fmt::Display for ConvMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvMode::Plain => "plain",
            ConvMode::Phi   => "phi",
            ConvMode::Llama => "llama",
        };
        f.write_str(name)
    }
}

impl ConvMode {
    /// Full generation prompt for one prepared user turn.
    pub fn render(&self, user_turn: &str) -> String {
        match self {
            ConvMode::Plain => format!("{user_turn}\n"),
            ConvMode::Phi | ConvMode::Llama => {
                format!("{SYSTEM_PROMPT} USER: {user_turn} ASSISTANT:")
            }
        }
    }
}

/// Normalise stray characters in a question and move the image
/// placeholder to the front: `"<image>\n" + question`.
pub fn prepare_question(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '\t' | '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
            '\r' => '\n',
            c if c.is_control() && c != '\n' => ' ',
            c => c,
        })
        .collect();
    let body = cleaned.replace(IMAGE_PLACEHOLDER, "");
    format!("{IMAGE_PLACEHOLDER}\n{}", body.trim())
}
