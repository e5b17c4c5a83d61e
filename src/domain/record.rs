// ============================================================
// Layer 3 — Pipeline Records
// ============================================================
// The JSON shapes that flow between the tools:
//
//   question manifest (JSONL)  → QuestionRecord   {question_id, image, text}
//   answer file (JSONL)        → AnswerRecord     {question_id, prompt, text, answer_id, model_id, metadata}
//   any JSONL with text        → TextRecord       {question_id, text, ..}
//   per-pair metrics (JSON)    → MetricRecord     {question_id, metrics}
//   conversation dataset (JSON)→ ConversationEntry{id, image, conversations}
//
// Question ids appear both as strings ("1000002_1") and as bare
// integers in the wild, so QuestionId accepts either and writes
// back whatever it read.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── QuestionId ───────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Int(i64),
    Text(String),
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Int(i)  => write!(f, "{i}"),
            QuestionId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for QuestionId {
    fn from(s: &str) -> Self {
        QuestionId::Text(s.to_string())
    }
}

impl From<String> for QuestionId {
    fn from(s: String) -> Self {
        QuestionId::Text(s)
    }
}

impl From<i64> for QuestionId {
    fn from(i: i64) -> Self {
        QuestionId::Int(i)
    }
}

// ─── QuestionRecord ───────────────────────────────────────────────────────────
/// One line of the question manifest. Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub question_id: QuestionId,
    /// Image path relative to the image folder
    pub image:       String,
    /// Prompt text, possibly already carrying an `<image>` marker
    pub text:        String,
}

// ─── AnswerRecord ─────────────────────────────────────────────────────────────
/// One line of the answer file, written once and never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: QuestionId,
    pub prompt:      String,
    pub text:        String,
    pub answer_id:   String,
    pub model_id:    Option<String>,
    #[serde(default)]
    pub metadata:    BTreeMap<String, serde_json::Value>,
}

// ─── TextRecord ───────────────────────────────────────────────────────────────
/// The two fields evaluation needs from either side of a comparison.
/// Extra fields (image, prompt, answer_id, ...) are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextRecord {
    pub question_id: QuestionId,
    #[serde(default)]
    pub text:        String,
}

// ─── MetricRecord ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub question_id: QuestionId,
    pub metrics:     BTreeMap<String, f64>,
}

// ─── Conversation dataset ─────────────────────────────────────────────────────
/// One turn of a LLaVA-style conversation: `from` is "human" or "gpt".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub from:  String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id:            QuestionId,
    pub image:         String,
    #[serde(default)]
    pub conversations: Vec<Turn>,
}

/// A reference answer produced from a conversation dataset,
/// later compared against model answers by `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceAnswer {
    pub question_id: QuestionId,
    pub image:       String,
    pub prompt:      String,
    pub text:        String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_id_accepts_strings_and_integers() {
        let a: QuestionRecord =
            serde_json::from_str(r#"{"question_id":"a_1","image":"x.jpg","text":"hi"}"#).unwrap();
        let b: QuestionRecord =
            serde_json::from_str(r#"{"question_id":7,"image":"y.jpg","text":"hi"}"#).unwrap();
        assert_eq!(a.question_id, QuestionId::from("a_1"));
        assert_eq!(b.question_id, QuestionId::Int(7));
        assert_eq!(serde_json::to_string(&b.question_id).unwrap(), "7");
    }

    #[test]
    fn test_answer_record_shape() {
        let rec = AnswerRecord {
            question_id: "q".into(),
            prompt:      "Describe".into(),
            text:        "Normal chest.".into(),
            answer_id:   "abc".into(),
            model_id:    None,
            metadata:    BTreeMap::new(),
        };
        let v: serde_json::Value = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["model_id"], serde_json::Value::Null);
        assert_eq!(v["metadata"], serde_json::json!({}));
        assert_eq!(v["question_id"], "q");
    }

    #[test]
    fn test_text_record_ignores_extra_fields() {
        let r: TextRecord = serde_json::from_str(
            r#"{"question_id":"q","prompt":"p","text":"t","answer_id":"z","metadata":{}}"#,
        ).unwrap();
        assert_eq!(r.text, "t");
    }
}
