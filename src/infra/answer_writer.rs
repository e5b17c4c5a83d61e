// ============================================================
// Layer 6 — Answer Writer
// ============================================================
// Appends answer records to a JSONL file, one object per line.
//
// The file is created (truncating any previous run) when the
// writer opens and flushed after every batch, so an interrupted
// run leaves a file whose every line is a complete record.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::data::manifest::create_parent;
use crate::domain::record::AnswerRecord;
use crate::domain::traits::AnswerSink;

const ID_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const ID_LEN: usize = 22;

/// A fresh random answer id: a v4 UUID in base 57, 22 characters,
/// avoiding look-alike characters (0/O, 1/l/I).
pub fn new_answer_id() -> String {
    encode_base57(Uuid::new_v4().as_u128())
}

fn encode_base57(mut value: u128) -> String {
    let base = ID_ALPHABET.len() as u128;
    let mut digits = Vec::with_capacity(ID_LEN);
    while value > 0 {
        digits.push(ID_ALPHABET[(value % base) as usize]);
        value /= base;
    }
    while digits.len() < ID_LEN {
        digits.push(ID_ALPHABET[0]);
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

pub struct AnswerWriter {
    path:    PathBuf,
    out:     BufWriter<File>,
    written: usize,
}

impl AnswerWriter {
    pub fn create(path: &Path) -> Result<Self> {
        create_parent(path)?;
        let file = File::create(path)
            .with_context(|| format!("Cannot create answer file '{}'", path.display()))?;
        tracing::info!("Writing answers to '{}'", path.display());
        Ok(Self { path: path.to_path_buf(), out: BufWriter::new(file), written: 0 })
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl AnswerSink for AnswerWriter {
    fn write_batch(&mut self, records: &[AnswerRecord]) -> Result<()> {
        for record in records {
            serde_json::to_writer(&mut self.out, record)?;
            self.out.write_all(b"\n")?;
        }
        self.out
            .flush()
            .with_context(|| format!("Cannot flush '{}'", self.path.display()))?;
        self.written += records.len();
        Ok(())
    }
}
