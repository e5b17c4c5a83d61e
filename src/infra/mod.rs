// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the outside world on behalf of the
// other layers:
//
//   checkpoint.rs      — Model directory layout
//                        config.json + model.mpk (CompactRecorder)
//                        + tokenizer.json + labels.json
//
//   tokenizer_store.rs — HuggingFace tokenizer wrapper
//                        Encodes prompts with the image token
//                        spliced in, decodes generated ids.
//
//   answer_writer.rs   — Answer JSONL sink, flushed per batch
//
//   saver.rs           — Segmentation export in six formats
//     coco.rs          —   COCO polygons / boxes for "json"
//     dicom_seg.rs     —   DICOM SEG object for "dicom-seg"
//
//   metrics.rs         — BLEU / METEOR / ROUGE-L / SEMANTIC
//                        scoring, pairing and averaging
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Records)

/// Model directory: config, weights, tokenizer and labels
pub mod checkpoint;

/// Tokenizer loading and prompt encoding
pub mod tokenizer_store;

/// Append-only answer file
pub mod answer_writer;

/// COCO annotation documents
pub mod coco;

/// DICOM Segmentation objects
pub mod dicom_seg;

/// Segmentation file saver
pub mod saver;

/// Text similarity metrics
pub mod metrics;
