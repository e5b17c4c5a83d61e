// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// One use case per tool. Each one reads its inputs, wires the
// data / ml / infra pieces together and writes its outputs:
//
//   segment    images → masks in npy/npz/png/jpg/json/dicom-seg
//   infer      question manifest → answer JSONL (one shard)
//   evaluate   reference + answers → per-pair and mean metrics
//   average    per-pair metrics → mean metrics
//   split      dataset → test / train files
//   make-eval  conversations → questions + reference answers
//
// Rules for this layer:
//   - No model math here (Layer 5)
//   - No printing here (Layer 1)
//   - Only workflow coordination

/// Segmentation and mask export
pub mod segment_use_case;

/// Batched question answering
pub mod infer_use_case;

/// Metric evaluation and averaging
pub mod evaluate_use_case;

/// Dataset split and evaluation-file generation
pub mod dataset_use_case;
