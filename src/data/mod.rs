// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between files on disk and batched tensors.
//
// Segmentation flow:
//
//   image folder / path list
//       │
//       ▼
//   FolderDataset     → enumerates jpg/png/dcm files
//       │
//       ▼
//   FileLoader        → decode, normalise, resize to 512×512
//       │
//       ▼
//   Prefetcher        → ordered background loading
//       │
//       ▼
//   ImageBatcher      → ImageBatch (data concatenated on dim 0)
//
// Question-answering flow:
//
//   question manifest (JSONL)
//       │
//       ▼
//   chunker           → this process's shard, then batch ranges
//       │
//       ▼
//   QuestionDataset   → image via FileLoader, prompt via template + tokenizer
//       │
//       ▼
//   Prefetcher → PromptBatcher → PromptBatch (right-padded ids)
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads jpg/png/dcm files into tensors plus original pixels
pub mod loader;

/// Pixel conversions and mean/std normalisation
pub mod preprocessor;

/// Chat templates and image placeholder handling
pub mod conversation;

/// Manifest sharding and batch ranges
pub mod chunker;

/// Folder and question datasets
pub mod dataset;

/// Struct-of-arrays batches for both flows
pub mod batcher;

/// Ordered producer/consumer prefetch
pub mod prefetch;

/// JSON / JSONL reading and writing
pub mod manifest;

/// Seeded test/train split
pub mod splitter;
