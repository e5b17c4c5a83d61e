// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits describing what the
// pipeline works on. No burn types, no file I/O.

// Typed failure kinds shared by every tool
pub mod error;

// Manifest, answer, metric and conversation records
pub mod record;

// Prediction mask [category × H × W]
pub mod mask;

// Category id → label table and the jpg cutout subset
pub mod categories;

// Core abstractions that other layers implement
pub mod traits;
