//! Pipeline stages for drawing-to-record extraction.
//!
//! Each submodule implements exactly one transformation step. Keeping
//! stages separate makes each independently testable and lets us swap
//! implementations (e.g. a different model backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ invoke ──▶ parse
//! (file/bytes) (model)  (record)
//! ```
//!
//! 1. [`input`]  — load and validate documents; mime resolution and the
//!    request/profile types
//! 2. [`invoke`] — the one multimodal model call per document, with
//!    retry/backoff/timeout; the only stage with network I/O
//! 3. [`parse`]  — recover a structured record from the untrusted reply
//!    (fence stripping, balanced-brace scan, results/evidence split)

pub mod input;
pub mod invoke;
pub mod parse;
