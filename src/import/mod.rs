//! Course import
//!
//! Import Flow:
//! 1. Author access and file name checks (wrong suffix → stage -1, 415)
//! 2. Chunk assembly through [`crate::upload::ChunkReceiver`]
//! 3. On the final chunk: extract (stage 1 → 2), locate `course.xml`
//!    (→ 3), load into the course store (→ 4)
//! 4. Any failure negates the last stage reached; the staging directory is
//!    removed on every terminal path

mod error;
mod pipeline;

pub use error::{ImportError, ImportFailure};
pub use pipeline::{ImportOutcome, ImportPipeline, ImportRequest};
