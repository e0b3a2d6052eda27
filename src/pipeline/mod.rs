//! Upload classification pipeline
//!
//! ```text
//! bytes ─► fingerprint ─► validate ─► cache? ──hit──► prediction
//!                                        │
//!                                       miss
//!                                        ▼
//!                        temp file ─► dispatcher ─► wait (bounded)
//!                                                      │
//!                              cache put ◄─ success ───┘
//!                              persist ─► relocate (tracked) ─► broadcast
//! ```
//!
//! A batch is processed one item at a time, so results come back in input
//! order. No stage failure aborts the batch.

mod orchestrator;

pub use orchestrator::{ClassificationPipeline, PipelineConfig, UploadItem};
