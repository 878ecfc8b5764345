//! Core pipeline orchestration and domain logic for legisync.
//!
//! This crate folds raw scraped objects into the per-jurisdiction output tree
//! (reconciliation, placeholders, orphan tracking, watermark gating) and
//! extracts bill text from it. [`pipeline::run`] is the end-to-end entry point.

pub mod context;
pub mod entity;
pub mod extraction;
pub mod input;
pub mod logwriter;
pub mod orphans;
pub mod pipeline;
pub mod reconcile;
pub mod summary;

pub use pipeline::{ProgressReporter, RunRequest, SilentProgress, run, run_with_store};
pub use summary::{RunMode, RunSummary};
