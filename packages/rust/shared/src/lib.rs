//! Shared types, error model, and configuration for legisync.
//!
//! This crate is the foundation depended on by all other legisync crates.
//! It provides:
//! - [`LegisyncError`] — the unified error type
//! - Domain types ([`BillMetadata`], [`Action`], [`OrphanRecord`], [`RunId`])
//! - Configuration ([`AppConfig`], config loading)
//! - Naming helpers (slugs, bill directory names, log timestamps)

pub mod config;
pub mod error;
pub mod naming;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_USER_AGENT, DefaultsConfig, ExtractionSettings,
    MAX_CHECKPOINT_INTERVAL_SECS, ReconcileSettings,
    config_dir, config_file_path, init_config, load_config, load_config_from,
    write_default_config,
};
pub use error::{LegisyncError, Result};
pub use types::{
    Action, ActionProcessing, BillMetadata, BillProcessing, DocumentLink, DocumentVersion,
    EntityKind, Jurisdiction, OrphanRecord, PlaceholderMarker, RunId, SessionInfo,
};
