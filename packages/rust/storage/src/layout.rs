//! Key scheme of the output tree.
//!
//! ```text
//! country:{c}/state:{s}/sessions/{session}/bills/{id}/metadata.json
//!                                                    /placeholder.json
//!                                                    /logs/{ts}_{slug}.json
//!                                                    /files/*
//! country:{c}/state:{s}/sessions/{session}/events/{ts}_event_{slug}.json
//! .legisync/watermark.json
//! .legisync/bill_session_mapping.json
//! .legisync/sessions.json
//! .legisync/errors/...
//! ```

use legisync_shared::naming::bill_dir_name;
use legisync_shared::Jurisdiction;

use crate::kv::join_key;

/// Root of the hidden metadata area.
pub const HIDDEN_ROOT: &str = ".legisync";
pub const WATERMARK_KEY: &str = ".legisync/watermark.json";
pub const REGISTRY_KEY: &str = ".legisync/bill_session_mapping.json";
pub const SESSIONS_KEY: &str = ".legisync/sessions.json";
pub const ORPHANS_KEY: &str = ".legisync/errors/orphaned_placeholders_tracking.json";

pub const METADATA_FILE: &str = "metadata.json";
pub const PLACEHOLDER_FILE: &str = "placeholder.json";
pub const LOGS_DIR: &str = "logs";
pub const FILES_DIR: &str = "files";

/// Partition of the text extraction error directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionErrorDir {
    Download,
    Parsing,
    MissingFile,
}

impl ExtractionErrorDir {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Download => "download_failures",
            Self::Parsing => "parsing_errors",
            Self::MissingFile => "missing_files",
        }
    }
}

/// Computes keys for one jurisdiction.
#[derive(Debug, Clone)]
pub struct Layout {
    jurisdiction: Jurisdiction,
    root: String,
}

impl Layout {
    pub fn new(jurisdiction: Jurisdiction) -> Self {
        let root = jurisdiction.to_string();
        Self { jurisdiction, root }
    }

    pub fn jurisdiction(&self) -> &Jurisdiction {
        &self.jurisdiction
    }

    pub fn sessions_root(&self) -> String {
        join_key(&[&self.root, "sessions"])
    }

    pub fn session_root(&self, session: &str) -> String {
        join_key(&[&self.root, "sessions", session])
    }

    pub fn bills_root(&self, session: &str) -> String {
        join_key(&[&self.session_root(session), "bills"])
    }

    /// Directory of a bill or placeholder.
    pub fn bill_dir(&self, session: &str, identifier: &str) -> String {
        self.bill_dir_by_name(session, &bill_dir_name(identifier))
    }

    /// Directory of a bill from its already-normalised directory name.
    pub fn bill_dir_by_name(&self, session: &str, dir_name: &str) -> String {
        join_key(&[&self.bills_root(session), dir_name])
    }

    pub fn metadata(&self, bill_dir: &str) -> String {
        join_key(&[bill_dir, METADATA_FILE])
    }

    pub fn placeholder(&self, bill_dir: &str) -> String {
        join_key(&[bill_dir, PLACEHOLDER_FILE])
    }

    pub fn logs_dir(&self, bill_dir: &str) -> String {
        join_key(&[bill_dir, LOGS_DIR])
    }

    pub fn log_file(&self, bill_dir: &str, name: &str) -> String {
        join_key(&[bill_dir, LOGS_DIR, name])
    }

    pub fn files_dir(&self, bill_dir: &str) -> String {
        join_key(&[bill_dir, FILES_DIR])
    }

    pub fn file(&self, bill_dir: &str, name: &str) -> String {
        join_key(&[bill_dir, FILES_DIR, name])
    }

    pub fn session_events_dir(&self, session: &str) -> String {
        join_key(&[&self.session_root(session), "events"])
    }

    pub fn session_event(&self, session: &str, name: &str) -> String {
        join_key(&[&self.session_events_dir(session), name])
    }

    // -----------------------------------------------------------------------
    // Hidden area
    // -----------------------------------------------------------------------

    pub fn missing_session(&self, name: &str) -> String {
        join_key(&[HIDDEN_ROOT, "errors", "missing_session", name])
    }

    pub fn invalid_input(&self, name: &str) -> String {
        join_key(&[HIDDEN_ROOT, "errors", "invalid_input", name])
    }

    pub fn extraction_error(&self, dir: ExtractionErrorDir, name: &str) -> String {
        join_key(&[HIDDEN_ROOT, "errors", "text_extraction_errors", dir.dir_name(), name])
    }
}
