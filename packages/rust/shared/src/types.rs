//! Core domain types for the reconciled legislative store.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline run (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Jurisdiction
// ---------------------------------------------------------------------------

/// The `country:{x}/state:{y}` root every session lives under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub country: String,
    pub state: String,
}

impl Jurisdiction {
    pub fn new(country: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            country: country.into().to_lowercase(),
            state: state.into().to_lowercase(),
        }
    }
}

impl std::fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "country:{}/state:{}", self.country, self.state)
    }
}

/// Catalog entry for a legislative session, keyed by session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    /// `{start year}-{end year}`.
    pub date_folder: String,
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

/// Discriminator of a raw scraped object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Bill,
    VoteEvent,
    Event,
}

impl EntityKind {
    /// Parse the `type` field of a raw object.
    pub fn from_type_field(value: &str) -> Option<Self> {
        match value {
            "bill" => Some(Self::Bill),
            "vote_event" | "vote" => Some(Self::VoteEvent),
            "event" => Some(Self::Event),
            _ => None,
        }
    }

    /// Infer the kind from a crawler file name (`bill_*.json`, `vote_event_*.json`, `event_*.json`).
    pub fn from_filename(name: &str) -> Option<Self> {
        if name.starts_with("vote_event") {
            Some(Self::VoteEvent)
        } else if name.starts_with("bill") {
            Some(Self::Bill)
        } else if name.starts_with("event") {
            Some(Self::Event)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bill => "bill",
            Self::VoteEvent => "vote_event",
            Self::Event => "event",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Bill metadata (`metadata.json`)
// ---------------------------------------------------------------------------

/// Pipeline bookkeeping stored under `_processing` in `metadata.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillProcessing {
    /// When new actions or metadata were last folded in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_latest_update: Option<DateTime<Utc>>,
    /// When every version of this bill was last extracted to text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_extraction_latest_update: Option<DateTime<Utc>>,
}

/// Per-action bookkeeping stored under the action's `_processing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProcessing {
    /// When the action's log file was written (not when the action happened).
    pub log_file_created: DateTime<Utc>,
}

/// One action taken on a bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub classification: Vec<String>,
    #[serde(
        rename = "_processing",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub processing: Option<ActionProcessing>,
    /// Fields we do not interpret, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Action {
    /// Identity used for idempotent merging: `(description, date)`.
    pub fn key(&self) -> (&str, &str) {
        (self.description.as_str(), self.date.as_str())
    }

    /// The action as it came from the scraper, without pipeline bookkeeping.
    pub fn without_processing(&self) -> Self {
        Self {
            processing: None,
            ..self.clone()
        }
    }
}

/// A link to one rendition of a bill version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentLink {
    pub url: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bill version (or supporting document) with its source links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVersion {
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub links: Vec<DocumentLink>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `metadata.json` structure stored in each bill directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillMetadata {
    pub identifier: String,
    pub legislative_session: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub classification: Vec<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub sponsorships: Vec<Value>,
    #[serde(default)]
    pub versions: Vec<DocumentVersion>,
    #[serde(default)]
    pub documents: Vec<DocumentVersion>,
    #[serde(rename = "_processing", default)]
    pub processing: BillProcessing,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BillMetadata {
    /// Actions in `incoming` whose `(description, date)` pair is not yet known.
    pub fn new_actions<'a>(&self, incoming: &'a [Action]) -> Vec<&'a Action> {
        let mut seen: HashSet<(&str, &str)> = self.actions.iter().map(Action::key).collect();
        incoming
            .iter()
            .filter(|a| seen.insert(a.key()))
            .collect()
    }

    /// Whether the scraped (non-bookkeeping) fields differ from `other`.
    pub fn same_scrape_fields(&self, other: &BillMetadata) -> bool {
        self.identifier == other.identifier
            && self.legislative_session == other.legislative_session
            && self.title == other.title
            && self.classification == other.classification
            && self.sponsorships == other.sponsorships
            && self.versions == other.versions
            && self.documents == other.documents
            && self.extra == other.extra
    }
}

// ---------------------------------------------------------------------------
// Placeholder (`placeholder.json`)
// ---------------------------------------------------------------------------

/// Stand-in written when a vote or event references a bill we have not seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceholderMarker {
    pub identifier: String,
    pub placeholder: bool,
}

impl PlaceholderMarker {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            placeholder: true,
        }
    }
}

// ---------------------------------------------------------------------------
// OrphanRecord
// ---------------------------------------------------------------------------

/// Multi-run statistics for an identifier that only exists as a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanRecord {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub occurrence_count: u32,
    pub session: String,
    pub vote_count: usize,
    pub event_count: usize,
    /// Placeholder directory relative to the output root.
    pub path: String,
    /// Run that last counted this orphan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunId>,
}
