//! Raw scraped objects: one JSON file per object in the input directory.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use legisync_shared::naming::parse_timestamp;
use legisync_shared::{EntityKind, LegisyncError, Result, SessionInfo};

/// One scraped bill, vote event or event.
#[derive(Debug, Clone)]
pub struct RawObject {
    pub kind: EntityKind,
    /// File name in the input directory.
    pub source: String,
    pub value: Value,
    /// Scrape timestamp used for watermark gating.
    pub timestamp: Option<DateTime<Utc>>,
}

/// A file that could not be read as a raw object.
#[derive(Debug, Clone)]
pub struct InvalidInput {
    pub source: String,
    pub bytes: Vec<u8>,
    pub message: String,
}

/// Everything found in one input directory.
#[derive(Debug, Default)]
pub struct RawBatch {
    pub objects: Vec<RawObject>,
    pub invalid: Vec<InvalidInput>,
    /// Files skipped on purpose (jurisdiction files, unknown kinds).
    pub ignored: usize,
    /// Session catalog from the first jurisdiction file that lists sessions.
    pub sessions: BTreeMap<String, SessionInfo>,
}

impl RawObject {
    pub fn new(kind: EntityKind, source: impl Into<String>, value: Value) -> Self {
        let timestamp = scrape_timestamp(&value);
        Self {
            kind,
            source: source.into(),
            value,
            timestamp,
        }
    }

    /// Non-empty string field.
    pub fn str_field(&self, name: &str) -> Option<&str> {
        non_empty(self.value.get(name))
    }

    pub fn identifier(&self) -> Option<&str> {
        self.str_field("identifier")
    }

    pub fn session(&self) -> Option<&str> {
        self.str_field("legislative_session")
    }

    /// Bill referenced by a vote event.
    pub fn vote_target(&self) -> Option<String> {
        self.str_field("bill_identifier")
            .or_else(|| non_empty(self.value.get("bill").and_then(|b| b.get("identifier"))))
            .map(str::to_string)
    }

    /// Bills referenced by an event: `bill_identifier` plus agenda bill entities.
    pub fn event_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        let mut push = |id: &str| {
            if !targets.iter().any(|t| t == id) {
                targets.push(id.to_string());
            }
        };

        if let Some(id) = self.str_field("bill_identifier") {
            push(id);
        }
        let agenda = self.value.get("agenda").and_then(Value::as_array);
        for item in agenda.into_iter().flatten() {
            let related = item.get("related_entities").and_then(Value::as_array);
            for entity in related.into_iter().flatten() {
                if entity.get("entity_type").and_then(Value::as_str) != Some("bill") {
                    continue;
                }
                let id = non_empty(entity.get("name"))
                    .or_else(|| non_empty(entity.get("bill_identifier")));
                if let Some(id) = id {
                    push(id);
                }
            }
        }
        targets
    }

    /// Short label for summaries and logs.
    pub fn label(&self) -> String {
        match self.kind {
            EntityKind::Bill => match self.identifier() {
                Some(id) => format!("bill {id}"),
                None => format!("bill {}", self.source),
            },
            kind => format!("{kind} {}", self.source),
        }
    }
}

fn non_empty(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First present of `updated_at`, `start_date`, the latest action date, `created_at`.
pub fn scrape_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let field = |name: &str| value.get(name).and_then(Value::as_str).and_then(parse_timestamp);

    field("updated_at")
        .or_else(|| field("start_date"))
        .or_else(|| {
            value
                .get("actions")
                .and_then(Value::as_array)?
                .iter()
                .filter_map(|a| a.get("date").and_then(Value::as_str).and_then(parse_timestamp))
                .max()
        })
        .or_else(|| field("created_at"))
}

impl RawBatch {
    /// Drop objects already covered by `watermark`. Returns how many were dropped.
    pub fn retain_newer_than(&mut self, watermark: DateTime<Utc>) -> usize {
        let before = self.objects.len();
        self.objects
            .retain(|o| o.timestamp.is_none_or(|ts| ts > watermark));
        before - self.objects.len()
    }
}

/// Sessions listed under `legislative_sessions` of a jurisdiction object.
/// Entries without an identifier, a name or both years are dropped.
pub fn session_catalog(jurisdiction: &Value) -> BTreeMap<String, SessionInfo> {
    let Some(sessions) = jurisdiction.get("legislative_sessions").and_then(Value::as_array) else {
        return BTreeMap::new();
    };
    let year = |session: &Value, field: &str| {
        session
            .get(field)
            .and_then(Value::as_str)
            .and_then(|s| s.get(..4))
            .map(str::to_string)
    };
    sessions
        .iter()
        .filter_map(|session| {
            let identifier = non_empty(session.get("identifier"))?;
            let name = non_empty(session.get("name"))?;
            let start = year(session, "start_date")?;
            let end = year(session, "end_date")?;
            Some((
                identifier.to_string(),
                SessionInfo {
                    name: name.to_string(),
                    date_folder: format!("{start}-{end}"),
                },
            ))
        })
        .collect()
}

/// Load every `*.json` file directly inside `dir`, sorted by file name.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_dir(dir: &Path) -> Result<RawBatch> {
    let entries = std::fs::read_dir(dir).map_err(|e| LegisyncError::io(dir, e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| LegisyncError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut batch = RawBatch::default();
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = std::fs::read(&path).map_err(|e| LegisyncError::io(&path, e))?;
        if name.starts_with("jurisdiction") {
            batch.ignored += 1;
            if batch.sessions.is_empty() {
                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => batch.sessions = session_catalog(&value),
                    Err(e) => warn!(file = %name, error = %e, "unreadable jurisdiction file"),
                }
            }
            continue;
        }

        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => {
                batch.invalid.push(InvalidInput {
                    source: name,
                    bytes,
                    message: "top-level JSON value is not an object".into(),
                });
                continue;
            }
            Err(e) => {
                batch.invalid.push(InvalidInput {
                    source: name,
                    bytes,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .and_then(EntityKind::from_type_field)
            .or_else(|| EntityKind::from_filename(&name));
        match kind {
            Some(kind) => batch.objects.push(RawObject::new(kind, name, value)),
            None => {
                debug!(file = %name, "ignoring object of unknown kind");
                batch.ignored += 1;
            }
        }
    }

    info!(
        objects = batch.objects.len(),
        invalid = batch.invalid.len(),
        ignored = batch.ignored,
        sessions = batch.sessions.len(),
        "loaded raw input"
    );
    Ok(batch)
}
