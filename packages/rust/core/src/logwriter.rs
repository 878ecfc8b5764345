//! Append-only log files for actions, vote events and events.
//!
//! A log is written once and never rewritten. Its name is derived from the
//! entity's business date and a slug, so replaying the same input lands on
//! the same key: identical content is a no-op, different content is a
//! `Consistency` error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use legisync_shared::naming::{SLUG_MAX_LEN, log_timestamp, slugify};
use legisync_shared::{Action, ActionProcessing, LegisyncError, Result};
use legisync_storage::{Layout, Store, read_json, write_json};

/// Maximum slug length for event names.
const EVENT_SLUG_MAX_LEN: usize = 40;

/// What a log file records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Action,
    VoteEvent,
    Event,
}

/// Body of one log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bill_id: Option<String>,
    pub data: Value,
    #[serde(rename = "_processing")]
    pub processing: ActionProcessing,
}

impl LogRecord {
    /// Equal apart from the processing stamp.
    fn same_entity(&self, other: &LogRecord) -> bool {
        self.kind == other.kind && self.bill_id == other.bill_id && self.data == other.data
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Same entity already logged under this name.
    Duplicate,
}

// ---------------------------------------------------------------------------
// File names
// ---------------------------------------------------------------------------

pub fn action_file_name(action: &Action) -> String {
    let slug = slugify(&action.description, SLUG_MAX_LEN);
    let slug = if slug.is_empty() { "action".to_string() } else { slug };
    format!("{}_{slug}.json", log_timestamp(Some(&action.date)))
}

pub fn vote_file_name(vote: &Value) -> String {
    let result = vote.get("result").and_then(Value::as_str).unwrap_or_default();
    format!(
        "{}_vote_event_{}.json",
        log_timestamp(vote.get("start_date").and_then(Value::as_str)),
        slugify(result, SLUG_MAX_LEN)
    )
}

pub fn event_file_name(event: &Value) -> String {
    let name = event.get("name").and_then(Value::as_str).unwrap_or_default();
    format!(
        "{}_event_{}.json",
        log_timestamp(event.get("start_date").and_then(Value::as_str)),
        slugify(name, EVENT_SLUG_MAX_LEN)
    )
}

/// Whether a log file name records a vote event.
pub fn is_vote_log(name: &str) -> bool {
    name.contains("_vote_event_")
}

/// Whether a log file name records an event.
pub fn is_event_log(name: &str) -> bool {
    name.contains("_event_") && !is_vote_log(name)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Writes log files stamped with one processing time.
pub struct LogWriter<'a> {
    store: &'a dyn Store,
    layout: &'a Layout,
    now: DateTime<Utc>,
}

impl<'a> LogWriter<'a> {
    pub fn new(store: &'a dyn Store, layout: &'a Layout, now: DateTime<Utc>) -> Self {
        Self { store, layout, now }
    }

    /// Log one bill action under `bill_dir/logs/`.
    pub fn log_action(
        &self,
        bill_dir: &str,
        bill_id: &str,
        action: &Action,
    ) -> Result<WriteOutcome> {
        let data = serde_json::to_value(action.without_processing())
            .map_err(|e| LegisyncError::json("action", e))?;
        self.write(
            &self.layout.log_file(bill_dir, &action_file_name(action)),
            LogKind::Action,
            Some(bill_id),
            data,
        )
    }

    pub fn log_vote(&self, bill_dir: &str, bill_id: &str, vote: &Value) -> Result<WriteOutcome> {
        self.write(
            &self.layout.log_file(bill_dir, &vote_file_name(vote)),
            LogKind::VoteEvent,
            Some(bill_id),
            vote.clone(),
        )
    }

    pub fn log_event(&self, bill_dir: &str, bill_id: &str, event: &Value) -> Result<WriteOutcome> {
        self.write(
            &self.layout.log_file(bill_dir, &event_file_name(event)),
            LogKind::Event,
            Some(bill_id),
            event.clone(),
        )
    }

    /// Session-level copy of an event under `sessions/{session}/events/`.
    pub fn log_session_event(&self, session: &str, event: &Value) -> Result<WriteOutcome> {
        self.write(
            &self.layout.session_event(session, &event_file_name(event)),
            LogKind::Event,
            None,
            event.clone(),
        )
    }

    fn write(
        &self,
        key: &str,
        kind: LogKind,
        bill_id: Option<&str>,
        data: Value,
    ) -> Result<WriteOutcome> {
        let record = LogRecord {
            kind,
            bill_id: bill_id.map(str::to_string),
            data,
            processing: ActionProcessing {
                log_file_created: self.now,
            },
        };

        if self.store.exists(key)? {
            let existing = read_json::<LogRecord>(self.store, key)
                .map_err(|_| LegisyncError::Consistency { key: key.to_string() })?;
            return match existing {
                Some(existing) if existing.same_entity(&record) => {
                    debug!(key, "log already written");
                    Ok(WriteOutcome::Duplicate)
                }
                _ => Err(LegisyncError::Consistency { key: key.to_string() }),
            };
        }

        write_json(self.store, key, &record)?;
        debug!(key, "wrote log");
        Ok(WriteOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use legisync_shared::Jurisdiction;
    use legisync_storage::MemoryStore;
    use serde_json::json;

    fn action(description: &str, date: &str) -> Action {
        serde_json::from_value(json!({"description": description, "date": date})).unwrap()
    }

    #[test]
    fn file_names() {
        assert_eq!(
            action_file_name(&action("Introduced and Referred to H05!", "2025-01-14")),
            "20250114T000000Z_introduced_and_referred_to_h05.json"
        );
        assert_eq!(action_file_name(&action("", "bad date")), "unknown_action.json");
        assert_eq!(
            vote_file_name(&json!({"result": "pass", "start_date": "2025-02-03T10:15:00-07:00"})),
            "20250203T101500Z_vote_event_pass.json"
        );
        let name = event_file_name(&json!({
            "name": "Joint Appropriations Committee Budget Hearing on the Department of Health",
            "start_date": "2025-01-20",
        }));
        assert_eq!(
            name,
            "20250120T000000Z_event_joint_appropriations_committee_budget_he.json"
        );
        assert!(is_event_log(&name));
        assert!(!is_vote_log(&name));
        assert!(is_vote_log("x_vote_event_pass.json"));
        assert!(!is_event_log("x_vote_event_pass.json"));
    }

    #[test]
    fn replay_is_noop_and_conflict_is_consistency_error() {
        let store = MemoryStore::new();
        let layout = Layout::new(Jurisdiction::new("us", "wy"));
        let dir = layout.bill_dir("2025", "HB 1");
        let first = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap();

        let vote = json!({"result": "pass", "start_date": "2025-02-03", "counts": [{"option": "yes", "value": 40}]});
        let writer = LogWriter::new(&store, &layout, first);
        assert_eq!(writer.log_vote(&dir, "HB 1", &vote).unwrap(), WriteOutcome::Written);
        let before = store.snapshot();

        let replay = LogWriter::new(&store, &layout, later);
        assert_eq!(replay.log_vote(&dir, "HB 1", &vote).unwrap(), WriteOutcome::Duplicate);
        assert_eq!(store.snapshot(), before);

        let changed = json!({"result": "pass", "start_date": "2025-02-03", "counts": [{"option": "yes", "value": 41}]});
        let err = replay.log_vote(&dir, "HB 1", &changed).unwrap_err();
        assert_eq!(err.kind(), "consistency");
    }

    #[test]
    fn record_carries_processing_stamp() {
        let store = MemoryStore::new();
        let layout = Layout::new(Jurisdiction::new("us", "wy"));
        let dir = layout.bill_dir("2025", "HB 1");
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();

        let act = action("Introduced", "2025-01-14");
        LogWriter::new(&store, &layout, at).log_action(&dir, "HB 1", &act).unwrap();

        let key = layout.log_file(&dir, "20250114T000000Z_introduced.json");
        let record: LogRecord = read_json(&store, &key).unwrap().unwrap();
        assert_eq!(record.kind, LogKind::Action);
        assert_eq!(record.bill_id.as_deref(), Some("HB 1"));
        assert_eq!(record.processing.log_file_created, at);
        assert_eq!(record.data["description"], "Introduced");
    }
}
