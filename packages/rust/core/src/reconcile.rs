//! Reconciliation Engine: merge a batch of raw objects into the bill tree.
//!
//! The batch is planned on the calling task, then split into work units, one
//! per bill directory name. A unit owns every bill, vote event and event link
//! for that name, so promotion of a placeholder can never race with placement
//! of a vote for the same identifier. Units run on blocking threads, at most
//! `workers` at a time.
//!
//! Session-level event files, the missing-session area and the registry are
//! written by the coordinator once every unit has finished.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use legisync_shared::naming::bill_dir_name;
use legisync_shared::{
    Action, ActionProcessing, AppConfig, BillMetadata, EntityKind, LegisyncError, Result,
};
use legisync_storage::{EntityRegistry, Layout, Store, to_json_bytes};

use crate::context::RunContext;
use crate::entity::{BillEntry, Entities};
use crate::input::RawObject;
use crate::logwriter::{LogKind, LogWriter, WriteOutcome};
use crate::pipeline::ProgressReporter;
use crate::summary::EntityError;

// ---------------------------------------------------------------------------
// Config & results
// ---------------------------------------------------------------------------

/// Runtime configuration for a reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Maximum number of work units processed concurrently.
    pub workers: usize,
}

impl From<&AppConfig> for ReconcileConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            workers: config.defaults.workers,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Counters reported in the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub objects: usize,
    pub bills_created: usize,
    pub bills_updated: usize,
    pub bills_unchanged: usize,
    pub placeholders_created: usize,
    pub placeholders_promoted: usize,
    pub actions_logged: usize,
    pub votes_logged: usize,
    pub events_logged: usize,
    pub session_events_logged: usize,
    pub duplicates_skipped: usize,
    pub sessions_unresolved: usize,
}

impl ReconcileStats {
    fn absorb(&mut self, other: &ReconcileStats) {
        self.bills_created += other.bills_created;
        self.bills_updated += other.bills_updated;
        self.bills_unchanged += other.bills_unchanged;
        self.placeholders_created += other.placeholders_created;
        self.placeholders_promoted += other.placeholders_promoted;
        self.actions_logged += other.actions_logged;
        self.votes_logged += other.votes_logged;
        self.events_logged += other.events_logged;
        self.session_events_logged += other.session_events_logged;
        self.duplicates_skipped += other.duplicates_skipped;
        self.sessions_unresolved += other.sessions_unresolved;
    }

    fn count(&mut self, outcome: WriteOutcome, kind: LogKind) {
        match (outcome, kind) {
            (WriteOutcome::Duplicate, _) => self.duplicates_skipped += 1,
            (WriteOutcome::Written, LogKind::Action) => self.actions_logged += 1,
            (WriteOutcome::Written, LogKind::VoteEvent) => self.votes_logged += 1,
            (WriteOutcome::Written, LogKind::Event) => self.events_logged += 1,
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub stats: ReconcileStats,
    pub errors: Vec<EntityError>,
    /// Highest timestamp that may be folded into the watermark.
    pub watermark_candidate: Option<DateTime<Utc>>,
}

/// Whether a failed entity must be retried, holding the watermark back.
fn holds_back_watermark(err: &LegisyncError) -> bool {
    !matches!(
        err,
        LegisyncError::SessionUnresolved { .. }
            | LegisyncError::Consistency { .. }
            | LegisyncError::InvalidInput { .. }
    )
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SessionWork {
    bills: Vec<(usize, BillMetadata)>,
    /// `(object index, target identifier)`.
    votes: Vec<(usize, String)>,
    events: Vec<(usize, String)>,
}

/// Everything touching one bill directory name, across sessions.
#[derive(Debug)]
struct WorkUnit {
    dir_name: String,
    sessions: BTreeMap<String, SessionWork>,
}

impl WorkUnit {
    fn indices(&self) -> BTreeSet<usize> {
        self.sessions
            .values()
            .flat_map(|w| {
                w.bills
                    .iter()
                    .map(|(i, _)| *i)
                    .chain(w.votes.iter().map(|(i, _)| *i))
                    .chain(w.events.iter().map(|(i, _)| *i))
            })
            .collect()
    }
}

#[derive(Default)]
struct Plan {
    units: BTreeMap<String, WorkUnit>,
    session_events: Vec<(usize, String)>,
    unresolved: BTreeSet<usize>,
    failures: Vec<(usize, LegisyncError)>,
}

impl Plan {
    fn session_work(&mut self, session: &str, identifier: &str) -> &mut SessionWork {
        let dir_name = bill_dir_name(identifier);
        self.units
            .entry(dir_name.clone())
            .or_insert_with(|| WorkUnit {
                dir_name,
                sessions: BTreeMap::new(),
            })
            .sessions
            .entry(session.to_string())
            .or_default()
    }

    fn unresolved(&mut self, index: usize, identifier: &str) {
        if self.unresolved.insert(index) {
            self.failures.push((
                index,
                LegisyncError::SessionUnresolved {
                    identifier: identifier.to_string(),
                },
            ));
        }
    }
}

/// Session of a referenced bill: own field, then batch bills, then the registry.
fn resolve_session(
    obj: &RawObject,
    target: &str,
    batch_sessions: &HashMap<String, String>,
    registry: &EntityRegistry,
) -> Option<String> {
    obj.session()
        .map(str::to_string)
        .or_else(|| batch_sessions.get(target).cloned())
        .or_else(|| registry.resolve(target))
}

fn plan(objects: &[RawObject], registry: &EntityRegistry) -> Plan {
    let mut plan = Plan::default();
    let mut batch_sessions: HashMap<String, String> = HashMap::new();

    for (i, obj) in objects.iter().enumerate() {
        if obj.kind != EntityKind::Bill {
            continue;
        }
        let Some(identifier) = obj.identifier() else {
            plan.failures.push((
                i,
                LegisyncError::invalid_input(format!("{}: bill without identifier", obj.source)),
            ));
            continue;
        };
        let session = obj
            .session()
            .map(str::to_string)
            .or_else(|| registry.resolve(identifier));
        let Some(session) = session else {
            plan.unresolved(i, identifier);
            continue;
        };

        let mut value = obj.value.clone();
        if let Some(map) = value.as_object_mut() {
            map.insert("identifier".into(), Value::String(identifier.to_string()));
            map.insert("legislative_session".into(), Value::String(session.clone()));
            map.remove("type");
        }
        let bill: BillMetadata = match serde_json::from_value(value) {
            Ok(bill) => bill,
            Err(e) => {
                plan.failures
                    .push((i, LegisyncError::invalid_input(format!("{}: {e}", obj.source))));
                continue;
            }
        };

        let known = batch_sessions.entry(identifier.to_string()).or_default();
        if session > *known {
            *known = session.clone();
        }
        plan.session_work(&session, identifier).bills.push((i, bill));
    }

    for (i, obj) in objects.iter().enumerate() {
        match obj.kind {
            EntityKind::Bill => {}
            EntityKind::VoteEvent => {
                let Some(target) = obj.vote_target() else {
                    plan.failures.push((
                        i,
                        LegisyncError::invalid_input(format!(
                            "{}: vote event without bill reference",
                            obj.source
                        )),
                    ));
                    continue;
                };
                match resolve_session(obj, &target, &batch_sessions, registry) {
                    Some(session) => plan.session_work(&session, &target).votes.push((i, target)),
                    None => plan.unresolved(i, &target),
                }
            }
            EntityKind::Event => {
                let targets = obj.event_targets();
                let mut event_session = obj.session().map(str::to_string);
                for target in &targets {
                    match resolve_session(obj, target, &batch_sessions, registry) {
                        Some(session) => {
                            event_session.get_or_insert_with(|| session.clone());
                            plan.session_work(&session, target)
                                .events
                                .push((i, target.clone()));
                        }
                        None => plan.unresolved(i, target),
                    }
                }
                match event_session {
                    Some(session) => plan.session_events.push((i, session)),
                    None if targets.is_empty() => plan.unresolved(i, &obj.source),
                    None => {}
                }
            }
        }
    }

    plan
}

// ---------------------------------------------------------------------------
// Work units
// ---------------------------------------------------------------------------

struct UnitContext {
    store: Arc<dyn Store>,
    layout: Layout,
    objects: Arc<Vec<RawObject>>,
    now: DateTime<Utc>,
}

#[derive(Default)]
struct UnitReport {
    stats: ReconcileStats,
    failures: Vec<(usize, LegisyncError)>,
    /// `(identifier, session)` of bills written.
    bills: Vec<(String, String)>,
}

fn process_unit(cx: &UnitContext, unit: WorkUnit) -> UnitReport {
    let store = cx.store.as_ref();
    let entities = Entities::new(store, &cx.layout);
    let writer = LogWriter::new(store, &cx.layout, cx.now);
    let mut report = UnitReport::default();

    for (session, work) in unit.sessions {
        let dir = cx.layout.bill_dir_by_name(&session, &unit.dir_name);

        for (i, bill) in work.bills {
            let identifier = bill.identifier.clone();
            match merge_bill(&entities, &writer, &dir, bill, cx.now, &mut report.stats) {
                Ok(skipped) => {
                    report.bills.push((identifier, session.clone()));
                    report.failures.extend(skipped.into_iter().map(|e| (i, e)));
                }
                Err(e) => report.failures.push((i, e)),
            }
        }

        for (kind, items) in [
            (LogKind::VoteEvent, work.votes),
            (LogKind::Event, work.events),
        ] {
            for (i, target) in items {
                let value = &cx.objects[i].value;
                let placed = place(&entities, &writer, &dir, &target, kind, value);
                match placed {
                    Ok((created, outcome)) => {
                        if created {
                            report.stats.placeholders_created += 1;
                        }
                        report.stats.count(outcome, kind);
                    }
                    Err(e) => report.failures.push((i, e)),
                }
            }
        }
    }

    report
}

/// Write a vote event or event log into a bill directory, creating a
/// placeholder when no bill exists yet.
fn place(
    entities: &Entities<'_>,
    writer: &LogWriter<'_>,
    dir: &str,
    target: &str,
    kind: LogKind,
    value: &Value,
) -> Result<(bool, WriteOutcome)> {
    let created = entities.ensure_placeholder(dir, target)?;
    let outcome = match kind {
        LogKind::VoteEvent => writer.log_vote(dir, target, value)?,
        _ => writer.log_event(dir, target, value)?,
    };
    Ok((created, outcome))
}

/// Log `actions` and return them stamped with the processing time.
///
/// An action whose log name is taken by different content is left out of the
/// result and reported in `skipped`; the rest of the bill still merges.
fn log_actions(
    writer: &LogWriter<'_>,
    dir: &str,
    identifier: &str,
    actions: Vec<Action>,
    now: DateTime<Utc>,
    stats: &mut ReconcileStats,
    skipped: &mut Vec<LegisyncError>,
) -> Result<Vec<Action>> {
    let mut stamped = Vec::with_capacity(actions.len());
    for mut action in actions {
        let outcome = match writer.log_action(dir, identifier, &action) {
            Ok(outcome) => outcome,
            Err(e @ LegisyncError::Consistency { .. }) => {
                warn!(dir, error = %e, "action log collides, skipping action");
                skipped.push(e);
                continue;
            }
            Err(e) => return Err(e),
        };
        stats.count(outcome, LogKind::Action);
        action.processing = Some(ActionProcessing {
            log_file_created: now,
        });
        stamped.push(action);
    }
    Ok(stamped)
}

fn merge_bill(
    entities: &Entities<'_>,
    writer: &LogWriter<'_>,
    dir: &str,
    incoming: BillMetadata,
    now: DateTime<Utc>,
    stats: &mut ReconcileStats,
) -> Result<Vec<LegisyncError>> {
    let mut skipped = Vec::new();
    match entities.load(dir)? {
        Some(BillEntry::Bill(current)) => {
            let fresh: Vec<Action> = current
                .new_actions(&incoming.actions)
                .into_iter()
                .map(Action::without_processing)
                .collect();
            let logged = log_actions(
                writer,
                dir,
                &incoming.identifier,
                fresh,
                now,
                stats,
                &mut skipped,
            )?;

            if logged.is_empty() && current.same_scrape_fields(&incoming) {
                stats.bills_unchanged += 1;
                return Ok(skipped);
            }

            let mut merged = incoming;
            merged.actions = current.actions;
            merged.actions.extend(logged);
            merged.processing = current.processing;
            merged.processing.logs_latest_update = Some(now);
            entities.write_bill(dir, &merged)?;
            stats.bills_updated += 1;
            debug!(dir, "updated bill");
        }
        existing => {
            let empty = BillMetadata {
                actions: Vec::new(),
                ..incoming.clone()
            };
            let fresh: Vec<Action> = empty
                .new_actions(&incoming.actions)
                .into_iter()
                .map(Action::without_processing)
                .collect();
            let logged = log_actions(
                writer,
                dir,
                &incoming.identifier,
                fresh,
                now,
                stats,
                &mut skipped,
            )?;

            let mut bill = incoming;
            bill.actions = logged;
            bill.processing = Default::default();
            bill.processing.logs_latest_update = Some(now);

            if matches!(existing, Some(BillEntry::Placeholder(_))) {
                entities.promote(dir, &bill)?;
                stats.placeholders_promoted += 1;
            } else {
                entities.write_bill(dir, &bill)?;
            }
            stats.bills_created += 1;
            debug!(dir, "created bill");
        }
    }
    Ok(skipped)
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Merge `objects` into the store.
///
/// Entity failures are collected, never propagated. The returned watermark
/// candidate excludes every object that must be retried.
#[instrument(skip_all, fields(objects = objects.len(), workers = config.workers))]
pub async fn reconcile(
    store: Arc<dyn Store>,
    layout: &Layout,
    registry: &EntityRegistry,
    objects: Vec<RawObject>,
    config: &ReconcileConfig,
    ctx: &RunContext,
    progress: &dyn ProgressReporter,
) -> Result<ReconcileOutcome> {
    let now = ctx.now();
    let objects = Arc::new(objects);
    let Plan {
        units,
        session_events,
        unresolved,
        mut failures,
    } = plan(&objects, registry);

    let mut stats = ReconcileStats {
        objects: objects.len(),
        sessions_unresolved: unresolved.len(),
        ..Default::default()
    };

    let cx = Arc::new(UnitContext {
        store: store.clone(),
        layout: layout.clone(),
        objects: objects.clone(),
        now,
    });
    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let total = units.len();
    info!(units = total, "reconciling work units");

    let mut handles = Vec::with_capacity(total);
    for unit in units.into_values() {
        let indices = unit.indices();
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| LegisyncError::Storage(format!("worker pool closed: {e}")))?;
        let cx = cx.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            process_unit(&cx, unit)
        });
        handles.push((indices, handle));
    }

    let mut bills_written = Vec::new();
    for (done, (indices, handle)) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(report) => {
                stats.absorb(&report.stats);
                failures.extend(report.failures);
                bills_written.extend(report.bills);
            }
            Err(e) => {
                warn!(error = %e, "work unit aborted");
                for i in indices {
                    failures.push((i, LegisyncError::Storage(format!("work unit aborted: {e}"))));
                }
            }
        }
        progress.advance("reconcile", done + 1, total);
    }

    // Single-writer tail: registry, session events, missing-session area.
    for (identifier, session) in &bills_written {
        registry.record(identifier, session);
    }

    let writer = LogWriter::new(store.as_ref(), layout, now);
    for (i, session) in session_events {
        match writer.log_session_event(&session, &objects[i].value) {
            Ok(outcome) => match outcome {
                WriteOutcome::Written => stats.session_events_logged += 1,
                WriteOutcome::Duplicate => stats.duplicates_skipped += 1,
            },
            Err(e) => failures.push((i, e)),
        }
    }

    for &i in &unresolved {
        let obj = &objects[i];
        let key = layout.missing_session(&obj.source);
        store.put(&key, &to_json_bytes(&key, &obj.value)?)?;
    }

    let watermark_candidate = watermark_candidate(&objects, &failures);
    let errors = failures
        .iter()
        .map(|(i, e)| {
            let label = objects[*i].label();
            warn!(entity = %label, kind = e.kind(), error = %e, "entity failed");
            EntityError::new(label, e)
        })
        .collect();

    info!(
        bills_created = stats.bills_created,
        bills_updated = stats.bills_updated,
        placeholders_created = stats.placeholders_created,
        placeholders_promoted = stats.placeholders_promoted,
        failures = failures.len(),
        "reconciliation complete"
    );

    Ok(ReconcileOutcome {
        stats,
        errors,
        watermark_candidate,
    })
}

/// Largest timestamp below every retryable failure.
fn watermark_candidate(
    objects: &[RawObject],
    failures: &[(usize, LegisyncError)],
) -> Option<DateTime<Utc>> {
    let retry: BTreeSet<usize> = failures
        .iter()
        .filter(|(_, e)| holds_back_watermark(e))
        .map(|(i, _)| *i)
        .collect();
    let ceiling = retry.iter().filter_map(|&i| objects[i].timestamp).min();

    objects
        .iter()
        .enumerate()
        .filter(|(i, _)| !retry.contains(i))
        .filter_map(|(_, o)| o.timestamp)
        .filter(|ts| ceiling.is_none_or(|c| *ts < c))
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClock;
    use crate::pipeline::SilentProgress;
    use chrono::TimeZone;
    use legisync_shared::Jurisdiction;
    use legisync_storage::{MemoryStore, read_json};
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        layout: Layout,
        registry: EntityRegistry,
        ctx: RunContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = EntityRegistry::load(store.clone()).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        Fixture {
            store,
            layout: Layout::new(Jurisdiction::new("us", "wy")),
            registry,
            ctx: RunContext::new(Arc::new(FixedClock::new(at))),
        }
    }

    impl Fixture {
        async fn run(&self, objects: Vec<RawObject>) -> ReconcileOutcome {
            reconcile(
                self.store.clone(),
                &self.layout,
                &self.registry,
                objects,
                &ReconcileConfig { workers: 2 },
                &self.ctx,
                &SilentProgress,
            )
            .await
            .unwrap()
        }

        fn bill(&self, session: &str, identifier: &str) -> Option<BillMetadata> {
            let dir = self.layout.bill_dir(session, identifier);
            read_json(self.store.as_ref(), &self.layout.metadata(&dir)).unwrap()
        }
    }

    fn bill(identifier: &str, actions: Value) -> RawObject {
        RawObject::new(
            EntityKind::Bill,
            format!("bill_{identifier}.json"),
            json!({
                "identifier": identifier,
                "legislative_session": "2025",
                "title": format!("Bill {identifier}"),
                "actions": actions,
                "updated_at": "2025-02-01T00:00:00Z",
            }),
        )
    }

    fn vote(identifier: &str, updated_at: &str) -> RawObject {
        RawObject::new(
            EntityKind::VoteEvent,
            format!("vote_event_{identifier}.json"),
            json!({
                "bill_identifier": identifier,
                "legislative_session": "2025",
                "result": "pass",
                "start_date": "2025-01-20",
                "updated_at": updated_at,
            }),
        )
    }

    #[tokio::test]
    async fn creates_bill_with_action_logs() {
        let fx = fixture();
        let out = fx
            .run(vec![bill(
                "HB 1",
                json!([
                    {"description": "Introduced", "date": "2025-01-14"},
                    {"description": "Passed House", "date": "2025-02-01"},
                ]),
            )])
            .await;

        assert!(out.errors.is_empty());
        assert_eq!(out.stats.bills_created, 1);
        assert_eq!(out.stats.actions_logged, 2);

        let stored = fx.bill("2025", "HB 1").unwrap();
        assert_eq!(stored.actions.len(), 2);
        assert!(stored.actions.iter().all(|a| a.processing.is_some()));
        assert_eq!(stored.processing.logs_latest_update, Some(fx.ctx.now()));
        assert!(!stored.extra.contains_key("type"));
        assert_eq!(fx.registry.resolve("HB 1").as_deref(), Some("2025"));

        let dir = fx.layout.bill_dir("2025", "HB 1");
        assert!(
            fx.store
                .exists(&fx.layout.log_file(&dir, "20250114T000000Z_introduced.json"))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn replaying_a_batch_changes_nothing() {
        let fx = fixture();
        let batch = || {
            vec![
                bill("HB 1", json!([{"description": "Introduced", "date": "2025-01-14"}])),
                vote("HB 1", "2025-02-02T00:00:00Z"),
                vote("HR 999", "2025-02-03T00:00:00Z"),
            ]
        };
        fx.run(batch()).await;
        let first = fx.store.snapshot();

        let out = fx.run(batch()).await;
        assert_eq!(fx.store.snapshot(), first);
        assert_eq!(out.stats.bills_unchanged, 1);
        assert_eq!(out.stats.duplicates_skipped, 2);
    }

    #[tokio::test]
    async fn merge_appends_only_new_actions() {
        let fx = fixture();
        fx.run(vec![bill(
            "HB 1",
            json!([{"description": "Introduced", "date": "2025-01-14"}]),
        )])
        .await;
        let first_stamp = fx.bill("2025", "HB 1").unwrap().actions[0].processing.clone();

        let later = Utc.with_ymd_and_hms(2025, 3, 2, 12, 0, 0).unwrap();
        let fx = Fixture {
            ctx: RunContext::new(Arc::new(FixedClock::new(later))),
            ..fx
        };
        let out = fx
            .run(vec![bill(
                "HB 1",
                json!([
                    {"description": "Introduced", "date": "2025-01-14"},
                    {"description": "Committee hearing", "date": "2025-02-10"},
                ]),
            )])
            .await;

        assert_eq!(out.stats.bills_updated, 1);
        assert_eq!(out.stats.actions_logged, 1);
        let stored = fx.bill("2025", "HB 1").unwrap();
        assert_eq!(stored.actions.len(), 2);
        assert_eq!(stored.actions[0].processing, first_stamp);
        assert_eq!(
            stored.actions[1].processing.as_ref().unwrap().log_file_created,
            later
        );
        assert_eq!(stored.processing.logs_latest_update, Some(later));
    }

    #[tokio::test]
    async fn vote_before_bill_is_promoted() {
        let fx = fixture();
        let out = fx.run(vec![vote("HR 999", "2025-02-01T00:00:00Z")]).await;
        assert_eq!(out.stats.placeholders_created, 1);
        let dir = fx.layout.bill_dir("2025", "HR 999");
        assert!(fx.store.exists(&fx.layout.placeholder(&dir)).unwrap());
        assert_eq!(fx.registry.resolve("HR 999"), None);

        let out = fx.run(vec![bill("HR 999", json!([]))]).await;
        assert_eq!(out.stats.placeholders_promoted, 1);
        assert!(!fx.store.exists(&fx.layout.placeholder(&dir)).unwrap());
        assert!(
            fx.store
                .exists(&fx.layout.log_file(&dir, "20250120T000000Z_vote_event_pass.json"))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn arrival_order_does_not_change_the_tree() {
        let vote_first = fixture();
        vote_first.run(vec![vote("HB 7", "2025-02-01T00:00:00Z")]).await;
        vote_first
            .run(vec![bill("HB 7", json!([{"description": "Introduced", "date": "2025-01-14"}]))])
            .await;

        let bill_first = fixture();
        bill_first
            .run(vec![bill("HB 7", json!([{"description": "Introduced", "date": "2025-01-14"}]))])
            .await;
        bill_first.run(vec![vote("HB 7", "2025-02-01T00:00:00Z")]).await;

        assert_eq!(vote_first.store.snapshot(), bill_first.store.snapshot());
    }

    #[tokio::test]
    async fn events_link_bills_and_session() {
        let fx = fixture();
        let event = RawObject::new(
            EntityKind::Event,
            "event_1.json",
            json!({
                "name": "Judiciary Hearing",
                "start_date": "2025-01-22T09:00:00",
                "agenda": [{"related_entities": [
                    {"entity_type": "bill", "name": "HB 1"},
                    {"entity_type": "bill", "name": "SF 2"},
                ]}],
            }),
        );
        fx.registry.record("SF 2", "2025");
        let out = fx.run(vec![bill("HB 1", json!([])), event]).await;

        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.stats.events_logged, 2);
        assert_eq!(out.stats.session_events_logged, 1);
        assert_eq!(out.stats.placeholders_created, 1);
        assert!(
            fx.store
                .exists(&fx.layout.session_event("2025", "20250122T090000Z_event_judiciary_hearing.json"))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn unresolved_session_goes_to_review_area() {
        let fx = fixture();
        let orphan_vote = RawObject::new(
            EntityKind::VoteEvent,
            "vote_event_x.json",
            json!({"bill_identifier": "SJ 4", "result": "fail", "updated_at": "2025-02-05T00:00:00Z"}),
        );
        let out = fx.run(vec![orphan_vote, vote("HB 1", "2025-02-01T00:00:00Z")]).await;

        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].kind, "session_unresolved");
        assert_eq!(out.stats.sessions_unresolved, 1);
        assert!(
            fx.store
                .exists(&fx.layout.missing_session("vote_event_x.json"))
                .unwrap()
        );
        // Not retried, so it does not hold the watermark back.
        assert_eq!(
            out.watermark_candidate,
            Some(Utc.with_ymd_and_hms(2025, 2, 5, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn failed_entity_holds_watermark_back() {
        let fx = fixture();
        let broken = fx.layout.bill_dir("2025", "HB 2");
        fx.store
            .put(&fx.layout.metadata(&broken), b"{ not json")
            .unwrap();

        let mut early = vote("HB 1", "2025-01-10T00:00:00Z");
        early.source = "vote_event_early.json".into();
        let mut failing = bill("HB 2", json!([]));
        failing.timestamp = Some(Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap());
        let late = vote("HB 3", "2025-01-20T00:00:00Z");

        let out = fx.run(vec![early, failing, late]).await;
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].entity, "bill HB 2");
        assert_eq!(
            out.watermark_candidate,
            Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap())
        );
        // The other entities were still written.
        let dir = fx.layout.bill_dir("2025", "HB 3");
        assert!(fx.store.exists(&fx.layout.placeholder(&dir)).unwrap());
    }

    #[tokio::test]
    async fn colliding_action_log_skips_only_that_action() {
        let fx = fixture();
        let out = fx
            .run(vec![bill(
                "HB 1",
                json!([
                    {"description": "Read first time.", "date": "2025-01-14"},
                    {"description": "Read First Time", "date": "2025-01-14"},
                    {"description": "Passed House", "date": "2025-02-01"},
                ]),
            )])
            .await;

        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].kind, "consistency");
        assert_eq!(out.errors[0].entity, "bill HB 1");
        assert_eq!(out.stats.actions_logged, 2);
        assert_eq!(out.stats.bills_created, 1);
        assert_eq!(
            out.watermark_candidate,
            Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap())
        );

        let stored = fx.bill("2025", "HB 1").unwrap();
        let descriptions: Vec<&str> = stored.actions.iter().map(|a| a.description.as_str()).collect();
        assert_eq!(descriptions, vec!["Read first time.", "Passed House"]);
        let dir = fx.layout.bill_dir("2025", "HB 1");
        assert!(
            fx.store
                .exists(&fx.layout.log_file(&dir, "20250201T000000Z_passed_house.json"))
                .unwrap()
        );
        assert_eq!(fx.registry.resolve("HB 1").as_deref(), Some("2025"));

        // A replay reports the same collision and leaves the tree alone.
        let first = fx.store.snapshot();
        let again = fx.run(vec![bill(
            "HB 1",
            json!([
                {"description": "Read first time.", "date": "2025-01-14"},
                {"description": "Read First Time", "date": "2025-01-14"},
                {"description": "Passed House", "date": "2025-02-01"},
            ]),
        )])
        .await;
        assert_eq!(again.errors.len(), 1);
        assert_eq!(fx.store.snapshot(), first);
    }

    #[tokio::test]
    async fn padded_identifier_is_registered_trimmed() {
        let fx = fixture();
        let out = fx.run(vec![bill("HB 1 ", json!([]))]).await;
        assert!(out.errors.is_empty(), "{:?}", out.errors);

        let stored = fx.bill("2025", "HB 1").unwrap();
        assert_eq!(stored.identifier, "HB 1");
        assert_eq!(fx.registry.resolve("HB 1").as_deref(), Some("2025"));
        assert_eq!(fx.registry.resolve("HB 1 "), None);
    }

    #[tokio::test]
    async fn bill_without_identifier_is_invalid_input() {
        let fx = fixture();
        let nameless = RawObject::new(
            EntityKind::Bill,
            "bill_x.json",
            json!({"legislative_session": "2025"}),
        );
        let out = fx.run(vec![nameless]).await;
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].kind, "invalid_input");
    }
}
