//! Orphan Tracker: ages placeholders across runs.
//!
//! Runs after reconciliation. Every placeholder still in the tree is an
//! orphan; its record counts the runs it has been seen in. A placeholder whose
//! identifier now resolves to a real bill is folded into that bill and its
//! record dropped.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, instrument, warn};

use legisync_shared::{OrphanRecord, PlaceholderMarker, Result};
use legisync_storage::layout::ORPHANS_KEY;
use legisync_storage::{EntityRegistry, Layout, Store, read_json, to_json_bytes};

use crate::context::RunContext;
use crate::entity::Entities;
use crate::logwriter::{is_event_log, is_vote_log};

/// Orphan section of the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrphanReport {
    /// Records left after this pass.
    pub tracked: usize,
    pub new: Vec<String>,
    pub resolved: Vec<String>,
    /// Identifiers seen in at least `chronic_orphan_threshold` runs.
    pub chronic: Vec<String>,
}

#[derive(Debug)]
struct PlaceholderSite {
    session: String,
    dir: String,
    identifier: String,
}

#[derive(Debug, Default)]
struct Sighting {
    session: String,
    path: String,
    vote_count: usize,
    event_count: usize,
}

pub struct OrphanTracker<'a> {
    store: &'a dyn Store,
    layout: &'a Layout,
    threshold: u32,
}

impl<'a> OrphanTracker<'a> {
    pub fn new(store: &'a dyn Store, layout: &'a Layout, threshold: u32) -> Self {
        Self {
            store,
            layout,
            threshold,
        }
    }

    /// Persisted records, keyed by identifier.
    pub fn load(&self) -> Result<BTreeMap<String, OrphanRecord>> {
        Ok(read_json(self.store, ORPHANS_KEY)?.unwrap_or_default())
    }

    /// Post-pass over every placeholder. Running it again within the same
    /// run leaves the tracking file unchanged.
    #[instrument(skip_all, fields(run_id = %ctx.run_id))]
    pub fn run(&self, registry: &EntityRegistry, ctx: &RunContext) -> Result<OrphanReport> {
        let now = ctx.now();
        let entities = Entities::new(self.store, self.layout);
        let mut records = self.load()?;
        let mut resolved: BTreeSet<String> = BTreeSet::new();
        let mut sightings: BTreeMap<String, Sighting> = BTreeMap::new();

        for site in self.scan()? {
            if self.fold_into_bill(&entities, registry, &site) {
                resolved.insert(site.identifier);
                continue;
            }

            let names = entities.log_names(&site.dir)?;
            let sighting = sightings.entry(site.identifier).or_default();
            sighting.session = site.session;
            sighting.path = site.dir;
            sighting.vote_count += names.iter().filter(|n| is_vote_log(n)).count();
            sighting.event_count += names.iter().filter(|n| is_event_log(n)).count();
        }

        let mut report = OrphanReport::default();
        for (identifier, seen) in sightings.iter() {
            match records.get_mut(identifier) {
                Some(record) => {
                    if record.last_run != Some(ctx.run_id) {
                        record.occurrence_count += 1;
                        record.last_seen = now;
                        record.last_run = Some(ctx.run_id);
                    }
                    record.session = seen.session.clone();
                    record.path = seen.path.clone();
                    record.vote_count = seen.vote_count;
                    record.event_count = seen.event_count;
                }
                None => {
                    records.insert(
                        identifier.clone(),
                        OrphanRecord {
                            first_seen: now,
                            last_seen: now,
                            occurrence_count: 1,
                            session: seen.session.clone(),
                            vote_count: seen.vote_count,
                            event_count: seen.event_count,
                            path: seen.path.clone(),
                            last_run: Some(ctx.run_id),
                        },
                    );
                    report.new.push(identifier.clone());
                }
            }
        }

        let gone: Vec<String> = records
            .keys()
            .filter(|id| !sightings.contains_key(*id))
            .cloned()
            .collect();
        for identifier in gone {
            records.remove(&identifier);
            resolved.insert(identifier);
        }
        for identifier in &resolved {
            info!(identifier, "orphan resolved");
        }

        report.tracked = records.len();
        report.resolved = resolved.into_iter().collect();
        report.chronic = records
            .iter()
            .filter(|(_, r)| r.occurrence_count >= self.threshold)
            .map(|(id, _)| id.clone())
            .collect();
        for identifier in &report.chronic {
            let count = records[identifier].occurrence_count;
            warn!(identifier, occurrences = count, "chronic orphan");
        }

        self.persist(&records)?;
        info!(
            tracked = report.tracked,
            new = report.new.len(),
            resolved = report.resolved.len(),
            chronic = report.chronic.len(),
            "orphan tracking complete"
        );
        Ok(report)
    }

    /// Every placeholder directory, sessions and names in sorted order.
    /// Placeholders left next to a `metadata.json` by an interrupted
    /// promotion are removed on the way.
    fn scan(&self) -> Result<Vec<PlaceholderSite>> {
        let mut sites = Vec::new();
        for session in self.store.children(&self.layout.sessions_root())? {
            for name in self.store.children(&self.layout.bills_root(&session))? {
                let dir = self.layout.bill_dir_by_name(&session, &name);
                let marker_key = self.layout.placeholder(&dir);
                if !self.store.exists(&marker_key)? {
                    continue;
                }
                if self.store.exists(&self.layout.metadata(&dir))? {
                    self.store.delete(&marker_key)?;
                    info!(dir, "removed stale placeholder next to bill");
                    continue;
                }
                let identifier = match read_json::<PlaceholderMarker>(self.store, &marker_key) {
                    Ok(Some(marker)) => marker.identifier,
                    _ => {
                        warn!(dir, "unreadable placeholder marker, using directory name");
                        name.clone()
                    }
                };
                sites.push(PlaceholderSite {
                    session: session.clone(),
                    dir,
                    identifier,
                });
            }
        }
        Ok(sites)
    }

    /// Move a placeholder onto the bill its identifier resolves to, when that
    /// bill lives in the same or a later session.
    fn fold_into_bill(
        &self,
        entities: &Entities<'_>,
        registry: &EntityRegistry,
        site: &PlaceholderSite,
    ) -> bool {
        let Some(home) = registry.resolve(&site.identifier) else {
            return false;
        };
        if home < site.session {
            return false;
        }
        let home_dir = self.layout.bill_dir(&home, &site.identifier);
        if home_dir == site.dir {
            return false;
        }
        match self.store.exists(&self.layout.metadata(&home_dir)) {
            Ok(true) => {}
            _ => return false,
        }
        match entities.reparent(&site.dir, &home_dir) {
            Ok(_) => true,
            Err(e) => {
                warn!(dir = %site.dir, error = %e, "could not fold placeholder into bill");
                false
            }
        }
    }

    fn persist(&self, records: &BTreeMap<String, OrphanRecord>) -> Result<()> {
        let bytes = to_json_bytes(ORPHANS_KEY, records)?;
        match self.store.get(ORPHANS_KEY)? {
            Some(existing) if existing == bytes => Ok(()),
            None if records.is_empty() => Ok(()),
            _ => self.store.put(ORPHANS_KEY, &bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use legisync_shared::{BillMetadata, Jurisdiction};
    use legisync_storage::MemoryStore;
    use serde_json::json;

    use crate::context::FixedClock;

    struct Fixture {
        store: Arc<MemoryStore>,
        layout: Layout,
        registry: EntityRegistry,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        Fixture {
            registry: EntityRegistry::load(store.clone()).unwrap(),
            store,
            layout: Layout::new(Jurisdiction::new("us", "wy")),
            clock: Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap())),
        }
    }

    impl Fixture {
        fn placeholder(&self, session: &str, identifier: &str, logs: &[&str]) -> String {
            let entities = Entities::new(self.store.as_ref(), &self.layout);
            let dir = self.layout.bill_dir(session, identifier);
            entities.ensure_placeholder(&dir, identifier).unwrap();
            for name in logs {
                self.store.put(&self.layout.log_file(&dir, name), b"{}").unwrap();
            }
            dir
        }

        fn tracker(&self) -> OrphanTracker<'_> {
            OrphanTracker::new(self.store.as_ref(), &self.layout, 3)
        }

        fn new_run(&self) -> RunContext {
            self.clock.advance(Duration::days(1));
            RunContext::new(self.clock.clone())
        }
    }

    #[test]
    fn counts_runs_and_flags_chronic() {
        let fx = fixture();
        fx.placeholder(
            "2025",
            "HR 999",
            &["a_vote_event_pass.json", "b_vote_event_fail.json", "c_event_hearing.json"],
        );

        let first = fx.tracker().run(&fx.registry, &fx.new_run()).unwrap();
        assert_eq!(first.new, vec!["HR 999"]);
        assert!(first.chronic.is_empty());

        fx.tracker().run(&fx.registry, &fx.new_run()).unwrap();
        let third = fx.tracker().run(&fx.registry, &fx.new_run()).unwrap();
        assert_eq!(third.chronic, vec!["HR 999"]);

        let records = fx.tracker().load().unwrap();
        let record = &records["HR 999"];
        assert_eq!(record.occurrence_count, 3);
        assert_eq!(record.vote_count, 2);
        assert_eq!(record.event_count, 1);
        assert_eq!(record.session, "2025");
        assert!(record.last_seen > record.first_seen);
    }

    #[test]
    fn rerun_within_a_run_is_idempotent() {
        let fx = fixture();
        fx.placeholder("2025", "HR 999", &["a_vote_event_pass.json"]);
        let ctx = fx.new_run();

        fx.tracker().run(&fx.registry, &ctx).unwrap();
        let once = fx.store.snapshot();
        fx.clock.advance(Duration::hours(1));
        let again = fx.tracker().run(&fx.registry, &ctx).unwrap();

        assert_eq!(fx.store.snapshot(), once);
        assert!(again.new.is_empty());
        assert_eq!(fx.tracker().load().unwrap()["HR 999"].occurrence_count, 1);
    }

    #[test]
    fn promoted_placeholder_resolves_record() {
        let fx = fixture();
        let dir = fx.placeholder("2025", "HR 999", &["a_vote_event_pass.json"]);
        fx.tracker().run(&fx.registry, &fx.new_run()).unwrap();

        let bill: BillMetadata =
            serde_json::from_value(json!({"identifier": "HR 999", "legislative_session": "2025"}))
                .unwrap();
        Entities::new(fx.store.as_ref(), &fx.layout)
            .promote(&dir, &bill)
            .unwrap();

        let report = fx.tracker().run(&fx.registry, &fx.new_run()).unwrap();
        assert_eq!(report.resolved, vec!["HR 999"]);
        assert_eq!(report.tracked, 0);
        assert!(fx.tracker().load().unwrap().is_empty());
    }

    #[test]
    fn placeholder_in_older_session_folds_into_bill() {
        let fx = fixture();
        let old = fx.placeholder("2024", "HB 5", &["a_vote_event_pass.json"]);
        let newer = fx.placeholder("2026", "HB 5", &["b_vote_event_pass.json"]);

        let home = fx.layout.bill_dir("2025", "HB 5");
        let bill: BillMetadata =
            serde_json::from_value(json!({"identifier": "HB 5", "legislative_session": "2025"}))
                .unwrap();
        Entities::new(fx.store.as_ref(), &fx.layout)
            .write_bill(&home, &bill)
            .unwrap();
        fx.registry.record("HB 5", "2025");

        let report = fx.tracker().run(&fx.registry, &fx.new_run()).unwrap();
        assert_eq!(report.resolved, vec!["HB 5"]);
        assert!(fx.store.list(&old).unwrap().is_empty());
        assert!(
            fx.store
                .exists(&fx.layout.log_file(&home, "a_vote_event_pass.json"))
                .unwrap()
        );
        // A later session waits for its own bill.
        assert!(fx.store.exists(&fx.layout.placeholder(&newer)).unwrap());
        assert_eq!(fx.tracker().load().unwrap()["HB 5"].session, "2026");
    }

    #[test]
    fn stale_marker_next_to_bill_is_removed() {
        let fx = fixture();
        let dir = fx.placeholder("2025", "HB 8", &[]);
        fx.store
            .put(
                &fx.layout.metadata(&dir),
                br#"{"identifier": "HB 8", "legislative_session": "2025"}"#,
            )
            .unwrap();

        let report = fx.tracker().run(&fx.registry, &fx.new_run()).unwrap();
        assert_eq!(report.tracked, 0);
        assert!(!fx.store.exists(&fx.layout.placeholder(&dir)).unwrap());
        assert!(!fx.store.exists(ORPHANS_KEY).unwrap());
    }
}
