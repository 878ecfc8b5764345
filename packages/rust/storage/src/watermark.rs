//! Watermark Store: the latest scrape timestamp already folded into the tree.
//!
//! `advance` only stages a candidate in memory. `commit` makes it durable with
//! one atomic write, so an interrupted run leaves the previous value intact.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use legisync_shared::{LegisyncError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::kv::{Store, read_json, write_json};
use crate::layout::WATERMARK_KEY;

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkFile {
    watermark: DateTime<Utc>,
}

/// Run-scoped handle on the persisted watermark.
pub struct WatermarkStore {
    store: Arc<dyn Store>,
    current: DateTime<Utc>,
    staged: Option<DateTime<Utc>>,
}

impl WatermarkStore {
    /// Load the persisted watermark. A missing file reads as the Unix epoch.
    pub fn load(store: Arc<dyn Store>) -> Result<Self> {
        let current = read_json::<WatermarkFile>(store.as_ref(), WATERMARK_KEY)?
            .map(|f| f.watermark)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Ok(Self {
            store,
            current,
            staged: None,
        })
    }

    /// The committed value (epoch when nothing was ever committed).
    pub fn current(&self) -> DateTime<Utc> {
        self.current
    }

    /// Stage `candidate`. Fails with `Regression` if it is older than the committed value.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> Result<()> {
        if candidate < self.current {
            return Err(LegisyncError::Regression {
                current: self.current,
                candidate,
            });
        }
        self.staged = Some(self.staged.map_or(candidate, |s| s.max(candidate)));
        Ok(())
    }

    /// Persist the staged value. Returns the new watermark if it moved.
    pub fn commit(&mut self) -> Result<Option<DateTime<Utc>>> {
        let Some(staged) = self.staged.take() else {
            return Ok(None);
        };
        if staged == self.current {
            return Ok(None);
        }
        write_json(
            self.store.as_ref(),
            WATERMARK_KEY,
            &WatermarkFile { watermark: staged },
        )?;
        info!(from = %self.current, to = %staged, "watermark committed");
        self.current = staged;
        Ok(Some(staged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn load_defaults_to_epoch() {
        let wm = WatermarkStore::load(Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(wm.current(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn advance_is_not_durable_until_commit() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut wm = WatermarkStore::load(store.clone()).unwrap();
        wm.advance(ts(5)).unwrap();
        assert!(!store.exists(WATERMARK_KEY).unwrap());

        assert_eq!(wm.commit().unwrap(), Some(ts(5)));
        let reloaded = WatermarkStore::load(store).unwrap();
        assert_eq!(reloaded.current(), ts(5));
    }

    #[test]
    fn regression_is_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut wm = WatermarkStore::load(store.clone()).unwrap();
        wm.advance(ts(10)).unwrap();
        wm.commit().unwrap();

        let mut wm = WatermarkStore::load(store).unwrap();
        let err = wm.advance(ts(9)).unwrap_err();
        assert!(matches!(err, LegisyncError::Regression { .. }));
        assert!(err.is_fatal());
        assert_eq!(wm.current(), ts(10));
    }

    #[test]
    fn staged_keeps_the_maximum() {
        let mut wm = WatermarkStore::load(Arc::new(MemoryStore::new())).unwrap();
        wm.advance(ts(7)).unwrap();
        wm.advance(ts(3)).unwrap();
        assert_eq!(wm.commit().unwrap(), Some(ts(7)));
        assert_eq!(wm.current(), ts(7));
    }

    #[test]
    fn commit_without_change_writes_nothing() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut wm = WatermarkStore::load(store.clone()).unwrap();
        assert_eq!(wm.commit().unwrap(), None);
        assert!(!store.exists(WATERMARK_KEY).unwrap());
    }
}
