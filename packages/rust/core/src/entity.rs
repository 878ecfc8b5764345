//! Bill directory state: a real bill or a placeholder, never both.

use legisync_shared::{BillMetadata, LegisyncError, PlaceholderMarker, Result};
use legisync_storage::{Layout, Store, key_name, read_json, write_json};
use tracing::{debug, info};

/// What currently lives in a bill directory.
#[derive(Debug, Clone, PartialEq)]
pub enum BillEntry {
    Bill(BillMetadata),
    Placeholder(PlaceholderMarker),
}

impl BillEntry {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::Bill(bill) => &bill.identifier,
            Self::Placeholder(marker) => &marker.identifier,
        }
    }
}

/// Typed access to bill directories in a store.
pub struct Entities<'a> {
    store: &'a dyn Store,
    layout: &'a Layout,
}

impl<'a> Entities<'a> {
    pub fn new(store: &'a dyn Store, layout: &'a Layout) -> Self {
        Self { store, layout }
    }

    /// Read the entry at `bill_dir`. `metadata.json` wins over a stale `placeholder.json`.
    pub fn load(&self, bill_dir: &str) -> Result<Option<BillEntry>> {
        if let Some(bill) = read_json::<BillMetadata>(self.store, &self.layout.metadata(bill_dir))? {
            return Ok(Some(BillEntry::Bill(bill)));
        }
        Ok(read_json::<PlaceholderMarker>(self.store, &self.layout.placeholder(bill_dir))?
            .map(BillEntry::Placeholder))
    }

    pub fn write_bill(&self, bill_dir: &str, bill: &BillMetadata) -> Result<()> {
        write_json(self.store, &self.layout.metadata(bill_dir), bill)
    }

    /// Create a placeholder unless the directory already holds an entry.
    /// Returns whether one was created.
    pub fn ensure_placeholder(&self, bill_dir: &str, identifier: &str) -> Result<bool> {
        if self.load(bill_dir)?.is_some() {
            return Ok(false);
        }
        write_json(
            self.store,
            &self.layout.placeholder(bill_dir),
            &PlaceholderMarker::new(identifier),
        )?;
        debug!(bill_dir, identifier, "created placeholder");
        Ok(true)
    }

    /// Turn the placeholder at `bill_dir` into `bill`. Logs already in the
    /// directory stay where they are.
    pub fn promote(&self, bill_dir: &str, bill: &BillMetadata) -> Result<()> {
        self.write_bill(bill_dir, bill)?;
        self.store.delete(&self.layout.placeholder(bill_dir))?;
        info!(bill_dir, identifier = %bill.identifier, "promoted placeholder");
        Ok(())
    }

    /// Move the logs of the placeholder at `from_dir` under the bill at
    /// `to_dir` and remove the placeholder. Returns the number of logs moved.
    ///
    /// A log already present at the destination is kept as is.
    pub fn reparent(&self, from_dir: &str, to_dir: &str) -> Result<usize> {
        match self.load(to_dir)? {
            Some(BillEntry::Bill(_)) => {}
            _ => {
                return Err(LegisyncError::Storage(format!(
                    "cannot reparent {from_dir}: no bill at {to_dir}"
                )));
            }
        }

        let mut moved = 0;
        for key in self.store.list(&self.layout.logs_dir(from_dir))? {
            let dest = self.layout.log_file(to_dir, key_name(&key));
            if !self.store.exists(&dest)? {
                if let Some(bytes) = self.store.get(&key)? {
                    self.store.put(&dest, &bytes)?;
                    moved += 1;
                }
            }
        }
        self.store.delete_prefix(from_dir)?;
        info!(from_dir, to_dir, moved, "reparented placeholder logs");
        Ok(moved)
    }

    /// Names of the log files in a bill directory.
    pub fn log_names(&self, bill_dir: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .list(&self.layout.logs_dir(bill_dir))?
            .iter()
            .map(|k| key_name(k).to_string())
            .collect())
    }
}
