//! Run summary printed as JSON at the end of every run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use legisync_shared::{LegisyncError, Result, RunId};

use crate::context::RunContext;
use crate::extraction::ExtractionStats;
use crate::orphans::OrphanReport;
use crate::reconcile::ReconcileStats;

/// Which pass a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Reconcile,
    Extract,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reconcile => "reconcile",
            Self::Extract => "extract",
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure scoped to one entity. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityError {
    pub entity: String,
    pub kind: String,
    pub message: String,
}

impl EntityError {
    pub fn new(entity: impl Into<String>, error: &LegisyncError) -> Self {
        Self {
            entity: entity.into(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Raw input counters of a reconcile run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputStats {
    pub loaded: usize,
    pub invalid: usize,
    pub ignored: usize,
    /// Objects already covered by the watermark.
    pub below_watermark: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub mode: RunMode,
    pub incremental: bool,
    pub jurisdiction: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_before: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orphans: Option<OrphanReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionStats>,
    pub errors: Vec<EntityError>,
}

impl RunSummary {
    pub fn new(mode: RunMode, incremental: bool, jurisdiction: String, ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id,
            mode,
            incremental,
            jurisdiction,
            started_at: ctx.started_at,
            finished_at: None,
            watermark_before: None,
            watermark_after: None,
            input: None,
            reconcile: None,
            orphans: None,
            extraction: None,
            errors: Vec::new(),
        }
    }

    /// Pretty JSON for stdout.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LegisyncError::json("run summary", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_json_shape() {
        let ctx = RunContext::system();
        let mut summary = RunSummary::new(RunMode::Extract, true, "country:us/state:wy".into(), &ctx);
        summary.errors.push(EntityError::new(
            "bill HB 1",
            &LegisyncError::missing_file("https://example.test/HB1.pdf"),
        ));

        let value: serde_json::Value = serde_json::from_str(&summary.to_json().unwrap()).unwrap();
        assert_eq!(value["mode"], "extract");
        assert_eq!(value["incremental"], true);
        assert_eq!(value["run_id"], ctx.run_id.to_string());
        assert_eq!(value["errors"][0]["kind"], "missing_file");
        assert!(value.get("reconcile").is_none());
        assert!(value.get("watermark_after").is_none());
    }
}
