use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dom::AnnotationReport;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ControllerStatus {
    #[default]
    Idle,
    Scanning,
    /// The messaging channel is gone; nothing runs again on this page.
    ExtensionInvalid,
}

/// Last batch sent for conversion, and what came back for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSnapshot {
    pub batch: String,
    pub converted: Option<String>,
}

impl ScanSnapshot {
    pub fn new(batch: String) -> Self {
        Self {
            batch,
            converted: None,
        }
    }

    pub fn matches(&self, batch: &str) -> bool {
        self.batch == batch
    }
}

/// How one pass of [`MutationController::process_page`] ended.
///
/// [`MutationController::process_page`]: super::MutationController::process_page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Disabled, already scanning, or invalidated.
    Skipped,
    /// No in-scope text on the page.
    NothingToConvert,
    /// Same batch as last time; the cached conversion was re-applied.
    Unchanged(AnnotationReport),
    Annotated(AnnotationReport),
    /// A toggle arrived while waiting on the service; result dropped.
    Discarded,
    Failed(String),
    Invalidated,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStats {
    pub scans: u64,
    pub conversions: u64,
    pub annotated_nodes: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerSnapshot {
    pub status: ControllerStatus,
    pub enabled: bool,
    pub observing: bool,
    pub stats: ControllerStats,
}
