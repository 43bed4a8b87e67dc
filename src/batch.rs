use crate::models::{Catalog, FailureRecord};
use crate::paths::ArchivePaths;
use crate::pipeline::{process_item, write_file_atomic, ItemOutcome, PipelineContext};
use crate::{EngineError, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Failures of one run keyed by item id; a later failure for the same id
/// replaces the earlier one.
pub type FailureLog = BTreeMap<String, FailureRecord>;

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub failure_log_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    /// 1-based position across all collections.
    pub index: usize,
    pub total: usize,
    pub collection: &'a str,
    pub item_id: &'a str,
}

/// File-based stop request, polled between items.
#[derive(Debug, Clone)]
pub struct StopRequest {
    path: PathBuf,
}

impl StopRequest {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes a request left over from an earlier run. Returns whether one
    /// was found.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(EngineError::storage(&self.path, e)),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.path.exists()
    }
}

/// Runs every catalog item through the pipeline in catalog order.
///
/// Per-item failures are collected, never propagated. The failure log is
/// written once at the end, also when the run is cancelled part-way, and only
/// if at least one item failed.
pub fn run_batch<FShouldCancel, FSetProgress, FLog>(
    ctx: &PipelineContext<'_>,
    catalog: &Catalog,
    mut should_cancel: FShouldCancel,
    mut set_progress: FSetProgress,
    mut log_line: FLog,
) -> Result<BatchSummary>
where
    FShouldCancel: FnMut() -> bool,
    FSetProgress: FnMut(BatchProgress<'_>),
    FLog: FnMut(&str, &str, Value),
{
    ctx.paths
        .ensure_dirs()
        .map_err(|e| EngineError::storage(&ctx.paths.base_dir, e))?;

    let total = catalog.total_items();
    let mut failures = FailureLog::new();
    let mut summary = BatchSummary {
        total,
        processed: 0,
        downloaded: 0,
        skipped: 0,
        failed: 0,
        cancelled: false,
        failure_log_path: None,
    };

    log_line(
        "info",
        "batch_started",
        json!({
            "collections": catalog.collections.len(),
            "items": total,
            "output_dir": ctx.paths.base_dir.to_string_lossy(),
        }),
    );

    'collections: for collection in &catalog.collections {
        log_line(
            "info",
            "collection_started",
            json!({"name": collection.name, "items": collection.item_list.len()}),
        );

        for item in &collection.item_list {
            if should_cancel() {
                summary.cancelled = true;
                log_line(
                    "info",
                    "batch_cancelled",
                    json!({"processed": summary.processed}),
                );
                break 'collections;
            }

            summary.processed += 1;
            set_progress(BatchProgress {
                index: summary.processed,
                total,
                collection: &collection.name,
                item_id: &item.id,
            });

            match process_item(ctx, &collection.name, item, &mut log_line) {
                ItemOutcome::Skipped(_) => {
                    summary.skipped += 1;
                    continue;
                }
                ItemOutcome::Downloaded(_) => summary.downloaded += 1,
                ItemOutcome::Failed(record) => {
                    failures.insert(record.metadata.id.clone(), record);
                }
            }
            ctx.sleeper.sleep(ctx.settings.item_delay());
        }
    }

    summary.failed = failures.len();
    if let Some(path) = write_failure_log(ctx.paths, &failures)? {
        summary.failure_log_path = Some(path.to_string_lossy().to_string());
    }

    log_line(
        "info",
        "batch_finished",
        serde_json::to_value(&summary).unwrap_or(Value::Null),
    );
    Ok(summary)
}

/// Writes the failure log; nothing is written for an empty map.
pub fn write_failure_log(paths: &ArchivePaths, failures: &FailureLog) -> Result<Option<PathBuf>> {
    if failures.is_empty() {
        return Ok(None);
    }
    let path = paths.failure_log_path();
    let json = serde_json::to_string_pretty(failures)?;
    write_file_atomic(&path, format!("{json}\n").as_bytes())?;
    Ok(Some(path))
}

pub fn read_failure_log(paths: &ArchivePaths) -> Result<FailureLog> {
    let path = paths.failure_log_path();
    if !path.exists() {
        return Ok(FailureLog::new());
    }
    let bytes = std::fs::read(&path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CatalogItem;

    fn record(id: &str, error: &str) -> FailureRecord {
        FailureRecord {
            collection: "Saved".to_string(),
            error: error.to_string(),
            metadata: serde_json::from_value(json!({
                "id": id, "author": {"uniqueId": "a"}, "createTime": 0
            }))
            .expect("item"),
            video: None,
        }
    }

    #[test]
    fn stop_request_is_cleared_before_a_new_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ArchivePaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("dirs");
        let stop = StopRequest::new(paths.stop_file_path());

        assert!(!stop.clear().expect("nothing to clear"));
        std::fs::write(stop.path(), b"").expect("request stop");
        assert!(stop.is_requested());
        assert!(stop.clear().expect("clear"));
        assert!(!stop.is_requested());
    }

    #[test]
    fn empty_failure_map_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ArchivePaths::new(dir.path().to_path_buf());
        assert_eq!(write_failure_log(&paths, &FailureLog::new()).expect("ok"), None);
        assert!(!paths.failure_log_path().exists());
    }

    #[test]
    fn failure_log_is_keyed_by_item_id_and_omits_missing_video() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ArchivePaths::new(dir.path().to_path_buf());
        let mut failures = FailureLog::new();
        failures.insert("1".to_string(), record("1", "first"));
        failures.insert("1".to_string(), record("1", "second"));
        failures.insert("2".to_string(), record("2", "other"));

        let path = write_failure_log(&paths, &failures)
            .expect("write")
            .expect("path");
        let value: Value =
            serde_json::from_str(&std::fs::read_to_string(path).expect("read")).expect("json");
        let obj = value.as_object().expect("object");
        assert_eq!(obj.len(), 2);
        assert_eq!(obj["1"]["error"], json!("second"));
        assert_eq!(obj["1"]["collection"], json!("Saved"));
        assert!(obj["1"].get("video").is_none());

        let back = read_failure_log(&paths).expect("read back");
        let item: &CatalogItem = &back["2"].metadata;
        assert_eq!(item.id, "2");
    }
}
