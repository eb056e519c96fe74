//! Batch operations: bulk loading, byte-pattern scanning, raw export.
//!
//! These compose the workspace's loading primitives with the
//! [`JobRunner`]: each file is one job, failures are isolated per file,
//! and the caller receives a success count plus a capped failure list
//! rather than an unbounded dump (or one error aborting the whole batch).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::warn;
use memchr::memmem;

use crate::error::{BundleError, Result};
use crate::events::WorkspaceEvent;
use crate::item::{ItemId, ItemKind};
use crate::jobs::{BatchOptions, BatchReport, CancelToken, Job, JobRunner};
use crate::record::AssetRecord;
use crate::workspace::Workspace;

/// Upper bound on individually-reported failures per batch. The failed
/// count is always exact; only the detailed list is capped.
pub const MAX_REPORTED_FAILURES: usize = 16;

/// The caller-facing result of a batch operation.
#[derive(Debug)]
pub struct BatchSummary {
    /// Number of jobs that succeeded.
    pub succeeded: usize,
    /// Number of jobs that failed (including cancelled ones).
    pub failed: usize,
    /// Up to [`MAX_REPORTED_FAILURES`] (label, error) pairs.
    pub failures: Vec<(String, BundleError)>,
}

/// Matches of one byte-pattern scan within one root item.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The containing root item.
    pub item: ItemId,
    /// Its display name at scan time.
    pub name: String,
    /// Byte offsets of every match within the item's stream.
    pub offsets: Vec<u64>,
}

/// The result of one byte-pattern scan: the hits plus the batch outcome,
/// so "no hits" and "the scans failed or were cancelled" stay
/// distinguishable.
#[derive(Debug)]
pub struct SearchReport {
    /// Hits in ascending item-id order.
    pub hits: Vec<SearchHit>,
    /// Per-file success/failure accounting for the scan jobs.
    pub summary: BatchSummary,
}

/// Opens many files with bounded parallelism. A file that fails to open
/// (unreadable, unrecognized) is recorded and the rest of the batch
/// continues; every successfully opened file is fully usable afterwards.
pub fn load_batch(
    workspace: &Arc<Workspace>,
    paths: &[PathBuf],
    runner: &JobRunner,
    opts: &BatchOptions<'_>,
) -> Result<BatchSummary> {
    let labels: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    let jobs: Vec<Job> = paths
        .iter()
        .map(|path| {
            let workspace = Arc::clone(workspace);
            let path = path.clone();
            Box::new(move |cancel: &CancelToken| {
                if cancel.is_cancelled() {
                    return Err(BundleError::Cancelled);
                }
                workspace.open_path(&path).map(|_| ())
            }) as Job
        })
        .collect();

    let report = run_with_progress_events(workspace, runner, jobs, opts)?;
    Ok(summarize(workspace, report, &labels))
}

/// Scans every open root item's byte stream for `pattern`, with one job
/// per file and cancellation checked between files. Hits come back sorted
/// by ascending item id, alongside the per-file failure accounting. An
/// empty pattern matches nothing.
pub fn search_bytes(
    workspace: &Arc<Workspace>,
    pattern: &[u8],
    runner: &JobRunner,
    opts: &BatchOptions<'_>,
) -> Result<SearchReport> {
    if pattern.is_empty() {
        warn!("empty search pattern, nothing to scan");
        return Ok(SearchReport {
            hits: Vec::new(),
            summary: BatchSummary {
                succeeded: 0,
                failed: 0,
                failures: Vec::new(),
            },
        });
    }

    let roots = workspace.roots();
    let pattern: Arc<Vec<u8>> = Arc::new(pattern.to_vec());
    let hits: Arc<Mutex<Vec<SearchHit>>> = Arc::new(Mutex::new(Vec::new()));

    let jobs: Vec<Job> = roots
        .iter()
        .map(|root| {
            let root = Arc::clone(root);
            let pattern = Arc::clone(&pattern);
            let hits = Arc::clone(&hits);
            Box::new(move |cancel: &CancelToken| {
                if cancel.is_cancelled() {
                    return Err(BundleError::Cancelled);
                }
                let source = match root.kind() {
                    ItemKind::Container(c) => c.source(),
                    ItemKind::Serialized(f) => f.source(),
                    ItemKind::Resource(r) => r.source(),
                };
                let offsets: Vec<u64> = memmem::find_iter(source.bytes(), &*pattern)
                    .map(|pos| pos as u64)
                    .collect();
                if !offsets.is_empty() {
                    hits.lock().unwrap_or_else(|p| p.into_inner()).push(SearchHit {
                        item: root.id(),
                        name: root.name(),
                        offsets,
                    });
                }
                Ok(())
            }) as Job
        })
        .collect();

    let report = run_with_progress_events(workspace, runner, jobs, opts)?;
    let labels: Vec<String> = roots.iter().map(|r| r.name()).collect();
    let summary = summarize(workspace, report, &labels);

    let mut found = match Arc::try_unwrap(hits) {
        Ok(mutex) => mutex.into_inner().unwrap_or_else(|p| p.into_inner()),
        Err(shared) => shared.lock().unwrap_or_else(|p| p.into_inner()).clone(),
    };
    found.sort_by_key(|hit| hit.item);
    Ok(SearchReport {
        hits: found,
        summary,
    })
}

/// The raw-bytes view of one object: its pending replacement if an edit is
/// staged, otherwise its on-disk byte range. The primitive behind
/// export/dump commands.
pub fn export_raw(record: &AssetRecord) -> Result<Vec<u8>> {
    record.raw_bytes()
}

/// Runs the batch, mirroring every (throttled) progress callback to the
/// workspace's event sink on top of the caller's own callback.
fn run_with_progress_events(
    workspace: &Arc<Workspace>,
    runner: &JobRunner,
    jobs: Vec<Job>,
    opts: &BatchOptions<'_>,
) -> Result<BatchReport> {
    let progress = |fraction: f32| {
        workspace
            .event_sink()
            .post(WorkspaceEvent::Progress(fraction));
        if let Some(callback) = opts.progress {
            callback(fraction);
        }
    };
    let wired = BatchOptions {
        progress: Some(&progress),
        on_complete: opts.on_complete,
        cancel: opts.cancel,
    };
    runner.run(jobs, &wired)
}

/// Builds the capped summary and posts the batch-finished event.
fn summarize(
    workspace: &Arc<Workspace>,
    report: BatchReport,
    labels: &[String],
) -> BatchSummary {
    let succeeded = report.succeeded.len();
    let failed = report.failed.len();
    let failures = report
        .failed
        .into_iter()
        .take(MAX_REPORTED_FAILURES)
        .map(|(index, error)| {
            let label = labels
                .get(index)
                .cloned()
                .unwrap_or_else(|| format!("job {index}"));
            (label, error)
        })
        .collect();
    workspace
        .event_sink()
        .post(WorkspaceEvent::BatchFinished { succeeded, failed });
    BatchSummary {
        succeeded,
        failed,
        failures,
    }
}
