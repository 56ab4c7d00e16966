//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where mini-batches queue endlessly..."
//! 🎬 "One supervisor dared to run them all. In parallel. With a cap."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor: part middle manager, part helicopter parent. It takes the tasks a
//! [`PartitionInserter`] hands out, drops them into a bounded channel, and lets
//! `parallelism` workers pull from it. While they toil, it stares at the progress
//! scoreboard and redraws the bar. When they're done, it writes the report card.
//!
//! 🧠 Knowledge graph:
//! - the inserter decides WHAT happens to a mini-batch; the supervisor decides WHEN
//! - one fatal task cancels the inserter; the other workers notice and stop pulling
//! - the first abort (with partial metrics) is the error returned, after everyone has stopped
//! - a cancelled inserter never gets a success summary, even when no task of ours tripped it

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_channel::Receiver;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app_config::RuntimeConfig;
use crate::common::InsertMetrics;
use crate::faults::MiniBatchAborted;
use crate::inserter::{MiniBatchTask, PartitionInserter};
use crate::progress::{ImportProgress, ProgressMetrics};

const PROGRESS_REFRESH_INTERVAL: Duration = Duration::from_millis(250);

/// 📋 The report card for one partition import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub partition_key_range_id: String,
    pub documents_total: u64,
    pub documents_imported: u64,
    pub request_charge: f64,
    /// 🧮 Merged metrics of every mini-batch that was fully drained.
    pub metrics: InsertMetrics,
    pub mini_batches_completed: usize,
}

/// 🧵 What one worker brought home.
#[derive(Debug, Default)]
struct WorkerReport {
    completed: Vec<InsertMetrics>,
    aborted: Vec<MiniBatchAborted>,
    /// 🛑 Tasks that saw the cancel flag before their last document went in.
    stopped_early: usize,
}

/// 📦 Runs a partition inserter's tasks with bounded parallelism.
#[derive(Debug, Clone)]
pub struct ImportSupervisor {
    runtime: RuntimeConfig,
}

impl ImportSupervisor {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self { runtime }
    }

    /// 🚀 Run every mini-batch of `inserter` to completion (or to the first fatal error).
    pub async fn run(&self, inserter: &PartitionInserter) -> Result<ImportSummary> {
        let pki = inserter.partition_key_range_id().to_string();
        let parallelism = self.runtime.parallelism.max(1);
        info!(
            "🚀 pki {} importing {} documents in {} mini batches with {} workers",
            pki,
            inserter.documents_total(),
            inserter.mini_batch_count(),
            parallelism
        );

        // -- 📬 the whole queue fits, so pushing never waits on a worker
        let (tx, rx) = async_channel::bounded(inserter.mini_batch_count().max(1));
        for task in inserter.mini_batch_tasks() {
            tx.send(task)
                .await
                .context("💀 The task queue closed before we finished filling it. Nobody was supposed to be able to do that.")?;
        }
        tx.close();

        let (done_tx, done_rx) = watch::channel(false);
        let display = self
            .runtime
            .show_progress
            .then(|| spawn_progress_display(&pki, inserter.documents_total(), inserter.progress(), done_rx));

        let workers: Vec<JoinHandle<WorkerReport>> = (0..parallelism)
            .map(|worker_id| tokio::spawn(run_worker(worker_id, rx.clone(), inserter.progress())))
            .collect();
        drop(rx);

        let mut completed = Vec::new();
        let mut aborted = Vec::new();
        let mut stopped_early = 0;
        for joined in join_all(workers).await {
            let report = joined.context("💀 A worker panicked. It was doing its best. Its best was a panic.")?;
            completed.extend(report.completed);
            aborted.extend(report.aborted);
            stopped_early += report.stopped_early;
        }

        let _ = done_tx.send(true);
        if let Some(display) = display {
            // -- 🎨 a crashed progress bar is not worth failing an import over
            if let Err(err) = display.await {
                warn!("⚠️ progress display task ended badly: {}", err);
            }
        }

        if let Some(first) = aborted.into_iter().next() {
            return Err(anyhow::Error::new(first)).context(format!(
                "💀 Import of partition key range {} stopped early. {} documents made it in before the lights went out.",
                pki,
                inserter.documents_imported()
            ));
        }

        // -- 🛑 cancelled from outside, or tasks stopped at their cancel check without tripping it
        if inserter.is_cancelled() {
            bail!(
                "💀 Import of partition key range {} was cancelled with {} of {} documents imported \
                 ({} mini batches stopped early). A cancelled importer stays cancelled, \
                 please retry shortly after re-initializing the importer.",
                pki,
                inserter.documents_imported(),
                inserter.documents_total(),
                stopped_early
            );
        }

        let summary = ImportSummary {
            partition_key_range_id: pki,
            documents_total: inserter.documents_total(),
            documents_imported: inserter.documents_imported(),
            request_charge: inserter.request_charge(),
            metrics: InsertMetrics::merge(&completed),
            mini_batches_completed: completed.len(),
        };
        info!(
            "✅ pki {} done: {} of {} documents, {:.2} RU, {} throttles",
            summary.partition_key_range_id,
            summary.documents_imported,
            summary.documents_total,
            summary.request_charge,
            summary.metrics.throttle_count
        );
        Ok(summary)
    }
}

/// 🧵 Pull tasks until the queue is empty or the inserter is cancelled.
async fn run_worker(
    worker_id: usize,
    rx: Receiver<MiniBatchTask>,
    progress: Arc<ImportProgress>,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    while let Ok(task) = rx.recv().await {
        if progress.is_cancelled() {
            debug!("🛑 worker {} sees the cancel flag, leaving the rest of the queue alone", worker_id);
            break;
        }
        let expected = task.len() as u64;
        match task.run().await {
            Ok(metrics) if metrics.documents_inserted == expected => report.completed.push(metrics),
            Ok(metrics) => {
                debug!(
                    "🛑 worker {} task stopped at {} of {} documents",
                    worker_id, metrics.documents_inserted, expected
                );
                report.stopped_early += 1;
            }
            Err(aborted) => report.aborted.push(aborted),
        }
    }
    debug!("🏁 worker {} clocking out", worker_id);
    report
}

/// 📊 Redraw the bar every tick until told to stop.
fn spawn_progress_display(
    pki: &str,
    documents_total: u64,
    progress: Arc<ImportProgress>,
    mut done: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut display = ProgressMetrics::new(pki.to_string(), documents_total);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => display.observe(&progress),
                changed = done.changed() => {
                    if changed.is_err() || *done.borrow() {
                        break;
                    }
                }
            }
        }
        display.observe(&progress);
        display.finish();
    })
}
