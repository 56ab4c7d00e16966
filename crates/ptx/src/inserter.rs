//! 🎬 *[a partition waits. a pile of mini-batches approaches. the partition says 429.]*
//! *[the mini-batches sit down. they wait 200 milliseconds. they try again.]*
//! *[nobody asked for this bulk import. and yet, here we are.]*
//!
//! 🚚 The partition inserter: one partition key range, many mini-batches, one task per
//! mini-batch. Each task keeps calling the bulk-insert procedure with whatever is still
//! uninserted until the procedure has taken everything, or until something fatal happens
//! and the whole inserter is cancelled.
//!
//! 🧠 Knowledge graph:
//! - [`PartitionInserter`] owns the mini-batches and the shared [`ImportProgress`]
//! - [`PartitionInserter::mini_batch_tasks`] hands out one [`MiniBatchTask`] per mini-batch,
//!   lazily. Scheduling is the caller's job (see `supervisors`).
//! - [`MiniBatchTask::run`] is the retry loop:
//!   - 429 → count it, sleep the server's retry hint, try the same suffix again
//!   - 408 → switch to continue-on-timeout options, try again, no sleep
//!   - 410 split / 410 gone / other remote / local blunder → cancel everything, bail
//!   - empty reply → shrug, try again (optionally bounded, see `empty_response_retry_limit`)
//! - Cancellation is cooperative: checked once at the top of every loop iteration.
//!   A task stuck in a call or a throttle nap finishes that first, then notices.
//!
//! ⚠️ A cancelled inserter is done forever. Build a new one against fresh topology.
//! 🦆 (the duck was split into two ducks. please re-initialize the duck.)

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::common::{InsertMetrics, MiniBatch};
use crate::faults::{FaultClass, MiniBatchAborted, PartitionImportError, classify_error};
use crate::options::InsertOptions;
use crate::procedures::{BulkInsertProcedure, ProcedureTarget};
use crate::progress::ImportProgress;
use crate::response::parse_batch_insert_response;

/// 🚚 Drives every mini-batch of one partition key range into the store.
#[derive(Debug)]
pub struct PartitionInserter {
    target: Arc<ProcedureTarget>,
    mini_batches: Vec<MiniBatch>,
    procedure: Arc<dyn BulkInsertProcedure>,
    options: Arc<InsertOptions>,
    progress: Arc<ImportProgress>,
    /// 🔁 `None` keeps retrying blank replies forever. `Some(n)` gives up after n in a row.
    empty_response_retry_limit: Option<u32>,
}

impl PartitionInserter {
    pub fn new(
        partition_key_range_id: impl Into<String>,
        mini_batches: Vec<MiniBatch>,
        procedure: Arc<dyn BulkInsertProcedure>,
        procedure_link: impl Into<String>,
        options: InsertOptions,
    ) -> Self {
        Self {
            target: Arc::new(ProcedureTarget {
                procedure_link: procedure_link.into(),
                partition_key_range_id: partition_key_range_id.into(),
            }),
            mini_batches,
            procedure,
            options: Arc::new(options),
            progress: Arc::new(ImportProgress::new()),
            empty_response_retry_limit: None,
        }
    }

    /// 🔁 Give up on a mini-batch after `limit` blank replies in a row instead of looping forever.
    pub fn with_empty_response_retry_limit(mut self, limit: Option<u32>) -> Self {
        self.empty_response_retry_limit = limit;
        self
    }

    pub fn partition_key_range_id(&self) -> &str {
        &self.target.partition_key_range_id
    }

    /// 📊 Live scoreboard. Safe to read from anywhere, any time.
    pub fn progress(&self) -> Arc<ImportProgress> {
        Arc::clone(&self.progress)
    }

    pub fn documents_imported(&self) -> u64 {
        self.progress.documents_imported()
    }

    pub fn request_charge(&self) -> f64 {
        self.progress.request_charge()
    }

    pub fn is_cancelled(&self) -> bool {
        self.progress.is_cancelled()
    }

    pub fn mini_batch_count(&self) -> usize {
        self.mini_batches.len()
    }

    /// 📏 Every document this inserter was handed, across all mini-batches.
    pub fn documents_total(&self) -> u64 {
        self.mini_batches.iter().map(|b| b.len() as u64).sum()
    }

    /// 🏭 One task per mini-batch, built lazily as the caller pulls.
    ///
    /// Every task is `'static + Send`, so it can be spawned anywhere. They all share this
    /// inserter's progress and cancel switch.
    pub fn mini_batch_tasks(&self) -> impl Iterator<Item = MiniBatchTask> + '_ {
        self.mini_batches.iter().map(move |mini_batch| MiniBatchTask {
            target: Arc::clone(&self.target),
            mini_batch: Arc::clone(mini_batch),
            procedure: Arc::clone(&self.procedure),
            options: Arc::clone(&self.options),
            progress: Arc::clone(&self.progress),
            empty_response_retry_limit: self.empty_response_retry_limit,
        })
    }
}

/// 🧵 One deferred unit of work: drain one mini-batch.
#[derive(Debug)]
pub struct MiniBatchTask {
    target: Arc<ProcedureTarget>,
    mini_batch: MiniBatch,
    procedure: Arc<dyn BulkInsertProcedure>,
    options: Arc<InsertOptions>,
    progress: Arc<ImportProgress>,
    empty_response_retry_limit: Option<u32>,
}

/// 🧮 What a task has done so far. Turned into [`InsertMetrics`] exactly once.
struct DrainState {
    started: Instant,
    cursor: usize,
    request_charge: f64,
    throttle_count: u32,
    timed_out: bool,
    consecutive_empty_responses: u32,
}

impl DrainState {
    fn into_metrics(self) -> InsertMetrics {
        InsertMetrics::new(
            self.cursor as u64,
            self.started.elapsed(),
            self.request_charge,
            self.throttle_count,
        )
    }
}

impl MiniBatchTask {
    pub fn partition_key_range_id(&self) -> &str {
        &self.target.partition_key_range_id
    }

    pub fn len(&self) -> usize {
        self.mini_batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mini_batch.is_empty()
    }

    /// 🚀 Drain the mini-batch. Returns its metrics, or, on a fatal error, the metrics of
    /// whatever did get inserted wrapped in [`MiniBatchAborted`]. By the time an error
    /// comes back, the inserter is already cancelled.
    pub async fn run(self) -> Result<InsertMetrics, MiniBatchAborted> {
        let pki = self.partition_key_range_id();
        debug!("🚀 pki {} importing mini batch of {} documents started", pki, self.len());

        let mut state = DrainState {
            started: Instant::now(),
            cursor: 0,
            request_charge: 0.0,
            throttle_count: 0,
            timed_out: false,
            consecutive_empty_responses: 0,
        };

        match self.drain(&mut state).await {
            Ok(()) => {
                debug!(
                    "✅ pki {} mini batch done, {} of {} documents in",
                    pki,
                    state.cursor,
                    self.len()
                );
                Ok(state.into_metrics())
            }
            Err(error) => {
                if self.progress.cancel() {
                    warn!("🛑 pki {} cancelled, sibling mini batches will stop at their next check", pki);
                }
                error!("💀 {}", error);
                Err(MiniBatchAborted {
                    partial: state.into_metrics(),
                    error,
                })
            }
        }
    }

    async fn drain(&self, state: &mut DrainState) -> Result<(), PartitionImportError> {
        let pki = self.partition_key_range_id();
        // -- 🪄 derived once, used only after the first timeout. the base options never change.
        let continue_options = self.options.with_continue_on_timeout();

        while state.cursor < self.mini_batch.len() && !self.progress.is_cancelled() {
            let remaining = &self.mini_batch[state.cursor..];
            let options = if state.timed_out {
                &continue_options
            } else {
                self.options.as_ref()
            };

            debug!(
                "📦 pki {} trying to import {} documents from index {}",
                pki,
                remaining.len(),
                state.cursor
            );

            let call = self.procedure.execute(&self.target, remaining, options).await;

            let response = match call {
                Ok(response) => response,
                Err(err) => match classify_error(&err) {
                    Some(FaultClass::Throttled { retry_after }) => {
                        state.throttle_count += 1;
                        debug!("🚦 pki {} throttled, going to sleep for {:?}", pki, retry_after);
                        tokio::time::sleep(retry_after).await;
                        continue;
                    }
                    Some(FaultClass::TimedOut) => {
                        debug!("⏱️ pki {} request timed out, next attempt continues where it left off", pki);
                        state.timed_out = true;
                        continue;
                    }
                    _ => return Err(PartitionImportError::from_failure(pki, err)),
                },
            };

            let parsed = parse_batch_insert_response(&response.body).map_err(|err| {
                PartitionImportError::from_failure(pki, err)
            })?;

            let Some(result) = parsed else {
                state.consecutive_empty_responses += 1;
                warn!(
                    "🤷 pki {} failed to receive response ({} in a row), retrying the same {} documents",
                    pki,
                    state.consecutive_empty_responses,
                    remaining.len()
                );
                match self.empty_response_retry_limit {
                    Some(limit) if state.consecutive_empty_responses >= limit => {
                        return Err(PartitionImportError::EmptyResponsesExhausted {
                            partition_key_range_id: pki.to_string(),
                            attempts: state.consecutive_empty_responses,
                        });
                    }
                    _ => continue,
                }
            };
            state.consecutive_empty_responses = 0;

            if result.error_code != 0 {
                warn!("⚠️ pki {} received response error code {}", pki, result.error_code);
                if result.count == 0 {
                    return Err(PartitionImportError::ProcedureRejected {
                        partition_key_range_id: pki.to_string(),
                        error_code: result.error_code,
                    });
                }
            }

            // -- 📏 the cursor never walks past the end, whatever the server claims
            let inserted = match usize::try_from(result.count) {
                Ok(count) if count <= remaining.len() => count,
                _ => {
                    warn!(
                        "🤨 pki {} store claims {} documents but only {} were sent, clamping",
                        pki,
                        result.count,
                        remaining.len()
                    );
                    remaining.len()
                }
            };

            state.cursor += inserted;
            state.request_charge += response.request_charge;
            self.progress.record(inserted as u64, response.request_charge);
        }

        if self.progress.is_cancelled() && state.cursor < self.mini_batch.len() {
            debug!("🛑 pki {} noticed cancellation, stopping at index {}", pki, state.cursor);
        }
        Ok(())
    }
}
