//! 💥 Faults: the taxonomy of "no".
//!
//! 🎬 *[INT. PARTITION SERVER. 2:14 AM. A 429 is returned. Then another. Then a 410.]*
//! *["Is it a split?" the engineer asks. The sub-status code knows. It always knew.]*
//!
//! A remote bulk-insert call can fail in a handful of ways and only the status fields
//! tell them apart. This module turns those fields into a closed set of [`FaultClass`]
//! values with one pure function, and defines the errors the driver hands back
//! when it gives up on a partition.
//!
//! 🧠 Knowledge graph:
//! - [`RemoteFault`]: what the store said, normalized (status, sub-status, retry hint, text)
//! - [`classify`] / [`classify_error`]: status fields → [`FaultClass`]. No I/O, no state.
//! - [`PartitionImportError`]: the fatal endings, each naming the partition key range
//! - [`MiniBatchAborted`]: a fatal ending plus the partial metrics we still owe the caller
//!
//! 🦆 (the duck has been throttled. it will retry after 200ms.)

use std::time::Duration;

use thiserror::Error;

use crate::common::InsertMetrics;

/// 🚦 Too many requests. The store wants us to go sit in the corner for `retry_after`.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;
/// ⏱️ The call ran out of time server-side. Work may be half-done.
pub const STATUS_REQUEST_TIMEOUT: u16 = 408;
/// 👻 The partition is not where we left it.
pub const STATUS_GONE: u16 = 410;
/// 🪓 Sub-status on a 410 meaning the partition is mid-split.
pub const SUB_STATUS_SPLITTING: u32 = 1007;

/// 📡 A failure reported by the remote store, flattened to the fields we classify on.
///
/// Backends wrap this in an `anyhow::Error` so it can travel through `?` like everything
/// else, and the driver fishes it back out with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("remote store answered {status_code} (sub-status {sub_status_code:?}): {message}")]
pub struct RemoteFault {
    pub status_code: u16,
    pub sub_status_code: Option<u32>,
    /// ⏳ Server-specified wait before the next attempt. Only meaningful on a 429.
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl RemoteFault {
    /// 🏗️ A fault with just a status and a message. Sub-status and retry hint left empty.
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            sub_status_code: None,
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn with_sub_status(mut self, sub_status_code: u32) -> Self {
        self.sub_status_code = Some(sub_status_code);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// 🗂️ Every way a remote call can fail, as far as the driver cares.
///
/// `Throttled` and `TimedOut` are retried in place. The rest end the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Throttled { retry_after: Duration },
    TimedOut,
    Splitting,
    Gone,
    Other,
}

/// 🧮 Map a remote fault onto the taxonomy. Pure function. Same input, same answer, forever.
///
/// A 429 without a retry hint waits zero, which means "retry right away". The store
/// forgot to tell us how long to wait, so we don't make up a number.
pub fn classify(fault: &RemoteFault) -> FaultClass {
    match fault.status_code {
        STATUS_TOO_MANY_REQUESTS => FaultClass::Throttled {
            retry_after: fault.retry_after.unwrap_or(Duration::ZERO),
        },
        STATUS_REQUEST_TIMEOUT => FaultClass::TimedOut,
        STATUS_GONE if fault.sub_status_code == Some(SUB_STATUS_SPLITTING) => FaultClass::Splitting,
        STATUS_GONE => FaultClass::Gone,
        _ => FaultClass::Other,
    }
}

/// 🕵️ Classify an arbitrary error. `None` means "not a remote fault at all", which the
/// driver files under unexpected local errors.
pub fn classify_error(err: &anyhow::Error) -> Option<FaultClass> {
    err.downcast_ref::<RemoteFault>().map(classify)
}

/// 💀 Why a partition import stopped for good.
///
/// Every message names the partition key range so the poor soul reading the logs knows
/// which one to reinitialize.
#[derive(Debug, Error)]
pub enum PartitionImportError {
    #[error(
        "partition key range {partition_key_range_id} is undergoing split, please retry shortly after re-initializing the importer"
    )]
    Splitting { partition_key_range_id: String },

    #[error(
        "partition key range {partition_key_range_id} is gone, please retry shortly after re-initializing the importer"
    )]
    Gone { partition_key_range_id: String },

    #[error(
        "partition key range {partition_key_range_id}: bulk-insert procedure returned failure {error_code} and inserted nothing"
    )]
    ProcedureRejected {
        partition_key_range_id: String,
        error_code: i64,
    },

    #[error(
        "partition key range {partition_key_range_id}: no response after {attempts} consecutive attempts"
    )]
    EmptyResponsesExhausted {
        partition_key_range_id: String,
        attempts: u32,
    },

    #[error(
        "partition key range {partition_key_range_id} failed to import mini-batch, status code was {}",
        .fault.status_code
    )]
    Remote {
        partition_key_range_id: String,
        #[source]
        fault: RemoteFault,
    },

    #[error("partition key range {partition_key_range_id} failed to import mini-batch: {source}")]
    Unexpected {
        partition_key_range_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl PartitionImportError {
    pub fn partition_key_range_id(&self) -> &str {
        match self {
            PartitionImportError::Splitting { partition_key_range_id }
            | PartitionImportError::Gone { partition_key_range_id }
            | PartitionImportError::ProcedureRejected { partition_key_range_id, .. }
            | PartitionImportError::EmptyResponsesExhausted { partition_key_range_id, .. }
            | PartitionImportError::Remote { partition_key_range_id, .. }
            | PartitionImportError::Unexpected { partition_key_range_id, .. } => {
                partition_key_range_id
            }
        }
    }

    /// 🔁 Topology changed under us. Throw the importer away and build a fresh one.
    pub fn needs_reinitialization(&self) -> bool {
        matches!(
            self,
            PartitionImportError::Splitting { .. } | PartitionImportError::Gone { .. }
        )
    }

    /// 🏗️ Turn a classified-fatal remote error (or a local one) into the matching variant.
    pub(crate) fn from_failure(partition_key_range_id: &str, err: anyhow::Error) -> Self {
        let partition_key_range_id = partition_key_range_id.to_string();
        match err.downcast::<RemoteFault>() {
            Ok(fault) => match classify(&fault) {
                FaultClass::Splitting => PartitionImportError::Splitting { partition_key_range_id },
                FaultClass::Gone => PartitionImportError::Gone { partition_key_range_id },
                _ => PartitionImportError::Remote {
                    partition_key_range_id,
                    fault,
                },
            },
            Err(err) => PartitionImportError::Unexpected {
                partition_key_range_id,
                source: err.into(),
            },
        }
    }
}

/// 🪦 A mini-batch that died with its boots on. Carries the metrics of what it did
/// manage to insert, because partial credit is still credit.
#[derive(Debug, Error)]
#[error(
    "mini-batch aborted on partition key range {} after inserting {} documents",
    .error.partition_key_range_id(),
    .partial.documents_inserted
)]
pub struct MiniBatchAborted {
    pub partial: InsertMetrics,
    #[source]
    pub error: PartitionImportError,
}
