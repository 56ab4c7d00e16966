//! 📦 common.rs: the shared vocabulary. Mini-batches in, metrics out.
//!
//! 🎬 *[a pile of JSON documents stands at the border of a partition.]*
//! *["Papers, please," says the slicer. "And no more than one mebibyte per group."]*
//!
//! Everything in here is plain data. No I/O, no locks, no feelings.

use std::sync::Arc;
use std::time::Duration;

/// 📦 One mini-batch: an ordered run of serialized documents headed for the same partition.
///
/// Wrapped in an `Arc` so the inserter and every task it hands out can look at the
/// same documents without copying them. Nobody writes to it after construction.
pub type MiniBatch = Arc<Vec<String>>;

/// 📊 The final word on one drained mini-batch.
///
/// Built exactly once, when the task finishes or gives up. Never touched again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertMetrics {
    /// ✅ Documents the store confirmed for this mini-batch.
    pub documents_inserted: u64,
    /// ⏱️ Wall clock from first attempt to last word.
    pub elapsed: Duration,
    /// 💸 Request charge billed for this mini-batch's calls.
    pub request_charge: f64,
    /// 🚦 How many times we got told to back off.
    pub throttle_count: u32,
}

impl InsertMetrics {
    pub fn new(
        documents_inserted: u64,
        elapsed: Duration,
        request_charge: f64,
        throttle_count: u32,
    ) -> Self {
        Self {
            documents_inserted,
            elapsed,
            request_charge,
            throttle_count,
        }
    }

    /// 🧮 Fold a bunch of metrics into one summary. Counts and charges add up.
    ///
    /// `elapsed` is the longest single mini-batch, not the sum: mini-batches may run side by
    /// side and adding their clocks would tell you the import took longer than it did.
    pub fn merge<'a>(all: impl IntoIterator<Item = &'a InsertMetrics>) -> Self {
        all.into_iter().fold(Self::default(), |acc, m| Self {
            documents_inserted: acc.documents_inserted + m.documents_inserted,
            elapsed: acc.elapsed.max(m.elapsed),
            request_charge: acc.request_charge + m.request_charge,
            throttle_count: acc.throttle_count + m.throttle_count,
        })
    }
}

/// ✂️ Slice documents into mini-batches that each stay under `max_mini_batch_size_bytes`.
///
/// Order is preserved. A document bigger than the budget on its own still gets a
/// mini-batch of its own. We don't split documents, we're not monsters.
/// Empty input means no mini-batches, not one empty one.
pub fn slice_into_mini_batches(
    documents: Vec<String>,
    max_mini_batch_size_bytes: usize,
) -> Vec<MiniBatch> {
    let mut mini_batches = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_size_bytes = 0usize;

    for document in documents {
        let document_size_bytes = document.len();
        // -- 🚪 would this doc push us over the budget? close the door on the current batch first
        if !current.is_empty() && current_size_bytes + document_size_bytes > max_mini_batch_size_bytes {
            mini_batches.push(Arc::new(std::mem::take(&mut current)));
            current_size_bytes = 0;
        }
        current_size_bytes += document_size_bytes;
        current.push(document);
    }

    if !current.is_empty() {
        mini_batches.push(Arc::new(current));
    }

    mini_batches
}
