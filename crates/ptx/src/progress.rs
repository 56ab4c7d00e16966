//! 📊 progress.rs: "Are we there yet?", now thread-safe.
//!
//! 🚀 Two things live here:
//! - [`ImportProgress`]: the shared scoreboard every mini-batch task writes into. Documents
//!   imported, request charge burned, and the big red cancel button. Lock-free, because
//!   a dozen tasks fighting over a Mutex to add `40` to a number is not a good look.
//! - [`ProgressMetrics`]: the terminal progress bar + comfy table that reads the scoreboard.
//!
//! ⚠️  Watching the progress bar will not make the partition accept documents faster.
//! Neither will refreshing it. We've tried. The store says 429.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

/// 🏁 The scoreboard shared by every task of one partition inserter.
///
/// Counters only go up. `cancelled` only goes false → true. Reads are best-effort live
/// values, not a snapshot: two reads in a row can straddle somebody else's increment.
#[derive(Debug, Default)]
pub struct ImportProgress {
    documents_imported: AtomicU64,
    /// 💸 f64 stored as its bit pattern, because std has no AtomicF64 and we refuse to lock.
    request_charge_bits: AtomicU64,
    cancelled: AtomicBool,
}

impl ImportProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// ✅ Credit one successful call. Each counter bump is atomic on its own.
    pub fn record(&self, documents: u64, request_charge: f64) {
        self.documents_imported.fetch_add(documents, Ordering::Relaxed);
        self.add_request_charge(request_charge);
    }

    fn add_request_charge(&self, request_charge: f64) {
        // -- 🔁 CAS loop: read bits, add, try to swap. somebody beat us? read again. classic.
        // -- fetch_update only errs when the closure returns None, and ours never does.
        let _ = self
            .request_charge_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + request_charge).to_bits())
            });
    }

    pub fn documents_imported(&self) -> u64 {
        self.documents_imported.load(Ordering::Relaxed)
    }

    pub fn request_charge(&self) -> f64 {
        f64::from_bits(self.request_charge_bits.load(Ordering::Acquire))
    }

    /// 🛑 Pull the kill switch. Returns `true` only for the caller that actually flipped it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// 🔢 Formats a number with commas for the 3 people in the audience who like readability.
/// "1000000 docs" → "1,000,000 docs". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, you should probably call your mom. It's been a while.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📡 Throughput over the sliding window. A speedometer for documents and request charge.
struct Rates {
    docs_per_sec: f64,
    charge_per_sec: f64,
}

/// 📊 Renders an [`ImportProgress`] as a progress bar with a comfy table on top.
///
/// Uses a sliding 5-second window for rates so one lucky call that landed 5,000 docs
/// doesn't make the numbers look like a seismograph.
///
/// # Ancient Proverb
/// "He who imports without a progress bar, imports alone and in darkness."
pub(crate) struct ProgressMetrics {
    /// 🏷️ which partition key range we're watching
    partition_key_range_id: String,
    /// 📏 documents we were handed in total
    documents_total: u64,
    progress_bar: ProgressBar,
    /// 🔄 sliding window of (timestamp, docs, charge)
    rate_samples: VecDeque<(Instant, u64, f64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug. we leave it out of the photo.
        f.debug_struct("ProgressMetrics")
            .field("partition_key_range_id", &self.partition_key_range_id)
            .field("documents_total", &self.documents_total)
            .finish()
    }
}

impl ProgressMetrics {
    pub(crate) fn new(partition_key_range_id: String, documents_total: u64) -> Self {
        let progress_bar = ProgressBar::new(documents_total);
        // -- 🎨 cyan because it's classy, blue because it's calm. template is static, so if it
        // -- ever fails to parse we fall back to the stock style instead of panicking.
        let style = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        progress_bar.set_style(style);

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        // -- 🔄 seed the window with t=0 so we don't divide by zero like animals
        rate_samples.push_back((start_time, 0u64, 0.0f64));

        Self {
            partition_key_range_id,
            documents_total,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 Take a fresh look at the scoreboard and redraw.
    pub(crate) fn observe(&mut self, progress: &ImportProgress) {
        let documents_imported = progress.documents_imported();
        let request_charge = progress.request_charge();
        let rates = self.calculate_rates(documents_imported, request_charge);
        self.render(documents_imported, request_charge, rates, progress.is_cancelled());
        self.progress_bar.set_position(documents_imported);
    }

    /// ✅ Ring the bell. Or the funeral bell. Either way, the bar stops moving.
    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    fn calculate_rates(&mut self, documents_imported: u64, request_charge: f64) -> Rates {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        // -- 🚪 evict samples older than the window, like a bouncer at a club but for data points
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples
            .push_back((now, documents_imported, request_charge));

        if let Some(&(oldest_time, oldest_docs, oldest_charge)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                return Rates {
                    docs_per_sec: documents_imported.saturating_sub(oldest_docs) as f64 / elapsed,
                    charge_per_sec: (request_charge - oldest_charge).max(0.0) / elapsed,
                };
            }
        }

        // -- 💤 not enough elapsed time yet. zeros, and maintain composure.
        Rates {
            docs_per_sec: 0.0,
            charge_per_sec: 0.0,
        }
    }

    /// 🎨 Layout (3 rows x 2 cols):
    /// ```text
    /// | partition key range: <id>
    ///   <docs/s>       <imported / total>
    ///   <charge/s>     <total charge>
    ///   <elapsed>      <remaining | CANCELLED>
    /// | [=====>----------]
    /// ```
    fn render(&self, documents_imported: u64, request_charge: f64, rates: Rates, cancelled: bool) {
        let percent = if self.documents_total > 0 {
            (documents_imported as f64 / self.documents_total as f64) * 100.0
        } else {
            0.0
        };

        let elapsed = self.start_time.elapsed();
        let remaining = if cancelled {
            // -- 💀 no ETA for the dead
            "CANCELLED".to_string()
        } else if percent > 0.0 {
            // 🔮 linear extrapolation. assumes the future looks like the past, and the
            // partition stops throttling us. bold assumptions, both.
            let total_estimated = elapsed.as_secs_f64() / (percent / 100.0);
            let remaining_secs = total_estimated - elapsed.as_secs_f64();
            if remaining_secs > 0.0 {
                format!("{} remaining", format_duration(Duration::from_secs_f64(remaining_secs)))
            } else {
                "--:-- remaining".to_string()
            }
        } else {
            "--:-- remaining".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(rates.docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {} Docs ({:.2}%)",
                format_number(documents_imported),
                format_number(self.documents_total),
                percent
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} RU/s", rates.charge_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2} RU", request_charge)).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(remaining).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar.set_message(format!(
            "partition key range: {}\n{}",
            self.partition_key_range_id, table
        ));
    }
}
