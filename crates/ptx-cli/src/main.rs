//! 🚀 ptx: the front door, the bouncer, the maitre d' of partix.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin CLI wrapper: load config, set up logging, let the library do the heavy
//! lifting, then print a report card. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_FULL};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🚚 Bulk-import an NDJSON file into one partition key range.
#[derive(Debug, Parser)]
#[command(name = "ptx", version, about)]
struct Cli {
    /// 🔧 TOML config file. Env vars (PTX_*) are layered underneath it.
    #[arg(default_value = "ptx.toml")]
    config: PathBuf,
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the import (send it and pray 🙏)
/// 5. Print the summary, or the cause chain (cry)
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = cli.config.as_path();
    let config_file_if_it_exists = match config_file.try_exists().with_context(|| {
        format!(
            "💀 Couldn't even check whether the config file exists. Maybe a permissions thing, maybe a cwd thing. Was checking here: '{}'",
            config_file.display()
        )
    })? {
        true => Some(config_file),
        // -- 💤 no file: env vars only. we don't gatekeep.
        false => None,
    };

    let app_config = ptx::app_config::load_config(config_file_if_it_exists)
        .context("💀 In ptx, main, we couldn't load the config. Take a look at the file and the PTX_* env vars.")?;

    match ptx::run(app_config).await {
        Ok(summary) => {
            println!("{}", render_summary(&summary));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            let mut the_partition_moved = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("onnection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
                if cause_str.contains("re-initializing") {
                    the_partition_moved = true;
                }
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the store isn't reachable. Double-check the url in \
                     [procedure_config.Http] and that the service is actually running. ☕"
                );
            }
            if the_partition_moved {
                error!(
                    "🔧 hint: the partition split or went away. Refresh the partition key ranges, \
                     point the config at the new one(s) and run again. Documents already imported stay imported."
                );
            }

            std::process::exit(1);
        }
    }
}

/// 🍽️ The report card, as a comfy table.
fn render_summary(summary: &ptx::supervisors::ImportSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["partition key range", summary.partition_key_range_id.as_str()]);

    let rows = [
        (
            "documents imported",
            format!("{} / {}", summary.documents_imported, summary.documents_total),
        ),
        ("mini batches", summary.mini_batches_completed.to_string()),
        ("request charge", format!("{:.2} RU", summary.request_charge)),
        ("throttled", summary.metrics.throttle_count.to_string()),
        ("slowest mini batch", format!("{:.2?}", summary.metrics.elapsed)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
