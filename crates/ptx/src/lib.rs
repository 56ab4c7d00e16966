//! 🚚 partix: pour documents into one partition of a partitioned store, one mini-batch at a
//! time, and keep knocking politely when it says 429.
//!
//! The interesting part is [`inserter`]. Everything else exists so it can be run from a
//! config file without writing a main() yourself.

pub mod app_config;
pub mod common;
pub mod faults;
pub mod file_source;
pub mod inserter;
pub mod options;
pub mod procedures;
pub mod progress;
pub mod response;
pub mod supervisors;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::common::slice_into_mini_batches;
use crate::inserter::PartitionInserter;
use crate::procedures::ProcedureBackend;
use crate::supervisors::{ImportSummary, ImportSupervisor};

/// 🚀 Read, slice, insert, report. The whole pipeline for one partition key range.
pub async fn run(app_config: AppConfig) -> Result<ImportSummary> {
    let documents = file_source::read_documents(&app_config.source_config)
        .await
        .context("💀 Couldn't read the documents to import. Nothing has been sent yet, so at least that's tidy.")?;

    let mini_batches =
        slice_into_mini_batches(documents, app_config.runtime.max_mini_batch_size_bytes);
    info!(
        "✂️ sliced input into {} mini batches for pki {}",
        mini_batches.len(),
        app_config.partition_key_range_id
    );

    let procedure = ProcedureBackend::from_config(&app_config.procedure_config)
        .context("💀 Couldn't build the bulk-insert procedure client.")?;

    let inserter = PartitionInserter::new(
        app_config.partition_key_range_id,
        mini_batches,
        Arc::new(procedure),
        app_config.procedure_link,
        app_config.insert_options,
    )
    .with_empty_response_retry_limit(app_config.runtime.empty_response_retry_limit);

    ImportSupervisor::new(app_config.runtime)
        .run(&inserter)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::RuntimeConfig;
    use crate::file_source::FileSourceConfig;
    use crate::options::InsertOptions;
    use crate::procedures::{InMemoryProcedureConfig, ProcedureConfig};
    use std::io::Write;

    #[tokio::test]
    async fn the_one_where_the_whole_pipeline_runs_on_a_dry_run_store() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        for i in 0..57 {
            writeln!(file, r#"{{"id":"{i}","payload":"some bytes to make it chunky"}}"#)?;
        }
        file.flush()?;

        let app_config = AppConfig {
            partition_key_range_id: "dry-run".to_string(),
            procedure_link: "sprocs/bulkImport".to_string(),
            procedure_config: ProcedureConfig::InMemory(InMemoryProcedureConfig {
                max_documents_per_call: 5,
                request_charge_per_document: 1.0,
            }),
            source_config: FileSourceConfig {
                file_name: file.path().display().to_string(),
            },
            insert_options: InsertOptions::default(),
            runtime: RuntimeConfig {
                parallelism: 3,
                max_mini_batch_size_bytes: 512,
                empty_response_retry_limit: None,
                show_progress: false,
            },
        };

        let summary = run(app_config).await?;

        assert_eq!(summary.partition_key_range_id, "dry-run");
        assert_eq!(summary.documents_total, 57);
        assert_eq!(summary.documents_imported, 57);
        assert_eq!(summary.request_charge, 57.0);
        Ok(())
    }
}
