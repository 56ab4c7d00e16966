//! # Previously, on Partix...
//!
//! 🎬 The store was down. Or far away. Or billed by the request unit and the finance
//! team had Opinions. Someone needed a store that lives entirely in RAM, charges
//! monopoly money, and forgets everything the moment you blink.
//!
//! That someone was this module.
//!
//! [`InMemoryProcedure`] accepts at most `max_documents_per_call` documents per call, like a
//! real store that runs out of time budget, so the inserter's partial-progress loop gets
//! a proper workout on a dry run.
//!
//! ⚠️ This is NOT a database. If you're deploying this to prod, please also deploy a therapist.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::trace;

use super::{BulkInsertProcedure, ProcedureResponse, ProcedureTarget};
use crate::options::InsertOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct InMemoryProcedureConfig {
    /// 🍽️ How many documents one call may swallow. At least one gets through, always.
    #[serde(default = "default_max_documents_per_call")]
    pub max_documents_per_call: usize,
    /// 💸 Pretend request charge per accepted document.
    #[serde(default = "default_request_charge_per_document")]
    pub request_charge_per_document: f64,
}

fn default_max_documents_per_call() -> usize {
    100
}

fn default_request_charge_per_document() -> f64 {
    5.0
}

impl Default for InMemoryProcedureConfig {
    fn default() -> Self {
        Self {
            max_documents_per_call: default_max_documents_per_call(),
            request_charge_per_document: default_request_charge_per_document(),
        }
    }
}

/// 📦 A store that never forgets. Until the process exits.
///
/// Clone-able because tests need to peek inside after handing one copy to the inserter.
/// The `Arc` means every clone shares the same Vec.
#[derive(Debug, Clone)]
pub struct InMemoryProcedure {
    config: InMemoryProcedureConfig,
    stored: Arc<Mutex<Vec<String>>>,
}

impl InMemoryProcedure {
    pub fn new(config: InMemoryProcedureConfig) -> Self {
        Self {
            config,
            stored: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 🔍 Everything accepted so far, in arrival order.
    pub async fn stored_documents(&self) -> Vec<String> {
        self.stored.lock().await.clone()
    }
}

#[async_trait]
impl BulkInsertProcedure for InMemoryProcedure {
    async fn execute(
        &self,
        target: &ProcedureTarget,
        documents: &[String],
        _options: &InsertOptions,
    ) -> Result<ProcedureResponse> {
        let accepted = documents.len().min(self.config.max_documents_per_call.max(1));
        self.stored
            .lock()
            .await
            .extend(documents[..accepted].iter().cloned());

        trace!(
            "🧠 in-memory store took {} of {} documents for pki {}",
            accepted,
            documents.len(),
            target.partition_key_range_id
        );

        Ok(ProcedureResponse {
            request_charge: accepted as f64 * self.config.request_charge_per_document,
            body: serde_json::json!({ "count": accepted, "errorCode": 0 }).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::parse_batch_insert_response;

    fn target() -> ProcedureTarget {
        ProcedureTarget {
            procedure_link: "sprocs/bulkImport".to_string(),
            partition_key_range_id: "0".to_string(),
        }
    }

    #[tokio::test]
    async fn the_one_where_the_store_only_eats_what_fits_on_the_plate() -> Result<()> {
        let procedure = InMemoryProcedure::new(InMemoryProcedureConfig {
            max_documents_per_call: 2,
            request_charge_per_document: 1.5,
        });
        let docs: Vec<String> = (0..5).map(|i| format!(r#"{{"doc":{i}}}"#)).collect();

        let response = procedure
            .execute(&target(), &docs, &InsertOptions::default())
            .await?;

        let parsed = parse_batch_insert_response(&response.body)?
            .expect("💀 in-memory store should always answer");
        assert_eq!(parsed.count, 2);
        assert_eq!(parsed.error_code, 0);
        assert_eq!(response.request_charge, 3.0);
        assert_eq!(procedure.stored_documents().await, docs[..2].to_vec());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_zero_limit_still_lets_one_through() -> Result<()> {
        let procedure = InMemoryProcedure::new(InMemoryProcedureConfig {
            max_documents_per_call: 0,
            request_charge_per_document: 1.0,
        });
        let docs = vec![r#"{"doc":1}"#.to_string(), r#"{"doc":2}"#.to_string()];

        procedure
            .execute(&target(), &docs, &InsertOptions::default())
            .await?;

        assert_eq!(procedure.stored_documents().await.len(), 1);
        Ok(())
    }
}
