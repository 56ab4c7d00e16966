//! 🔌 Procedures: where the documents actually leave the building.
//!
//! 🚰 The partition inserter never talks to the store directly. It calls a
//! [`BulkInsertProcedure`] with "here's what's left, here are the options", and gets back
//! a request charge and a text payload. Or a fault. Usually a fault at 3am.
//!
//! 🎭 This module is the casting agency:
//! - [`HttpProcedure`]: the real deal, a POST per call
//! - [`InMemoryProcedure`]: a dry-run store that lives and dies in RAM
//!
//! Both sit behind [`ProcedureBackend`] so the CLI can pick one from config without
//! the inserter having to care.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::options::InsertOptions;

pub(crate) mod http;
pub(crate) mod in_mem;

pub use http::{HttpProcedure, HttpProcedureConfig};
pub use in_mem::{InMemoryProcedure, InMemoryProcedureConfig};

/// 🎯 Where a call lands: which procedure, scoped to which partition key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcedureTarget {
    pub procedure_link: String,
    pub partition_key_range_id: String,
}

/// 📬 What came back from a call that didn't fault: what it cost, and what it said.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureResponse {
    pub request_charge: f64,
    /// 📜 Raw payload. Could be JSON. Could be empty. See `response::parse_batch_insert_response`.
    pub body: String,
}

/// 🚚 The remote bulk-insert operation.
///
/// # Contract
/// - `documents` is the still-uninserted suffix of a mini-batch, in order.
/// - Remote-side failures come back as an `anyhow::Error` wrapping a
///   [`RemoteFault`](crate::faults::RemoteFault). Anything else is treated as a local blunder.
/// - Must be safe to call from many tasks at once. `&self`, not `&mut self`.
#[async_trait]
pub trait BulkInsertProcedure: std::fmt::Debug + Send + Sync {
    async fn execute(
        &self,
        target: &ProcedureTarget,
        documents: &[String],
        options: &InsertOptions,
    ) -> Result<ProcedureResponse>;
}

/// 🔧 Which backend to build, straight from config.
#[derive(Debug, Deserialize, Clone)]
pub enum ProcedureConfig {
    Http(HttpProcedureConfig),
    InMemory(InMemoryProcedureConfig),
}

/// 🎭 The many faces of a procedure. A universal remote, except it only has one button.
#[derive(Debug)]
pub enum ProcedureBackend {
    Http(HttpProcedure),
    InMemory(InMemoryProcedure),
}

impl ProcedureBackend {
    /// 🏗️ Build whichever backend the config asked for.
    pub fn from_config(config: &ProcedureConfig) -> Result<Self> {
        Ok(match config {
            ProcedureConfig::Http(http_config) => {
                ProcedureBackend::Http(HttpProcedure::new(http_config.clone())?)
            }
            ProcedureConfig::InMemory(in_mem_config) => {
                ProcedureBackend::InMemory(InMemoryProcedure::new(in_mem_config.clone()))
            }
        })
    }
}

#[async_trait]
impl BulkInsertProcedure for ProcedureBackend {
    async fn execute(
        &self,
        target: &ProcedureTarget,
        documents: &[String],
        options: &InsertOptions,
    ) -> Result<ProcedureResponse> {
        match self {
            ProcedureBackend::Http(procedure) => procedure.execute(target, documents, options).await,
            ProcedureBackend::InMemory(procedure) => {
                procedure.execute(target, documents, options).await
            }
        }
    }
}
