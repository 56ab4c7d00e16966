//! 📂 FileSource: "It's just a file", said no sysadmin ever before the disk filled up.
//!
//! Reads an NDJSON file, one serialized document per line, into memory so the slicer can
//! carve it into mini-batches. Blank lines are skipped. Everything else is taken on faith
//! as a document: validating JSON is the store's job, not ours.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, trace};

// -- 📂 config lives co-located with the thing that uses it. no scavenger hunt at 2am.
#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub file_name: String,
}

/// 📥 Slurp every non-blank line of the configured file, in order.
pub async fn read_documents(config: &FileSourceConfig) -> Result<Vec<String>> {
    let file = File::open(&config.file_name).await.with_context(|| {
        format!(
            "💀 Could not open '{}'. The file exists in our hearts, but apparently not on disk.",
            config.file_name
        )
    })?;

    let mut lines = BufReader::new(file).lines();
    let mut documents = Vec::new();
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("💀 Reading '{}' went sideways mid-line.", config.file_name))?
    {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            trace!("🫥 skipping a blank line, it had nothing to say");
            continue;
        }
        documents.push(trimmed.to_string());
    }

    debug!("📂 read {} documents from '{}'", documents.len(), config.file_name);
    Ok(documents)
}
