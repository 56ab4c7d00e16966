//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::file_source::FileSourceConfig;
use crate::options::InsertOptions;
use crate::procedures::ProcedureConfig;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🎯 The one partition key range this run is responsible for.
    pub partition_key_range_id: String,
    /// 🔗 Link of the bulk-insert procedure, relative to the store URL.
    pub procedure_link: String,
    pub procedure_config: ProcedureConfig,
    pub source_config: FileSourceConfig,
    #[serde(default)]
    pub insert_options: InsertOptions,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🧵 How hard to push, and how to behave while pushing.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// 🧵 How many mini-batches may be in flight at once against the partition.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// ✂️ Byte budget per mini-batch when slicing the input.
    #[serde(default = "default_max_mini_batch_size_bytes")]
    pub max_mini_batch_size_bytes: usize,
    /// 🔁 Give up after this many blank replies in a row. Absent means retry forever.
    #[serde(default)]
    pub empty_response_retry_limit: Option<u32>,
    /// 📊 Draw the progress bar. Turn off for CI logs nobody wants full of carriage returns.
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_parallelism() -> usize {
    1
}

// 📦 1 MiB. Big enough to matter, small enough that the procedure finishes before its time budget.
fn default_max_mini_batch_size_bytes() -> usize {
    1024 * 1024
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_mini_batch_size_bytes: default_max_mini_batch_size_bytes(),
            empty_response_retry_limit: None,
            show_progress: default_show_progress(),
        }
    }
}

/// 🚀 Load the config from env vars (`PTX_*`) and, optionally, a TOML file on top.
///
/// 📐 No file? Env vars only. File? Env vars + TOML merged, TOML wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    // -- 🏗️ env vars are the base layer. nested keys use `__`, e.g. PTX_RUNTIME__PARALLELISM=4
    let config = Figment::new().merge(Env::prefixed("PTX_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (PTX_*). \
             Check the TOML. Check the env. Check for a tab where a space should be.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (PTX_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create temp config. The filesystem has ghosted us.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write temp config. The bytes refused to land.");
        file
    }

    #[test]
    fn the_one_where_a_full_http_config_parses() {
        let file = write_test_config(
            r#"
            partition_key_range_id = "7"
            procedure_link = "dbs/db/colls/coll/sprocs/bulkImport"

            [procedure_config.Http]
            url = "http://localhost:8081"
            api_key = "secret"
            request_timeout_secs = 60

            [source_config]
            file_name = "docs.ndjson"

            [insert_options]
            disableAutomaticIdGeneration = true
            soft_stop_on_conflict = true

            [runtime]
            parallelism = 4
            max_mini_batch_size_bytes = 4096
            empty_response_retry_limit = 5
            show_progress = false
            "#,
        );

        let app_config = load_config(Some(file.path()))
            .expect("💀 A full config should parse. The schema drift goblin does not get this win.");

        assert_eq!(app_config.partition_key_range_id, "7");
        assert_eq!(app_config.source_config.file_name, "docs.ndjson");
        assert!(app_config.insert_options.disable_automatic_id_generation);
        assert!(app_config.insert_options.soft_stop_on_conflict);
        assert!(!app_config.insert_options.continue_on_timeout);
        assert_eq!(
            app_config.runtime,
            RuntimeConfig {
                parallelism: 4,
                max_mini_batch_size_bytes: 4096,
                empty_response_retry_limit: Some(5),
                show_progress: false,
            }
        );
        match app_config.procedure_config {
            ProcedureConfig::Http(http) => {
                assert_eq!(http.url, "http://localhost:8081");
                assert_eq!(http.api_key.as_deref(), Some("secret"));
                assert_eq!(http.connect_timeout_secs, 10);
                assert_eq!(http.request_timeout_secs, 60);
            }
            honestly_who_knows => panic!(
                "💀 Expected Http procedure config, but serde took us to {:?}. Plot twist energy.",
                honestly_who_knows
            ),
        }
    }

    #[test]
    fn the_one_where_runtime_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(
            r#"
            partition_key_range_id = "0"
            procedure_link = "sprocs/bulkImport"

            [procedure_config.InMemory]

            [source_config]
            file_name = "docs.ndjson"
            "#,
        );

        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 Defaults should fill the gaps. Serde left us on read otherwise.");

        assert_eq!(app_config.runtime, RuntimeConfig::default());
        assert_eq!(app_config.insert_options, InsertOptions::default());
        match app_config.procedure_config {
            ProcedureConfig::InMemory(in_mem) => {
                assert_eq!(in_mem.max_documents_per_call, 100);
                assert_eq!(in_mem.request_charge_per_document, 5.0);
            }
            other => panic!("💀 Expected InMemory procedure config, got {:?}", other),
        }
    }

    #[test]
    fn the_one_where_a_missing_procedure_is_a_hard_no() {
        let file = write_test_config(
            r#"
            partition_key_range_id = "0"
            procedure_link = "sprocs/bulkImport"

            [source_config]
            file_name = "docs.ndjson"
            "#,
        );

        let err = load_config(Some(file.path())).expect_err("💀 no procedure config, no party");
        assert!(err.to_string().contains("Failed to parse configuration"));
    }
}
