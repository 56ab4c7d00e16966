//! # 📡 THE HTTP PROCEDURE
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM.
//!
//! The dashboard glows amber. One engineer, alone, watches a partition answer every
//! request with a 429 and a polite note: "try again in 200 milliseconds." They do.
//! It says 429 again. Their coffee has gone cold. Somewhere, a 410 is loading.
//!
//! 🚀 This module POSTs the remaining documents of a mini-batch to the bulk-insert
//! procedure and turns whatever comes back into either a [`ProcedureResponse`] or a
//! [`RemoteFault`]. It does not retry. Retries are the inserter's problem. Good luck to it.
//!
//! Wire shape:
//! - `POST {url}/{procedure_link}`
//! - header `x-partition-key-range-id: <pki>`, optional `authorization`
//! - body `[documents, options, null]`, the procedure's three positional arguments
//! - 2xx: `x-request-charge` header + text body
//! - otherwise: status, `x-sub-status`, `x-retry-after-ms` and the body become a `RemoteFault`

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, trace};

use super::{BulkInsertProcedure, ProcedureResponse, ProcedureTarget};
use crate::faults::{RemoteFault, STATUS_REQUEST_TIMEOUT};
use crate::options::InsertOptions;

pub(crate) const HEADER_PARTITION_KEY_RANGE_ID: &str = "x-partition-key-range-id";
pub(crate) const HEADER_REQUEST_CHARGE: &str = "x-request-charge";
pub(crate) const HEADER_SUB_STATUS: &str = "x-sub-status";
pub(crate) const HEADER_RETRY_AFTER_MS: &str = "x-retry-after-ms";

// 📡 HttpProcedureConfig: "It's just an HTTP call", she said, before the partition split.
#[derive(Debug, Deserialize, Clone)]
pub struct HttpProcedureConfig {
    /// 📡 Base URL of the store. Scheme + host + port. Yes, all of it.
    pub url: String,
    /// 🔒 Sent verbatim as the `authorization` header. Optional, like flossing.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ Client-side deadline per call. Blowing it counts as a request timeout (retryable).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// 🚚 The HTTP side of the bulk-insert procedure. Pure I/O, zero retry logic.
///
/// The `reqwest::Client` is reused across calls and is happy to be shared by every
/// mini-batch task at once.
#[derive(Debug)]
pub struct HttpProcedure {
    client: reqwest::Client,
    config: HttpProcedureConfig,
}

impl HttpProcedure {
    pub fn new(config: HttpProcedureConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a missing TLS cert or a cursed system config. Either way: tragic.")?;
        Ok(Self { client, config })
    }

    fn procedure_url(&self, target: &ProcedureTarget) -> String {
        // -- 🧹 slash hygiene: `https://host//sprocs` is a cry for help
        format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            target.procedure_link.trim_start_matches('/')
        )
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// 🧾 Turn a non-2xx answer into the normalized fault the classifier understands.
fn fault_from_response(status_code: u16, headers: &HeaderMap, body: String) -> RemoteFault {
    let mut fault = RemoteFault::new(status_code, body);
    if let Some(sub_status) = header_value(headers, HEADER_SUB_STATUS).and_then(|v| v.trim().parse().ok()) {
        fault = fault.with_sub_status(sub_status);
    }
    if let Some(retry_after_ms) = header_value(headers, HEADER_RETRY_AFTER_MS).and_then(|v| v.trim().parse().ok()) {
        fault = fault.with_retry_after(Duration::from_millis(retry_after_ms));
    }
    fault
}

#[async_trait]
impl BulkInsertProcedure for HttpProcedure {
    async fn execute(
        &self,
        target: &ProcedureTarget,
        documents: &[String],
        options: &InsertOptions,
    ) -> Result<ProcedureResponse> {
        let url = self.procedure_url(target);
        // -- 📦 three positional arguments: the docs, the options, and a reserved null slot
        let payload = serde_json::to_string(&(documents, options, ()))
            .context("💀 Could not even serialize the procedure arguments. The documents are strings. The options are booleans. How.")?;

        debug!(
            "📡 pki {} sending {} documents ({} bytes) to {}",
            target.partition_key_range_id,
            documents.len(),
            payload.len(),
            url
        );

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header(HEADER_PARTITION_KEY_RANGE_ID, &target.partition_key_range_id);
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", api_key);
        }

        let response = request.body(payload).send().await.map_err(|err| {
            transport_failure(
                &url,
                err,
                "💀 The bulk-insert call never made it. The network is not vibing with it. Check connectivity, check the URL, check your feelings.",
            )
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        // -- ⏱️ the client deadline covers the body too, so a slow body is still a timeout
        let body = response.text().await.map_err(|err| {
            transport_failure(
                &url,
                err,
                "💀 The store answered but the body got lost on the way home.",
            )
        })?;

        if !status.is_success() {
            return Err(fault_from_response(status.as_u16(), &headers, body).into());
        }

        let request_charge = header_value(&headers, HEADER_REQUEST_CHARGE)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        trace!(
            "✅ pki {} call landed, charge {} and {} bytes of reply",
            target.partition_key_range_id,
            request_charge,
            body.len()
        );

        Ok(ProcedureResponse {
            request_charge,
            body,
        })
    }
}

/// 🚧 A transport error, sorted: our own deadline running out is the same story as a 408
/// to the store, anything else is a local failure with `what` as its context.
fn transport_failure(url: &str, err: reqwest::Error, what: &str) -> anyhow::Error {
    if err.is_timeout() {
        return RemoteFault::new(
            STATUS_REQUEST_TIMEOUT,
            format!("client-side timeout calling {url}: {err}"),
        )
        .into();
    }
    anyhow::Error::new(err).context(format!("{what} Url: '{url}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::{FaultClass, classify_error};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> ProcedureTarget {
        ProcedureTarget {
            procedure_link: "dbs/db/colls/coll/sprocs/bulkImport".to_string(),
            partition_key_range_id: "3".to_string(),
        }
    }

    fn procedure_for(server: &MockServer) -> Result<HttpProcedure> {
        HttpProcedure::new(HttpProcedureConfig {
            url: format!("{}/", server.uri()),
            api_key: Some("type=master&sig=shh".to_string()),
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
        })
    }

    #[tokio::test]
    async fn the_one_where_a_happy_call_brings_back_charge_and_body() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/dbs/db/colls/coll/sprocs/bulkImport"))
            .and(header(HEADER_PARTITION_KEY_RANGE_ID, "3"))
            .and(header("authorization", "type=master&sig=shh"))
            .and(body_json(serde_json::json!([
                [r#"{"id":"a"}"#, r#"{"id":"b"}"#],
                {
                    "disableAutomaticIdGeneration": false,
                    "softStopOnConflict": false,
                    "systemCollectionId": null,
                    "enableBsonSchema": false,
                    "continueOnTimeout": true
                },
                null
            ])))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(HEADER_REQUEST_CHARGE, "12.34")
                    .set_body_string(r#"{"count":2,"errorCode":0}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let docs = vec![r#"{"id":"a"}"#.to_string(), r#"{"id":"b"}"#.to_string()];
        let response = procedure_for(&server)?
            .execute(&target(), &docs, &InsertOptions::default().with_continue_on_timeout())
            .await?;

        assert_eq!(response.request_charge, 12.34);
        assert_eq!(response.body, r#"{"count":2,"errorCode":0}"#);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_missing_charge_header_costs_nothing() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let response = procedure_for(&server)?
            .execute(&target(), &["{}".to_string()], &InsertOptions::default())
            .await?;

        assert_eq!(response.request_charge, 0.0);
        assert!(response.body.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_429_brings_its_retry_hint() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header(HEADER_RETRY_AFTER_MS, "200")
                    .set_body_string("request rate is large"),
            )
            .mount(&server)
            .await;

        let err = procedure_for(&server)?
            .execute(&target(), &["{}".to_string()], &InsertOptions::default())
            .await
            .expect_err("💀 a 429 should not be a success. that's not how any of this works.");

        assert_eq!(
            classify_error(&err),
            Some(FaultClass::Throttled {
                retry_after: Duration::from_millis(200)
            })
        );
        let fault = err
            .downcast_ref::<RemoteFault>()
            .expect("💀 should be a remote fault");
        assert_eq!(fault.message, "request rate is large");
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_410_with_the_split_sub_status_is_a_split() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410).insert_header(HEADER_SUB_STATUS, "1007"))
            .mount(&server)
            .await;

        let err = procedure_for(&server)?
            .execute(&target(), &["{}".to_string()], &InsertOptions::default())
            .await
            .expect_err("💀 410 should fail");

        assert_eq!(classify_error(&err), Some(FaultClass::Splitting));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_client_runs_out_of_patience() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = procedure_for(&server)?
            .execute(&target(), &["{}".to_string()], &InsertOptions::default())
            .await
            .expect_err("💀 the delay is longer than the timeout, this must fail");

        assert_eq!(classify_error(&err), Some(FaultClass::TimedOut));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_headers_arrive_but_the_body_dawdles() -> Result<()> {
        use std::io::{Read, Write};

        // -- 🐌 a hand-rolled server: promises 64 bytes of body, sends 10, then naps past the deadline
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let server = std::thread::spawn(move || -> std::io::Result<()> {
            let (mut socket, _) = listener.accept()?;
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request)?;
            socket.write_all(
                b"HTTP/1.1 200 OK\r\nx-request-charge: 1.0\r\ncontent-length: 64\r\n\r\n{\"count\":1",
            )?;
            socket.flush()?;
            std::thread::sleep(Duration::from_secs(3));
            Ok(())
        });

        let procedure = HttpProcedure::new(HttpProcedureConfig {
            url: format!("http://{addr}"),
            api_key: None,
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
        })?;

        let err = procedure
            .execute(&target(), &["{}".to_string()], &InsertOptions::default())
            .await
            .expect_err("💀 half a body and a nap should run out the clock");

        assert_eq!(
            classify_error(&err),
            Some(FaultClass::TimedOut),
            "a slow body is retried like any other timeout, not treated as fatal"
        );
        let _ = server.join();
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nobody_is_home() -> Result<()> {
        // -- 🏚️ port 9 is the discard service. nobody runs it. nobody answers.
        let procedure = HttpProcedure::new(HttpProcedureConfig {
            url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            connect_timeout_secs: 1,
            request_timeout_secs: 2,
        })?;

        let err = procedure
            .execute(&target(), &["{}".to_string()], &InsertOptions::default())
            .await
            .expect_err("💀 connecting to nothing should fail");

        assert_eq!(classify_error(&err), None, "transport failure is a local error, not a remote fault");
        Ok(())
    }
}
