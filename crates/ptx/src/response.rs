//! 📜 Reading the procedure's reply.
//!
//! The bulk-insert procedure answers with a tiny JSON object: how many documents it took
//! and whether it was unhappy about anything. Sometimes it answers with nothing at all.
//! Nothing is not an error here. Nothing is just... nothing. The driver decides what
//! to do about it.

use anyhow::{Context, Result};
use serde::Deserialize;

/// 📬 One call's verdict from the bulk-insert procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchInsertResponse {
    /// ✅ Documents actually inserted by this call, counted from the front of the suffix we sent.
    #[serde(default)]
    pub count: u64,
    /// 🚨 0 means fine. Anything else means the procedure had complaints.
    #[serde(default)]
    pub error_code: i64,
}

/// 🔍 Parse the raw payload. Blank means `Ok(None)`. Garbage means `Err`.
pub fn parse_batch_insert_response(raw: &str) -> Result<Option<BatchInsertResponse>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let parsed = serde_json::from_str(raw).with_context(|| {
        format!("💀 The procedure replied, but not in any dialect of JSON we speak: '{raw}'")
    })?;
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_a_normal_reply_parses() -> Result<()> {
        let parsed = parse_batch_insert_response(r#"{"count":40,"errorCode":0}"#)?;
        assert_eq!(
            parsed,
            Some(BatchInsertResponse {
                count: 40,
                error_code: 0
            })
        );
        Ok(())
    }

    #[test]
    fn the_one_where_silence_is_not_an_error() -> Result<()> {
        assert_eq!(parse_batch_insert_response("")?, None);
        assert_eq!(parse_batch_insert_response("   \n\t")?, None);
        Ok(())
    }

    #[test]
    fn the_one_where_missing_fields_default_to_zero() -> Result<()> {
        let parsed = parse_batch_insert_response(r#"{"errorCode":17}"#)?;
        assert_eq!(
            parsed,
            Some(BatchInsertResponse {
                count: 0,
                error_code: 17
            })
        );
        Ok(())
    }

    #[test]
    fn the_one_where_gibberish_is_rejected() {
        assert!(parse_batch_insert_response("{not json").is_err());
        assert!(parse_batch_insert_response(r#"{"count":-3}"#).is_err());
    }
}
