//! 🎛️ Insert options: the little envelope of opinions we staple to every batch.
//!
//! 🎬 *[a config struct sits alone in a well-lit room. it will never change.]*
//! *[somewhere, a timeout happens. the struct does not flinch. it spawns a sibling instead.]*
//!
//! The remote bulk-insert procedure reads these flags verbatim, so the wire names are
//! camelCase and the field set is closed. The only knob we ever turn at runtime is
//! `continue_on_timeout`, and we turn it on a fresh copy. The original stays pristine,
//! like the box your phone came in. 🦆

use serde::{Deserialize, Serialize};

/// 📦 Flags handed to the bulk-insert procedure on every call.
///
/// 🔧 Config files may use either spelling: `softStopOnConflict` or `soft_stop_on_conflict`.
/// Immutable once built. Want a variant? Derive one with
/// [`InsertOptions::with_continue_on_timeout`]. Mutating the original is not a thing we do here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOptions {
    /// 🔑 Don't make up ids for documents that arrive without one.
    #[serde(default, alias = "disable_automatic_id_generation")]
    pub disable_automatic_id_generation: bool,
    /// 🛑 Stop the batch quietly at the first conflict instead of failing the whole call.
    #[serde(default, alias = "soft_stop_on_conflict")]
    pub soft_stop_on_conflict: bool,
    /// 🏷️ System collection id the procedure writes into, if the store needs one.
    #[serde(default, alias = "system_collection_id")]
    pub system_collection_id: Option<String>,
    #[serde(default, alias = "enable_bson_schema")]
    pub enable_bson_schema: bool,
    /// ⏱️ Resume from where a timed-out call stopped rather than starting over.
    #[serde(default, alias = "continue_on_timeout")]
    pub continue_on_timeout: bool,
}

impl InsertOptions {
    /// 🔄 A brand new options value with `continue_on_timeout` switched on.
    ///
    /// `self` is borrowed, not touched. Every other field is carried over exactly.
    pub fn with_continue_on_timeout(&self) -> Self {
        Self {
            continue_on_timeout: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_timeout_variant_leaves_the_original_alone() {
        let the_original = InsertOptions {
            disable_automatic_id_generation: true,
            soft_stop_on_conflict: true,
            system_collection_id: Some("sys-coll".to_string()),
            enable_bson_schema: true,
            continue_on_timeout: false,
        };

        let the_sequel = the_original.with_continue_on_timeout();

        assert!(the_sequel.continue_on_timeout);
        assert!(!the_original.continue_on_timeout, "original must never be mutated");
        assert_eq!(
            InsertOptions {
                continue_on_timeout: false,
                ..the_sequel
            },
            the_original,
            "everything except continue_on_timeout must carry over"
        );
    }

    #[test]
    fn the_one_where_the_wire_speaks_camel_case() {
        let json = serde_json::to_value(InsertOptions::default().with_continue_on_timeout())
            .expect("💀 options should serialize. they are five fields. come on.");

        assert_eq!(json["continueOnTimeout"], serde_json::json!(true));
        assert_eq!(json["disableAutomaticIdGeneration"], serde_json::json!(false));
        assert_eq!(json["softStopOnConflict"], serde_json::json!(false));
        assert_eq!(json["enableBsonSchema"], serde_json::json!(false));
        assert!(json["systemCollectionId"].is_null());
    }
}
