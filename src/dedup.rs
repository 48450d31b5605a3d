//! Change detection for imported documents.
//!
//! A document's identity across runs is the UUID derived from its canonical
//! URL. Whether it changed is decided by a SHA-256 hash over an allow-list of
//! fields chosen per source. Volatile fields such as download counters or
//! crawl timestamps stay out of the allow-list so they never trigger a
//! re-import.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::{ImportRecord, ImportStatus, RawDocument};

/// Domain used to derive the UUID namespace for imported items.
const UUID_NAMESPACE_DOMAIN: &str = "reliefweb.int";

fn item_namespace() -> &'static Uuid {
    static NAMESPACE: OnceLock<Uuid> = OnceLock::new();
    NAMESPACE.get_or_init(|| Uuid::new_v5(&Uuid::NAMESPACE_DNS, UUID_NAMESPACE_DOMAIN.as_bytes()))
}

/// Deterministic UUID for a canonical URL.
pub fn item_uuid(url: &str) -> String {
    Uuid::new_v5(item_namespace(), url.trim().as_bytes()).to_string()
}

/// SHA-256 hex digest over the given fields of a document.
///
/// Fields are serialized in name order and missing ones hash as `null`, so
/// the digest only depends on the values of the allow-listed fields.
pub fn content_hash(doc: &RawDocument, fields: &[&str]) -> String {
    let selected: BTreeMap<&str, &Value> = fields
        .iter()
        .map(|field| (*field, doc.pointer(field).unwrap_or(&Value::Null)))
        .collect();

    // A BTreeMap of JSON values always serializes.
    let serialized = serde_json::to_vec(&selected).unwrap_or_default();
    hex::encode(Sha256::digest(&serialized))
}

/// What to do with a document given its stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Never seen before.
    New,
    /// Same content, previously failed below the attempt ceiling.
    Retry,
    /// Content changed since the last import.
    Update,
    /// Same content, already imported.
    SkipUnchanged,
    /// Same content, flagged as a duplicate of existing content.
    SkipDuplicate,
    /// Same content, attempt ceiling reached.
    SkipExhausted,
}

/// Decide whether a document with `hash` needs to be (re)submitted.
pub fn decide(existing: Option<&ImportRecord>, hash: &str, max_attempts: u32) -> Decision {
    let Some(record) = existing else {
        return Decision::New;
    };

    if record.imported_data_hash != hash {
        return Decision::Update;
    }

    if record.is_exhausted(max_attempts) {
        return Decision::SkipExhausted;
    }

    match record.status {
        ImportStatus::Success => Decision::SkipUnchanged,
        ImportStatus::Duplicate => Decision::SkipDuplicate,
        ImportStatus::Error | ImportStatus::Pending => Decision::Retry,
    }
}
