//! Source adapters for the external APIs documents are imported from.
//!
//! Each adapter implements [`SourceAdapter`]: it knows how to fetch its
//! source's documents, which fields identify and fingerprint a document, and
//! how to map a document onto a [`NormalizedSubmission`]. Everything else
//! (change detection, attempt bookkeeping, submission) lives in the
//! reconciliation loop.
//!
//! # Sources
//!
//! - [`echo`]: ECHO Flash Updates
//! - [`worldbank`]: World Bank Documents & Reports (offset paging)
//! - [`inoreader`]: Inoreader streams (continuation tokens, ClientLogin)
//! - [`logcluster`]: WFP Logistics Cluster documents (API key header)
//! - [`workday`]: WorkDay job postings (OAuth2 refresh token)

pub mod echo;
pub mod inoreader;
pub mod logcluster;
pub mod workday;
pub mod worldbank;

pub use echo::EchoAdapter;
pub use inoreader::InoreaderAdapter;
pub use logcluster::LogclusterAdapter;
pub use workday::WorkdayAdapter;
pub use worldbank::WorldBankAdapter;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use crate::config::SourceSettings;
use crate::dedup::item_uuid;
use crate::error::ImportError;
use crate::model::{Bundle, DocumentIdentity, NormalizedSubmission, RawDocument};
use crate::taxonomy::Taxonomy;

/// Result of mapping one document.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    /// Ready to submit.
    Ready(Box<NormalizedSubmission>),
    /// Not importable; the reason is logged and the batch continues.
    Skip(String),
}

/// Per-source behaviour plugged into the reconciliation loop.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Settings this adapter was built from.
    fn settings(&self) -> &SourceSettings;

    /// Bundle submissions from this source target.
    fn bundle(&self) -> Bundle;

    /// Fetch up to `settings().limit` documents.
    async fn fetch(&self) -> Result<Vec<RawDocument>, ImportError>;

    /// Source-native identifier of a document.
    fn item_id(&self, doc: &RawDocument) -> Option<String>;

    /// Canonical URL of a document.
    fn canonical_url(&self, doc: &RawDocument) -> Option<String>;

    /// Hash over the fields whose change warrants a re-import.
    fn compute_hash(&self, doc: &RawDocument) -> String;

    /// Map a document onto a submission.
    fn map_fields(
        &self,
        doc: &RawDocument,
        identity: &DocumentIdentity,
        taxonomy: &Taxonomy,
    ) -> Result<MapOutcome, ImportError>;

    fn importer(&self) -> &str {
        &self.settings().name
    }

    /// Derive the identity of a document, or the reason it has none.
    fn identify(&self, doc: &RawDocument) -> Result<DocumentIdentity, String> {
        let item_id = self
            .item_id(doc)
            .ok_or_else(|| "missing document ID".to_string())?;
        let url = self
            .canonical_url(doc)
            .ok_or_else(|| format!("document {item_id} has no canonical URL"))?;
        Ok(DocumentIdentity {
            uuid: item_uuid(&url),
            hash: self.compute_hash(doc),
            item_id,
            url,
        })
    }
}

/// Build the adapter for a configured importer.
pub fn build_adapter(settings: &SourceSettings) -> Result<Box<dyn SourceAdapter>, ImportError> {
    let adapter: Box<dyn SourceAdapter> = match settings.name.as_str() {
        "echo" => Box::new(EchoAdapter::new(settings.clone())?),
        "worldbank" => Box::new(WorldBankAdapter::new(settings.clone())?),
        "inoreader" => Box::new(InoreaderAdapter::new(settings.clone())?),
        "logcluster" => Box::new(LogclusterAdapter::new(settings.clone())?),
        "workday" => Box::new(WorkdayAdapter::new(settings.clone())?),
        other => return Err(ImportError::UnknownImporter(other.to_string())),
    };
    Ok(adapter)
}

/// Pull documents out of a response.
///
/// An empty body yields no documents. A top-level array is used as is;
/// otherwise the first of `keys` holding an array is. Non-object items are
/// dropped.
pub(crate) fn extract_documents(importer: &str, body: Option<Value>, keys: &[&str]) -> Vec<RawDocument> {
    let items = match body {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => keys
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        Some(_) => {
            warn!(importer = %importer, "Unexpected response shape, no documents");
            return Vec::new();
        }
    };

    let total = items.len();
    let documents: Vec<RawDocument> = items.into_iter().filter_map(RawDocument::from_value).collect();
    if documents.len() < total {
        warn!(
            importer = %importer,
            dropped = total - documents.len(),
            "Dropped non-object items from response"
        );
    }
    documents
}

/// Parse the date formats seen across sources: RFC 3339, naive ISO
/// date-times (taken as UTC), plain dates and Unix timestamps in seconds.
pub(crate) fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(dt.and_utc());
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
            s.parse::<i64>()
                .ok()
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        }
        _ => None,
    }
}

/// Text of a term-like value: a string, or an object's `name`-ish field.
pub(crate) fn term_text(value: &Value, keys: &[&str]) -> Option<String> {
    match value {
        Value::Object(map) => keys
            .iter()
            .find_map(|key| map.get(*key).and_then(crate::model::value_as_text)),
        other => crate::model::value_as_text(other),
    }
}
