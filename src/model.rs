//! Data models for the import pipeline.
//!
//! # Overview
//!
//! - [`RawDocument`]: an opaque JSON object exactly as the source returned it.
//! - [`NormalizedSubmission`]: the mapped record handed to the submitter.
//! - [`ImportRecord`]: the persisted bookkeeping row for one source document.
//! - [`RunSummary`]: counters describing a single importer run.
//!
//! The import record doubles as the attempt tracker: its `mark_*` methods are
//! the only way the loop moves a record between states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::taxonomy::{DEFAULT_FORMAT, DEFAULT_LANGUAGE, WORLD};

/// Entity type every imported document is saved as.
pub const ENTITY_TYPE: &str = "node";

/// Default number of failed attempts after which a document is skipped.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A document as returned by a source API.
///
/// Sources disagree on every field name, so the document stays an untyped
/// JSON object. Adapters read it through the typed accessors below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDocument {
    pub fields: Map<String, Value>,
}

impl RawDocument {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a document from any JSON value. Non-objects yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Raw field access.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Field access following a dotted path, e.g. `"summary.content"`.
    pub fn pointer(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// A non-empty, trimmed string value. Numbers are stringified, since
    /// several sources send numeric identifiers.
    pub fn text(&self, path: &str) -> Option<String> {
        value_as_text(self.pointer(path)?)
    }

    /// Items of an array field. A single object or scalar is treated as a
    /// one-element list; missing or null yields nothing.
    pub fn list(&self, path: &str) -> Vec<&Value> {
        match self.pointer(path) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other],
        }
    }
}

/// Stringify a scalar JSON value, returning `None` for blanks.
pub fn value_as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() { None } else { Some(text) }
}

/// Content bundle the submission targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bundle {
    Report,
    Job,
}

impl Bundle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bundle::Report => "report",
            Bundle::Job => "job",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "report" => Some(Bundle::Report),
            "job" => Some(Bundle::Job),
            _ => None,
        }
    }
}

/// Identity of a source document, derived before mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentIdentity {
    /// Source-native identifier.
    pub item_id: String,
    /// Canonical URL of the document at the source.
    pub url: String,
    /// Deterministic UUID derived from `url`.
    pub uuid: String,
    /// Content hash over the source's allow-listed fields.
    pub hash: String,
}

/// An attachment to download and attach to the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The normalized record handed to the submitter.
///
/// Required fields (provider, bundle, hash, uuid, url, title) are never
/// empty, and country/language/format always carry at least one term; see
/// [`NormalizedSubmission::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSubmission {
    pub provider: String,
    pub bundle: Bundle,
    pub hash: String,
    pub uuid: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Source organization term IDs.
    #[serde(default)]
    pub source: Vec<i64>,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    pub language: Vec<i64>,
    pub country: Vec<i64>,
    pub format: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub theme: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file: Vec<FileAttachment>,

    // Job bundle only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub career_categories: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub how_to_apply: Option<String>,
}

impl NormalizedSubmission {
    /// Start a submission from a document identity. Term lists start with
    /// the World/English/Other defaults.
    pub fn new(provider: &str, bundle: Bundle, identity: &DocumentIdentity, title: &str) -> Self {
        Self {
            provider: provider.to_string(),
            bundle,
            hash: identity.hash.clone(),
            uuid: identity.uuid.clone(),
            url: identity.url.clone(),
            title: title.trim().to_string(),
            body: String::new(),
            source: Vec::new(),
            published: None,
            language: vec![DEFAULT_LANGUAGE],
            country: vec![WORLD],
            format: vec![DEFAULT_FORMAT],
            theme: Vec::new(),
            file: Vec::new(),
            career_categories: Vec::new(),
            closing_date: None,
            how_to_apply: None,
        }
    }

    /// Replace the country list, keeping the World default if nothing mapped.
    pub fn with_countries(mut self, countries: Vec<i64>) -> Self {
        if !countries.is_empty() {
            self.country = countries;
        }
        self
    }

    /// Replace the language list, keeping the English default if nothing mapped.
    pub fn with_languages(mut self, languages: Vec<i64>) -> Self {
        if !languages.is_empty() {
            self.language = languages;
        }
        self
    }

    /// Replace the format list, keeping the Other default if nothing mapped.
    pub fn with_formats(mut self, formats: Vec<i64>) -> Self {
        if !formats.is_empty() {
            self.format = formats;
        }
        self
    }

    /// Check the submission invariant, returning the first violation.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("provider", self.provider.as_str()),
            ("hash", self.hash.as_str()),
            ("uuid", self.uuid.as_str()),
            ("url", self.url.as_str()),
            ("title", self.title.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(format!("missing required field '{name}'"));
            }
        }
        if self.country.is_empty() {
            return Err("missing country".to_string());
        }
        if self.language.is_empty() {
            return Err("missing language".to_string());
        }
        if self.format.is_empty() {
            return Err("missing format".to_string());
        }
        Ok(())
    }
}

/// Reference to the entity the submitter created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: i64,
    pub revision_id: i64,
}

/// Processing status of an import record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Pending,
    Success,
    Error,
    Duplicate,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Success => "success",
            ImportStatus::Error => "error",
            ImportStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ImportStatus::Pending),
            "success" => Some(ImportStatus::Success),
            "error" => Some(ImportStatus::Error),
            "duplicate" => Some(ImportStatus::Duplicate),
            _ => None,
        }
    }
}

/// Persisted bookkeeping for one (importer, document) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub importer: String,
    pub provider_uuid: String,
    pub entity_type: String,
    pub entity_bundle: Bundle,
    pub imported_item_uuid: String,
    pub imported_item_id: String,
    pub imported_item_url: String,
    pub imported_data_hash: String,
    pub status: ImportStatus,
    pub message: String,
    pub attempts: u32,
    pub entity_id: Option<i64>,
    pub entity_revision_id: Option<i64>,
    pub changed: DateTime<Utc>,
}

impl ImportRecord {
    /// A fresh pending record for a document seen for the first time.
    pub fn new(
        importer: &str,
        provider_uuid: &str,
        bundle: Bundle,
        identity: &DocumentIdentity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            importer: importer.to_string(),
            provider_uuid: provider_uuid.to_string(),
            entity_type: ENTITY_TYPE.to_string(),
            entity_bundle: bundle,
            imported_item_uuid: identity.uuid.clone(),
            imported_item_id: identity.item_id.clone(),
            imported_item_url: identity.url.clone(),
            imported_data_hash: identity.hash.clone(),
            status: ImportStatus::Pending,
            message: String::new(),
            attempts: 0,
            entity_id: None,
            entity_revision_id: None,
            changed: now,
        }
    }

    /// Whether the record has used up its attempts for the current hash.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.status == ImportStatus::Error && self.attempts >= max_attempts
    }

    /// New content version: restart the attempt cycle.
    pub fn reset_for_hash(&mut self, identity: &DocumentIdentity, now: DateTime<Utc>) {
        self.imported_data_hash = identity.hash.clone();
        self.imported_item_id = identity.item_id.clone();
        self.imported_item_url = identity.url.clone();
        self.status = ImportStatus::Pending;
        self.message.clear();
        self.attempts = 0;
        self.changed = now;
    }

    pub fn mark_success(&mut self, entity: EntityRef, now: DateTime<Utc>) {
        self.status = ImportStatus::Success;
        self.message.clear();
        self.attempts = 0;
        self.entity_id = Some(entity.id);
        self.entity_revision_id = Some(entity.revision_id);
        self.changed = now;
    }

    pub fn mark_failure(&mut self, message: &str, now: DateTime<Utc>) {
        self.status = ImportStatus::Error;
        self.message = message.to_string();
        self.attempts = self.attempts.saturating_add(1);
        self.changed = now;
    }

    pub fn mark_duplicate(&mut self, message: &str, now: DateTime<Utc>) {
        self.status = ImportStatus::Duplicate;
        self.message = message.to_string();
        self.changed = now;
    }
}

/// Counters for one importer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub importer: String,
    /// Documents returned by the source.
    pub fetched: usize,
    /// Documents handed to the submitter.
    pub submitted: usize,
    /// Successful submissions.
    pub created: usize,
    /// Failed submissions (validation or transport).
    pub failed: usize,
    /// Submissions rejected as duplicates.
    pub duplicates: usize,
    /// Unchanged content, already imported.
    pub skipped_unchanged: usize,
    /// Attempt ceiling reached for the current content version.
    pub skipped_exhausted: usize,
    /// Missing mandatory fields or skipped by the field mapper.
    pub skipped_invalid: usize,
    /// Records of this importer in `success` after the run.
    pub processed_count: i64,
}
