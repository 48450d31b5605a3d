//! WFP Logistics Cluster documents.
//!
//! Situation reports, meeting minutes, maps and snapshots published per
//! operation. Requests carry an API key header; one page is read per run.
//!
//! # Privacy
//!
//! Documents are published operational material. Contact lists attached to
//! meeting minutes are imported as files only, never parsed.

use async_trait::async_trait;
use serde_json::Value;

use super::{MapOutcome, SourceAdapter, extract_documents, parse_datetime, term_text};
use crate::config::SourceSettings;
use crate::dedup::content_hash;
use crate::error::ImportError;
use crate::fetcher::HttpFetcher;
use crate::model::{Bundle, DocumentIdentity, FileAttachment, NormalizedSubmission, RawDocument};
use crate::taxonomy::{LookupTable, Taxonomy, push_unique};

/// ReliefWeb source term for the Logistics Cluster.
const LOGCLUSTER_SOURCE_ID: i64 = 2916;

/// Every document is tagged with this theme.
const LOGCLUSTER_THEME: &str = "Logistics and Telecommunications";

/// `changed` and view counters are left out.
const HASHED_FIELDS: &[&str] = &[
    "uuid",
    "title",
    "url",
    "summary",
    "created",
    "country",
    "document_type",
    "language",
    "file",
];

/// Logistics Cluster document types mapped to ReliefWeb format terms.
const DOCUMENT_TYPES: &[(&str, i64)] = &[
    ("Situation Report", 10),
    ("Situation Update", 10),
    ("Meeting Minutes", 9),
    ("Concept of Operations", 7),
    ("Standard Operating Procedure", 7),
    ("Logistics Capacity Assessment", 5),
    ("Map", 12),
    ("Snapshot", 12570),
    ("Infographic", 12570),
    ("Dashboard", 12570),
];

/// Adapter for the Logistics Cluster documents API.
pub struct LogclusterAdapter {
    settings: SourceSettings,
    fetcher: HttpFetcher,
    document_types: LookupTable,
}

impl LogclusterAdapter {
    /// Create a new Logistics Cluster adapter.
    pub fn new(settings: SourceSettings) -> Result<Self, ImportError> {
        let fetcher = HttpFetcher::new(&settings)?;
        let document_types =
            LookupTable::build("logcluster_document_type", DOCUMENT_TYPES.iter().copied())?;
        Ok(Self {
            settings,
            fetcher,
            document_types,
        })
    }
}

fn attachment(value: &Value) -> Option<FileAttachment> {
    let url = match value {
        Value::String(_) => crate::model::value_as_text(value)?,
        _ => value.get("url").and_then(crate::model::value_as_text)?,
    };
    let filename = value
        .get("filename")
        .and_then(crate::model::value_as_text)
        .or_else(|| url.rsplit('/').next().map(str::to_string));
    Some(FileAttachment {
        url,
        filename,
        description: value.get("description").and_then(crate::model::value_as_text),
    })
}

#[async_trait]
impl SourceAdapter for LogclusterAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn bundle(&self) -> Bundle {
        Bundle::Report
    }

    async fn fetch(&self) -> Result<Vec<RawDocument>, ImportError> {
        let session = self.fetcher.open_session().await?;
        let limit = self.settings.limit;
        let body = session
            .get_json(&self.settings.base_url, &[("limit", limit.to_string())])
            .await?;

        let mut documents = extract_documents(self.importer(), body, &["data", "documents"]);
        documents.truncate(limit);
        Ok(documents)
    }

    fn item_id(&self, doc: &RawDocument) -> Option<String> {
        doc.text("uuid").or_else(|| doc.text("id"))
    }

    fn canonical_url(&self, doc: &RawDocument) -> Option<String> {
        doc.text("url")
    }

    fn compute_hash(&self, doc: &RawDocument) -> String {
        content_hash(doc, HASHED_FIELDS)
    }

    fn map_fields(
        &self,
        doc: &RawDocument,
        identity: &DocumentIdentity,
        taxonomy: &Taxonomy,
    ) -> Result<MapOutcome, ImportError> {
        let Some(title) = doc.text("title") else {
            return Ok(MapOutcome::Skip("missing title".to_string()));
        };

        let mut countries = Vec::new();
        for value in doc.list("country") {
            let id = term_text(value, &["iso3"])
                .and_then(|iso3| taxonomy.countries.by_iso3(&iso3))
                .or_else(|| {
                    term_text(value, &["name"]).and_then(|name| taxonomy.countries.by_name(&name))
                });
            if let Some(id) = id {
                push_unique(&mut countries, id);
            }
        }
        let countries = taxonomy.countries.prioritize_by_title(&title, countries);

        let languages = doc
            .list("language")
            .into_iter()
            .filter_map(|value| term_text(value, &["code", "name"]))
            .filter_map(|language| taxonomy.languages.get(&language))
            .collect();

        let formats = doc
            .text("document_type")
            .and_then(|kind| self.document_types.get(&kind))
            .into_iter()
            .collect();

        let mut submission =
            NormalizedSubmission::new(&self.settings.provider_uuid, Bundle::Report, identity, &title)
                .with_countries(countries)
                .with_languages(languages)
                .with_formats(formats);
        submission.body = doc.text("summary").unwrap_or_default();
        submission.source = vec![LOGCLUSTER_SOURCE_ID];
        submission.theme = taxonomy.themes.get(LOGCLUSTER_THEME).into_iter().collect();
        submission.published = doc.get("created").and_then(parse_datetime);
        submission.file = doc.list("file").into_iter().filter_map(attachment).collect();

        Ok(MapOutcome::Ready(Box::new(submission)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
    };
    use serde_json::json;

    use crate::config::Credentials;
    use crate::data_sources::testing::{serve, settings};

    fn document() -> Value {
        json!({
            "uuid": "0b5c7f6e-1d2a-4c1e-9d5e-3f1a2b3c4d5e",
            "title": "South Sudan Logistics Cluster Situation Update",
            "url": "https://logcluster.org/en/document/south-sudan-situation-update-12",
            "summary": "Road access remains constrained.",
            "created": "2024-04-02T08:15:00+00:00",
            "changed": "2024-04-09T11:00:00+00:00",
            "country": [{"iso3": "SSD", "name": "South Sudan"}, {"iso3": "SDN", "name": "Sudan"}],
            "document_type": "Situation Update",
            "file": {
                "url": "https://logcluster.org/sites/default/files/ssd_sitrep_12.pdf",
                "description": "Situation update 12"
            }
        })
    }

    fn map(doc: Value) -> NormalizedSubmission {
        let adapter = LogclusterAdapter::new(settings("logcluster", "http://127.0.0.1:9")).unwrap();
        let taxonomy = Taxonomy::reliefweb().unwrap();
        let doc = RawDocument::from_value(doc).unwrap();
        let identity = adapter.identify(&doc).unwrap();
        match adapter.map_fields(&doc, &identity, &taxonomy).unwrap() {
            MapOutcome::Ready(submission) => *submission,
            MapOutcome::Skip(reason) => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn test_map_document() {
        let submission = map(document());

        assert_eq!(submission.country, vec![8657, 208]);
        assert_eq!(submission.format, vec![10]);
        assert_eq!(submission.theme, vec![4598]);
        assert_eq!(submission.language, vec![267]);
        assert_eq!(submission.file.len(), 1);
        assert_eq!(submission.file[0].filename.as_deref(), Some("ssd_sitrep_12.pdf"));
        assert_eq!(submission.file[0].description.as_deref(), Some("Situation update 12"));
    }

    #[test]
    fn test_unknown_document_type_is_other() {
        let mut doc = document();
        doc["document_type"] = json!("Bulletin");
        assert_eq!(map(doc).format, vec![9]);
    }

    #[test]
    fn test_changed_stamp_not_hashed() {
        let adapter = LogclusterAdapter::new(settings("logcluster", "http://127.0.0.1:9")).unwrap();
        let mut later = document();
        later["changed"] = json!("2024-05-01T00:00:00+00:00");

        assert_eq!(
            adapter.compute_hash(&RawDocument::from_value(document()).unwrap()),
            adapter.compute_hash(&RawDocument::from_value(later).unwrap())
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_api_key() {
        let app = Router::new().route(
            "/documents",
            get(|headers: HeaderMap| async move {
                if headers.get("X-API-Key").and_then(|v| v.to_str().ok()) != Some("lc-key") {
                    return StatusCode::FORBIDDEN.into_response();
                }
                Json(json!({"data": [document(), document()]})).into_response()
            }),
        );
        let base = serve(app).await;

        let mut settings = settings("logcluster", &format!("{base}/documents"));
        settings.limit = 1;
        settings.credentials = Credentials::ApiKey {
            header: "X-API-Key".to_string(),
            key: "lc-key".to_string(),
        };

        let documents = LogclusterAdapter::new(settings).unwrap().fetch().await.unwrap();
        assert_eq!(documents.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_without_key_fails() {
        let app = Router::new().route(
            "/documents",
            get(|| async { (StatusCode::FORBIDDEN, "missing key") }),
        );
        let base = serve(app).await;

        let adapter =
            LogclusterAdapter::new(settings("logcluster", &format!("{base}/documents"))).unwrap();
        let err = adapter.fetch().await.unwrap_err();
        assert!(matches!(err, ImportError::Http { status: 403, .. }));
        assert!(!err.is_retryable());
    }
}
