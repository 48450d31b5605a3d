//! ECHO Flash Updates.
//!
//! Daily flash items published by the European Civil Protection and
//! Humanitarian Aid Operations (ECHO) Emergency Response Coordination Centre.
//! One page of the most recent items is requested per run.
//!
//! # API Reference
//!
//! See: <https://erccportal.jrc.ec.europa.eu/>
//!
//! # Privacy
//!
//! Items are public situational summaries. No individual persons are tracked.

use async_trait::async_trait;

use super::{MapOutcome, SourceAdapter, extract_documents, parse_datetime, term_text};
use crate::config::SourceSettings;
use crate::dedup::content_hash;
use crate::error::ImportError;
use crate::fetcher::HttpFetcher;
use crate::model::{Bundle, DocumentIdentity, NormalizedSubmission, RawDocument};
use crate::taxonomy::{Taxonomy, push_unique};

/// ReliefWeb source term for ECHO.
const ECHO_SOURCE_ID: i64 = 620;

/// Every flash item is filed as a news item.
const ECHO_FORMAT: &str = "News and Press Release";

/// Fields whose change warrants a re-import. View counters and
/// `UpdatedOnDate` are left out.
const HASHED_FIELDS: &[&str] = &[
    "ContentItemId",
    "id",
    "Title",
    "Description",
    "Link",
    "Country",
    "Countries",
    "Language",
    "PublishedOnDate",
    "Sources",
];

/// Adapter for the ECHO Flash Updates API.
pub struct EchoAdapter {
    settings: SourceSettings,
    fetcher: HttpFetcher,
}

impl EchoAdapter {
    /// Create a new ECHO adapter.
    ///
    /// # Arguments
    ///
    /// * `settings` - Importer settings; an API key is optional
    pub fn new(settings: SourceSettings) -> Result<Self, ImportError> {
        let fetcher = HttpFetcher::new(&settings)?;
        Ok(Self { settings, fetcher })
    }

    fn countries(&self, doc: &RawDocument, taxonomy: &Taxonomy) -> Vec<i64> {
        let mut countries = Vec::new();
        for value in doc.list("Country").into_iter().chain(doc.list("Countries")) {
            let id = term_text(value, &["Iso3", "ISO3"])
                .and_then(|iso3| taxonomy.countries.by_iso3(&iso3))
                .or_else(|| {
                    term_text(value, &["Name", "Title"])
                        .and_then(|name| taxonomy.countries.by_name(&name))
                });
            if let Some(id) = id {
                push_unique(&mut countries, id);
            }
        }
        countries
    }
}

#[async_trait]
impl SourceAdapter for EchoAdapter {
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
            .get_json(
                &self.settings.base_url,
                &[("Limit", limit.to_string()), ("Page", "1".to_string())],
            )
            .await?;

        let mut documents = extract_documents(self.importer(), body, &["Items", "items"]);
        documents.truncate(limit);
        Ok(documents)
    }

    fn item_id(&self, doc: &RawDocument) -> Option<String> {
        doc.text("ContentItemId").or_else(|| doc.text("id"))
    }

    fn canonical_url(&self, doc: &RawDocument) -> Option<String> {
        doc.text("Link")
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
        let Some(title) = doc.text("Title") else {
            return Ok(MapOutcome::Skip("missing title".to_string()));
        };

        let countries = taxonomy
            .countries
            .prioritize_by_title(&title, self.countries(doc, taxonomy));
        let languages = doc
            .text("Language")
            .and_then(|language| taxonomy.languages.get(&language))
            .into_iter()
            .collect();
        let formats = taxonomy.formats.get(ECHO_FORMAT).into_iter().collect();

        let mut body = doc.text("Description").unwrap_or_default();
        let sources: Vec<String> = doc
            .list("Sources")
            .into_iter()
            .filter_map(|source| term_text(source, &["Name"]))
            .collect();
        if !sources.is_empty() {
            if !body.is_empty() {
                body.push_str("\n\n");
            }
            body.push_str(&format!("Sources: {}", sources.join(", ")));
        }

        let mut submission =
            NormalizedSubmission::new(&self.settings.provider_uuid, Bundle::Report, identity, &title)
                .with_countries(countries)
                .with_languages(languages)
                .with_formats(formats);
        submission.body = body;
        submission.source = vec![ECHO_SOURCE_ID];
        submission.published = doc
            .get("PublishedOnDate")
            .or_else(|| doc.get("CreatedOnDate"))
            .and_then(parse_datetime);

        Ok(MapOutcome::Ready(Box::new(submission)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::{Json, Router, extract::Query, routing::get};
    use serde_json::{Value, json};

    use crate::data_sources::testing::{serve, settings};
    use crate::taxonomy::{DEFAULT_LANGUAGE, WORLD};

    fn adapter() -> EchoAdapter {
        EchoAdapter::new(settings("echo", "http://127.0.0.1:9")).unwrap()
    }

    fn doc(value: Value) -> RawDocument {
        RawDocument::from_value(value).unwrap()
    }

    fn map(adapter: &EchoAdapter, doc: &RawDocument) -> MapOutcome {
        let taxonomy = Taxonomy::reliefweb().unwrap();
        let identity = adapter.identify(doc).unwrap();
        adapter.map_fields(doc, &identity, &taxonomy).unwrap()
    }

    fn ready(outcome: MapOutcome) -> NormalizedSubmission {
        match outcome {
            MapOutcome::Ready(submission) => *submission,
            MapOutcome::Skip(reason) => panic!("unexpected skip: {reason}"),
        }
    }

    #[test]
    fn test_maps_country_object_with_english_default() {
        let adapter = adapter();
        let doc = doc(json!({
            "id": "123",
            "Link": "http://x/doc",
            "Title": "T",
            "Country": {"Iso3": "YEM"}
        }));

        let submission = ready(map(&adapter, &doc));
        assert_eq!(submission.country, vec![225]);
        assert_eq!(submission.language, vec![DEFAULT_LANGUAGE]);
        assert_eq!(submission.source, vec![ECHO_SOURCE_ID]);
        assert_eq!(submission.url, "http://x/doc");
        assert_eq!(submission.provider, "provider-uuid");
    }

    #[test]
    fn test_country_in_title_comes_first() {
        let adapter = adapter();
        let doc = doc(json!({
            "ContentItemId": 77,
            "Link": "https://erccportal.jrc.ec.europa.eu/flash/77",
            "Title": "Kenya - Floods (DG ECHO, media)",
            "Country": [{"Iso3": "SOM"}, {"Name": "Kenya"}],
            "PublishedOnDate": "2024-05-01T09:00:00",
            "Description": "Heavy rains.",
            "Sources": [{"Name": "DG ECHO"}, {"Name": "Media"}]
        }));

        let submission = ready(map(&adapter, &doc));
        assert_eq!(submission.country, vec![131, 204]);
        assert_eq!(submission.body, "Heavy rains.\n\nSources: DG ECHO, Media");
        assert_eq!(submission.format, vec![8]);
        assert!(submission.published.is_some());
    }

    #[test]
    fn test_unknown_country_defaults_to_world() {
        let adapter = adapter();
        let doc = doc(json!({
            "id": 1,
            "Link": "http://x/1",
            "Title": "Regional overview",
            "Country": {"Iso3": "XXX"}
        }));

        assert_eq!(ready(map(&adapter, &doc)).country, vec![WORLD]);
    }

    #[test]
    fn test_missing_title_is_skipped() {
        let adapter = adapter();
        let doc = doc(json!({"id": 1, "Link": "http://x/1", "Title": "  "}));
        assert!(matches!(map(&adapter, &doc), MapOutcome::Skip(_)));
    }

    #[test]
    fn test_missing_link_has_no_identity() {
        let adapter = adapter();
        assert!(adapter.identify(&doc(json!({"id": 1, "Title": "T"}))).is_err());
        assert!(adapter.identify(&doc(json!({"Link": "http://x/1"}))).is_err());
    }

    #[test]
    fn test_hash_ignores_volatile_fields() {
        let adapter = adapter();
        let first = doc(json!({"id": 1, "Title": "T", "Views": 10, "UpdatedOnDate": "2024-05-01"}));
        let second = doc(json!({"id": 1, "Title": "T", "Views": 99, "UpdatedOnDate": "2024-06-01"}));
        let edited = doc(json!({"id": 1, "Title": "T2", "Views": 10}));

        assert_eq!(adapter.compute_hash(&first), adapter.compute_hash(&second));
        assert_ne!(adapter.compute_hash(&first), adapter.compute_hash(&edited));
    }

    #[tokio::test]
    async fn test_fetch_requests_limit() {
        let app = Router::new().route(
            "/flash",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                let limit: usize = query["Limit"].parse().unwrap();
                let items: Vec<Value> = (0..5)
                    .map(|i| json!({"ContentItemId": i, "Title": format!("Item {i}")}))
                    .take(limit)
                    .collect();
                Json(json!({"Items": items, "TotalCount": 5}))
            }),
        );
        let base = serve(app).await;

        let mut settings = settings("echo", &format!("{base}/flash"));
        settings.limit = 3;
        let adapter = EchoAdapter::new(settings).unwrap();

        let documents = adapter.fetch().await.unwrap();
        assert_eq!(documents.len(), 3);
        assert_eq!(adapter.item_id(&documents[0]).as_deref(), Some("0"));
    }
}
