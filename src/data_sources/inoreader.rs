//! Inoreader stream contents.
//!
//! Editors curate feeds into an Inoreader stream and tag items with labels
//! of the form `key:value`:
//!
//! - `source:1503`: ReliefWeb source term (required)
//! - `country:YEM` or `country:Yemen`
//! - `language:fr`
//! - `format:Situation Report`
//! - `theme:Health`
//!
//! Items without a `source:` label are skipped. Pages are chained with the
//! `continuation` token until the limit is reached.
//!
//! # API Reference
//!
//! See: <https://www.inoreader.com/developers/stream-contents>

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{MapOutcome, SourceAdapter, extract_documents, parse_datetime};
use crate::config::SourceSettings;
use crate::dedup::content_hash;
use crate::error::ImportError;
use crate::fetcher::HttpFetcher;
use crate::model::{Bundle, DocumentIdentity, FileAttachment, NormalizedSubmission, RawDocument};
use crate::taxonomy::{Taxonomy, push_unique};

/// Stream read when none is configured.
const DEFAULT_STREAM: &str = "user/-/state/com.google/reading-list";

/// Largest page the API serves.
const PAGE_SIZE: usize = 100;

/// Marker preceding a label in a category ID.
const LABEL_MARKER: &str = "/label/";

/// Crawl and update stamps are left out.
const HASHED_FIELDS: &[&str] = &[
    "id",
    "title",
    "canonical",
    "alternate",
    "published",
    "summary",
    "categories",
    "enclosure",
];

/// Adapter for an Inoreader stream.
pub struct InoreaderAdapter {
    settings: SourceSettings,
    fetcher: HttpFetcher,
    stream: String,
}

impl InoreaderAdapter {
    /// Create a new Inoreader adapter.
    ///
    /// # Arguments
    ///
    /// * `settings` - Importer settings; `stream` defaults to the reading list
    pub fn new(settings: SourceSettings) -> Result<Self, ImportError> {
        let fetcher = HttpFetcher::new(&settings)?;
        let stream = settings
            .stream
            .clone()
            .unwrap_or_else(|| DEFAULT_STREAM.to_string());
        Ok(Self {
            settings,
            fetcher,
            stream,
        })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/stream/contents/{}",
            self.settings.base_url,
            urlencoding::encode(&self.stream)
        )
    }
}

/// `key:value` labels of an item, keys lowercased.
fn labels(doc: &RawDocument) -> Vec<(String, String)> {
    doc.list("categories")
        .into_iter()
        .filter_map(Value::as_str)
        .filter_map(|category| {
            let label = match category.rfind(LABEL_MARKER) {
                Some(position) => &category[position + LABEL_MARKER.len()..],
                None => category,
            };
            let (key, value) = label.split_once(':')?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            Some((key.trim().to_lowercase(), value.to_string()))
        })
        .collect()
}

fn first_href(doc: &RawDocument, field: &str) -> Option<String> {
    doc.list(field)
        .into_iter()
        .find_map(|link| link.get("href").and_then(crate::model::value_as_text))
}

#[async_trait]
impl SourceAdapter for InoreaderAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn bundle(&self) -> Bundle {
        Bundle::Report
    }

    async fn fetch(&self) -> Result<Vec<RawDocument>, ImportError> {
        let session = self.fetcher.open_session().await?;
        let url = self.stream_url();
        let limit = self.settings.limit;
        let mut documents = Vec::new();
        let mut continuation: Option<String> = None;

        while documents.len() < limit {
            let mut query = vec![("n", PAGE_SIZE.min(limit - documents.len()).to_string())];
            if let Some(token) = &continuation {
                query.push(("c", token.clone()));
            }

            let body = session.get_json(&url, &query).await?;
            continuation = body
                .as_ref()
                .and_then(|body| body.get("continuation"))
                .and_then(crate::model::value_as_text);

            let page = extract_documents(self.importer(), body, &["items"]);
            debug!(
                importer = %self.importer(),
                received = page.len(),
                more = continuation.is_some(),
                "Fetched page"
            );

            let received = page.len();
            documents.extend(page);
            if received == 0 || continuation.is_none() {
                break;
            }
        }

        documents.truncate(limit);
        Ok(documents)
    }

    fn item_id(&self, doc: &RawDocument) -> Option<String> {
        doc.text("id")
    }

    fn canonical_url(&self, doc: &RawDocument) -> Option<String> {
        first_href(doc, "canonical").or_else(|| first_href(doc, "alternate"))
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
        let labels = labels(doc);

        let mut sources = Vec::new();
        for (_, value) in labels.iter().filter(|(key, _)| key == "source") {
            if let Ok(id) = value.parse::<i64>() {
                push_unique(&mut sources, id);
            }
        }
        if sources.is_empty() {
            return Ok(MapOutcome::Skip("no source tag".to_string()));
        }

        let Some(title) = doc.text("title") else {
            return Ok(MapOutcome::Skip("missing title".to_string()));
        };

        let values = |wanted: &str| -> Vec<&str> {
            labels
                .iter()
                .filter(|(key, _)| key == wanted)
                .map(|(_, value)| value.as_str())
                .collect()
        };

        let mut countries = Vec::new();
        for value in values("country") {
            if let Some(id) = taxonomy
                .countries
                .by_iso3(value)
                .or_else(|| taxonomy.countries.by_name(value))
            {
                push_unique(&mut countries, id);
            }
        }
        if countries.is_empty() {
            countries = taxonomy.countries.mentioned_in(&title);
        }
        let countries = taxonomy.countries.prioritize_by_title(&title, countries);

        let mut submission =
            NormalizedSubmission::new(&self.settings.provider_uuid, Bundle::Report, identity, &title)
                .with_countries(countries)
                .with_languages(taxonomy.languages.map_all(values("language")))
                .with_formats(taxonomy.formats.map_all(values("format")));
        submission.theme = taxonomy.themes.map_all(values("theme"));
        submission.source = sources;
        submission.body = doc
            .text("summary.content")
            .or_else(|| doc.text("content.content"))
            .unwrap_or_default();
        submission.published = doc.get("published").and_then(parse_datetime);
        submission.file = doc
            .list("enclosure")
            .into_iter()
            .filter(|enclosure| {
                enclosure
                    .get("type")
                    .and_then(Value::as_str)
                    .is_none_or(|kind| kind.contains("pdf"))
            })
            .filter_map(|enclosure| {
                let url = enclosure.get("href").and_then(crate::model::value_as_text)?;
                Some(FileAttachment {
                    filename: url.rsplit('/').next().map(str::to_string),
                    url,
                    description: None,
                })
            })
            .collect();

        Ok(MapOutcome::Ready(Box::new(submission)))
    }
}
