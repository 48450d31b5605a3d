//! World Bank Documents & Reports.
//!
//! The WDS search API returns documents as an object keyed by document ID,
//! alongside a `facets` entry that is not a document. Results are paged by
//! offset (`os`) and page size (`rows`).
//!
//! # API Reference
//!
//! See: <https://documents.worldbank.org/en/publication/documents-reports/api>
//!
//! # Notes
//!
//! Download counters and modification stamps change without the document
//! changing and are not hashed.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{MapOutcome, SourceAdapter, parse_datetime};
use crate::config::SourceSettings;
use crate::dedup::content_hash;
use crate::error::ImportError;
use crate::fetcher::HttpFetcher;
use crate::model::{Bundle, DocumentIdentity, FileAttachment, NormalizedSubmission, RawDocument};
use crate::taxonomy::{LookupTable, Taxonomy, push_unique};

/// ReliefWeb source term for the World Bank.
const WORLD_BANK_SOURCE_ID: i64 = 1503;

/// Largest page the API serves.
const PAGE_SIZE: usize = 50;

/// Fields requested from the API.
const FIELD_LIST: &str = "id,display_title,url,pdfurl,docdt,count,countrycode,lang,docty,abstracts";

const HASHED_FIELDS: &[&str] = &[
    "id",
    "display_title",
    "url",
    "pdfurl",
    "docdt",
    "count",
    "countrycode",
    "lang",
    "docty",
    "abstracts",
];

/// WDS document types mapped to ReliefWeb format terms.
const DOCUMENT_TYPES: &[(&str, i64)] = &[
    ("Working Paper", 3),
    ("Policy Research Working Paper", 3),
    ("Brief", 3),
    ("Publication", 3),
    ("Economic Updates and Modeling", 3),
    ("Country Economic Memorandum", 3),
    ("Poverty Assessment", 5),
    ("Project Appraisal Document", 5),
    ("Implementation Completion and Results Report", 6),
    ("Project Performance Assessment Report", 6),
    ("Press Release", 8),
    ("Map", 12),
];

/// Adapter for the World Bank WDS API.
pub struct WorldBankAdapter {
    settings: SourceSettings,
    fetcher: HttpFetcher,
    document_types: LookupTable,
}

impl WorldBankAdapter {
    /// Create a new World Bank adapter.
    pub fn new(settings: SourceSettings) -> Result<Self, ImportError> {
        let fetcher = HttpFetcher::new(&settings)?;
        let document_types =
            LookupTable::build("worldbank_document_type", DOCUMENT_TYPES.iter().copied())?;
        Ok(Self {
            settings,
            fetcher,
            document_types,
        })
    }
}

/// Documents of one page, skipping the `facets` entry.
///
/// Also returns how many entries the page held, which drives the offset.
/// Entries without an `id` stay in the batch so they are reported as
/// invalid rather than dropped here.
fn page_documents(body: Option<Value>) -> (Vec<RawDocument>, usize, Option<usize>) {
    let Some(Value::Object(mut body)) = body else {
        return (Vec::new(), 0, None);
    };

    let total = body
        .get("total")
        .and_then(|total| match total {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .and_then(|total| usize::try_from(total).ok());

    let entries: Vec<Value> = match body.remove("documents") {
        Some(Value::Object(documents)) => documents
            .into_iter()
            .filter(|(key, _)| key != "facets")
            .map(|(_, document)| document)
            .collect(),
        _ => Vec::new(),
    };
    let received = entries.len();
    let documents = entries.into_iter().filter_map(RawDocument::from_value).collect();

    (documents, received, total)
}

#[async_trait]
impl SourceAdapter for WorldBankAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn bundle(&self) -> Bundle {
        Bundle::Report
    }

    async fn fetch(&self) -> Result<Vec<RawDocument>, ImportError> {
        let session = self.fetcher.open_session().await?;
        let limit = self.settings.limit;
        let mut documents = Vec::new();
        let mut offset = 0;

        while documents.len() < limit {
            let rows = PAGE_SIZE.min(limit - documents.len());
            let body = session
                .get_json(
                    &self.settings.base_url,
                    &[
                        ("format", "json".to_string()),
                        ("fl", FIELD_LIST.to_string()),
                        ("srt", "docdt".to_string()),
                        ("order", "desc".to_string()),
                        ("rows", rows.to_string()),
                        ("os", offset.to_string()),
                    ],
                )
                .await?;

            let (page, received, total) = page_documents(body);
            debug!(importer = %self.importer(), offset, received, "Fetched page");

            documents.extend(page);
            offset += received;

            if received < rows || total.is_some_and(|total| offset >= total) {
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
        let Some(title) = doc.text("display_title") else {
            return Ok(MapOutcome::Skip("missing title".to_string()));
        };

        // Names in `count` may contain commas ("Yemen, Republic of"), so
        // they are searched for rather than split.
        let mut countries = Vec::new();
        for code in doc.text("countrycode").iter().flat_map(|codes| codes.split([',', ';'])) {
            if let Some(id) = taxonomy.countries.by_iso3(code.trim()) {
                push_unique(&mut countries, id);
            }
        }
        if let Some(names) = doc.text("count") {
            for id in taxonomy.countries.mentioned_in(&names) {
                push_unique(&mut countries, id);
            }
        }
        let countries = taxonomy.countries.prioritize_by_title(&title, countries);

        let languages = doc
            .text("lang")
            .map(|langs| {
                taxonomy
                    .languages
                    .map_all(langs.split([',', ';']).map(str::trim))
            })
            .unwrap_or_default();

        let formats = doc
            .text("docty")
            .and_then(|docty| self.document_types.get(&docty))
            .into_iter()
            .collect();

        let mut submission =
            NormalizedSubmission::new(&self.settings.provider_uuid, Bundle::Report, identity, &title)
                .with_countries(countries)
                .with_languages(languages)
                .with_formats(formats);
        submission.body = doc
            .text("abstracts.cdata!")
            .or_else(|| doc.text("abstracts"))
            .unwrap_or_default();
        submission.source = vec![WORLD_BANK_SOURCE_ID];
        submission.published = doc.get("docdt").and_then(parse_datetime);
        submission.file = doc
            .text("pdfurl")
            .map(|url| FileAttachment {
                filename: url.rsplit('/').next().map(str::to_string),
                url,
                description: None,
            })
            .into_iter()
            .collect();

        Ok(MapOutcome::Ready(Box::new(submission)))
    }
}
