//! WorkDay job postings.
//!
//! Job postings from a WorkDay recruiting tenant, read with an OAuth2
//! access token obtained from a refresh token at the start of each run.
//! Postings are paged by `offset` and `limit` and submitted to the `job`
//! bundle.
//!
//! # Privacy
//!
//! Only the public posting is read. Hiring manager and recruiter fields are
//! never hashed or mapped.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{MapOutcome, SourceAdapter, extract_documents, parse_datetime, term_text};
use crate::config::SourceSettings;
use crate::dedup::content_hash;
use crate::error::ImportError;
use crate::fetcher::HttpFetcher;
use crate::model::{Bundle, DocumentIdentity, NormalizedSubmission, RawDocument};
use crate::taxonomy::{LookupTable, Taxonomy, push_unique};

/// ReliefWeb source term for the hiring organization.
const WORKDAY_SOURCE_ID: i64 = 2868;

/// Largest page the API serves.
const PAGE_SIZE: usize = 100;

const HASHED_FIELDS: &[&str] = &[
    "id",
    "title",
    "externalUrl",
    "jobDescription",
    "startDate",
    "endDate",
    "location",
    "jobFamily",
];

/// WorkDay job families mapped to ReliefWeb career category terms.
const JOB_FAMILIES: &[(&str, i64)] = &[
    ("Administration", 6863),
    ("Finance", 6863),
    ("Partnership and Resource Mobilization", 6864),
    ("Information Technology", 6866),
    ("Supply", 6868),
    ("Procurement", 6868),
    ("External Relations", 6869),
    ("Communications", 6869),
    ("Programme", 6871),
    ("Protection", 6871),
];

/// Adapter for WorkDay job postings.
pub struct WorkdayAdapter {
    settings: SourceSettings,
    fetcher: HttpFetcher,
    job_families: LookupTable,
}

impl WorkdayAdapter {
    /// Create a new WorkDay adapter.
    ///
    /// # Arguments
    ///
    /// * `settings` - Importer settings with OAuth2 refresh-token credentials
    pub fn new(settings: SourceSettings) -> Result<Self, ImportError> {
        let fetcher = HttpFetcher::new(&settings)?;
        let job_families =
            LookupTable::build("workday_job_family", JOB_FAMILIES.iter().copied())?;
        Ok(Self {
            settings,
            fetcher,
            job_families,
        })
    }

    /// Families already named after a career category map directly; the
    /// rest go through the WorkDay table.
    fn career_categories(&self, doc: &RawDocument, taxonomy: &Taxonomy) -> Vec<i64> {
        let mut categories = Vec::new();
        for family in doc.list("jobFamily") {
            let Some(family) = term_text(family, &["descriptor"]) else {
                continue;
            };
            if let Some(id) = taxonomy
                .career_categories
                .get(&family)
                .or_else(|| self.job_families.get(&family))
            {
                push_unique(&mut categories, id);
            }
        }
        categories
    }
}

fn total(body: &Option<Value>) -> Option<usize> {
    body.as_ref()?
        .get("total")?
        .as_u64()
        .and_then(|total| usize::try_from(total).ok())
}

#[async_trait]
impl SourceAdapter for WorkdayAdapter {
    fn settings(&self) -> &SourceSettings {
        &self.settings
    }

    fn bundle(&self) -> Bundle {
        Bundle::Job
    }

    async fn fetch(&self) -> Result<Vec<RawDocument>, ImportError> {
        let session = self.fetcher.open_session().await?;
        let limit = self.settings.limit;
        let mut documents = Vec::new();
        let mut offset = 0;

        while documents.len() < limit {
            let page_size = PAGE_SIZE.min(limit - documents.len());
            let body = session
                .get_json(
                    &self.settings.base_url,
                    &[("limit", page_size.to_string()), ("offset", offset.to_string())],
                )
                .await?;

            let total = total(&body);
            let page = extract_documents(self.importer(), body, &["data"]);
            let received = page.len();
            debug!(importer = %self.importer(), offset, received, "Fetched page");

            documents.extend(page);
            offset += received;

            if received < page_size || total.is_some_and(|total| offset >= total) {
                break;
            }
        }

        documents.truncate(limit);
        Ok(documents)
    }

    fn item_id(&self, doc: &RawDocument) -> Option<String> {
        doc.text("id").or_else(|| doc.text("jobPostingId"))
    }

    fn canonical_url(&self, doc: &RawDocument) -> Option<String> {
        doc.text("externalUrl")
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
        if let Some(country) = doc.pointer("location.country") {
            let id = term_text(country, &["ISO_3166-1_Alpha-3_Code", "iso3"])
                .and_then(|iso3| taxonomy.countries.by_iso3(&iso3))
                .or_else(|| {
                    term_text(country, &["descriptor"])
                        .and_then(|name| taxonomy.countries.by_name(&name))
                });
            if let Some(id) = id {
                push_unique(&mut countries, id);
            }
        }

        let mut submission =
            NormalizedSubmission::new(&self.settings.provider_uuid, Bundle::Job, identity, &title)
                .with_countries(countries);
        submission.body = doc.text("jobDescription").unwrap_or_default();
        submission.source = vec![WORKDAY_SOURCE_ID];
        submission.published = doc.get("startDate").and_then(parse_datetime);
        submission.career_categories = self.career_categories(doc, taxonomy);
        submission.closing_date = doc.get("endDate").and_then(parse_datetime);
        submission.how_to_apply = Some(format!(
            "Please apply online via the job posting: {}",
            identity.url
        ));

        Ok(MapOutcome::Ready(Box::new(submission)))
    }
}
