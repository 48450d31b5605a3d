//! The import reconciliation loop.
//!
//! One run of one importer:
//!
//! 1. fetch the source's documents (any failure aborts the run)
//! 2. load the importer's existing records
//! 3. per document: identify, decide, map, validate, submit, update record
//! 4. write every touched record back in one transaction
//!
//! Documents are handled one at a time. A document that cannot be mapped or
//! submitted is recorded and logged; the rest of the batch goes on.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::data_sources::{MapOutcome, SourceAdapter};
use crate::dedup::{Decision, decide};
use crate::error::{ImportError, SubmitError};
use crate::model::{ImportRecord, ImportStatus, RunSummary};
use crate::storage::Storage;
use crate::submitter::ContentSubmitter;
use crate::taxonomy::Taxonomy;

/// Drives importer runs against shared storage, submitter and taxonomy.
#[derive(Clone)]
pub struct Reconciler {
    storage: Storage,
    submitter: Arc<dyn ContentSubmitter>,
    taxonomy: Arc<Taxonomy>,
}

impl Reconciler {
    pub fn new(
        storage: Storage,
        submitter: Arc<dyn ContentSubmitter>,
        taxonomy: Arc<Taxonomy>,
    ) -> Self {
        Self {
            storage,
            submitter,
            taxonomy,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run one importer to completion.
    ///
    /// Returns an error only for run-level failures: fetching, storage, or a
    /// fatal mapping error. Nothing is persisted in that case.
    #[instrument(skip_all, fields(importer = %adapter.importer()))]
    pub async fn run(&self, adapter: &dyn SourceAdapter) -> Result<RunSummary, ImportError> {
        let importer = adapter.importer().to_string();
        let settings = adapter.settings();

        let documents = adapter.fetch().await.inspect_err(|e| {
            warn!(error = %e, retryable = e.is_retryable(), "Fetch failed, run aborted");
        })?;

        let mut summary = RunSummary {
            importer: importer.clone(),
            fetched: documents.len(),
            ..Default::default()
        };
        info!(fetched = summary.fetched, "Fetched documents");

        let mut records = self.storage.load_records(&importer).await?;
        let mut seen_ids = HashSet::new();
        let mut touched: Vec<String> = Vec::new();

        for doc in &documents {
            let identity = match adapter.identify(doc) {
                Ok(identity) => identity,
                Err(reason) => {
                    warn!(reason = %reason, "Skipping document without identity");
                    summary.skipped_invalid += 1;
                    continue;
                }
            };

            if !seen_ids.insert(identity.item_id.clone()) {
                debug!(item_id = %identity.item_id, "Repeated in batch, keeping first");
                continue;
            }

            let decision = decide(
                records.get(&identity.uuid),
                &identity.hash,
                settings.max_attempts,
            );
            match decision {
                Decision::SkipUnchanged | Decision::SkipDuplicate => {
                    debug!(item_id = %identity.item_id, ?decision, "Unchanged");
                    summary.skipped_unchanged += 1;
                    continue;
                }
                Decision::SkipExhausted => {
                    debug!(item_id = %identity.item_id, "Attempt ceiling reached");
                    summary.skipped_exhausted += 1;
                    continue;
                }
                Decision::New | Decision::Retry | Decision::Update => {}
            }

            let submission = match adapter.map_fields(doc, &identity, &self.taxonomy)? {
                MapOutcome::Ready(submission) => submission,
                MapOutcome::Skip(reason) => {
                    info!(item_id = %identity.item_id, reason = %reason, "Skipped by field mapper");
                    summary.skipped_invalid += 1;
                    continue;
                }
            };

            let now = Utc::now();
            let record = records.entry(identity.uuid.clone()).or_insert_with(|| {
                ImportRecord::new(
                    &importer,
                    &settings.provider_uuid,
                    adapter.bundle(),
                    &identity,
                    now,
                )
            });
            if decision == Decision::Update {
                record.reset_for_hash(&identity, now);
            }
            record.provider_uuid = settings.provider_uuid.clone();
            if !touched.contains(&identity.uuid) {
                touched.push(identity.uuid.clone());
            }

            if let Err(violation) = submission.validate() {
                record.mark_failure(&format!("validation failed: {violation}"), now);
                warn!(
                    item_id = %identity.item_id,
                    attempts = record.attempts,
                    error = %violation,
                    "Invalid submission"
                );
                summary.failed += 1;
                continue;
            }

            summary.submitted += 1;
            match self.submitter.submit(&submission).await {
                Ok(entity) => {
                    record.mark_success(entity, Utc::now());
                    info!(
                        item_id = %identity.item_id,
                        uuid = %identity.uuid,
                        entity_id = entity.id,
                        "Imported"
                    );
                    summary.created += 1;
                }
                Err(SubmitError::Duplicate(message)) => {
                    record.mark_duplicate(&message, Utc::now());
                    warn!(item_id = %identity.item_id, message = %message, "Duplicate content");
                    summary.duplicates += 1;
                }
                Err(e) => {
                    record.mark_failure(&e.to_string(), Utc::now());
                    warn!(
                        item_id = %identity.item_id,
                        attempts = record.attempts,
                        error = %e,
                        "Submission failed"
                    );
                    summary.failed += 1;
                }
            }
        }

        let changed: Vec<ImportRecord> = touched
            .iter()
            .filter_map(|uuid| records.get(uuid).cloned())
            .collect();
        self.storage.save_records(&changed).await?;

        summary.processed_count = self
            .storage
            .count_by_status(&importer, ImportStatus::Success)
            .await?;

        info!(
            fetched = summary.fetched,
            submitted = summary.submitted,
            created = summary.created,
            failed = summary.failed,
            duplicates = summary.duplicates,
            skipped_unchanged = summary.skipped_unchanged,
            skipped_exhausted = summary.skipped_exhausted,
            skipped_invalid = summary.skipped_invalid,
            processed_count = summary.processed_count,
            "Run complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use crate::config::SourceSettings;
    use crate::dedup::content_hash;
    use crate::model::{Bundle, DocumentIdentity, EntityRef, NormalizedSubmission, RawDocument};

    /// Serves a fixed batch, or fails the fetch.
    struct StaticSource {
        settings: SourceSettings,
        documents: Mutex<Vec<Value>>,
        fail_fetch: bool,
    }

    impl StaticSource {
        fn new(documents: Vec<Value>) -> Self {
            Self {
                settings: SourceSettings::with_defaults("echo", "provider").unwrap(),
                documents: Mutex::new(documents),
                fail_fetch: false,
            }
        }

        fn replace(&self, documents: Vec<Value>) {
            *self.documents.lock().unwrap() = documents;
        }
    }

    #[async_trait]
    impl SourceAdapter for StaticSource {
        fn settings(&self) -> &SourceSettings {
            &self.settings
        }

        fn bundle(&self) -> Bundle {
            Bundle::Report
        }

        async fn fetch(&self) -> Result<Vec<RawDocument>, ImportError> {
            if self.fail_fetch {
                return Err(ImportError::Http {
                    importer: "echo".to_string(),
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            Ok(self
                .documents
                .lock()
                .unwrap()
                .iter()
                .cloned()
                .filter_map(RawDocument::from_value)
                .collect())
        }

        fn item_id(&self, doc: &RawDocument) -> Option<String> {
            doc.text("id")
        }

        fn canonical_url(&self, doc: &RawDocument) -> Option<String> {
            doc.text("url")
        }

        fn compute_hash(&self, doc: &RawDocument) -> String {
            content_hash(doc, &["id", "title", "url"])
        }

        fn map_fields(
            &self,
            doc: &RawDocument,
            identity: &DocumentIdentity,
            _taxonomy: &Taxonomy,
        ) -> Result<MapOutcome, ImportError> {
            Ok(match doc.text("title") {
                Some(title) => MapOutcome::Ready(Box::new(NormalizedSubmission::new(
                    &self.settings.provider_uuid,
                    Bundle::Report,
                    identity,
                    &title,
                ))),
                None => MapOutcome::Skip("missing title".to_string()),
            })
        }
    }

    /// Records submissions; titles starting with "fail" or "dup" are rejected.
    #[derive(Default)]
    struct RecordingSubmitter {
        submitted: Mutex<Vec<String>>,
    }

    impl RecordingSubmitter {
        fn calls(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ContentSubmitter for RecordingSubmitter {
        async fn submit(&self, submission: &NormalizedSubmission) -> Result<EntityRef, SubmitError> {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(submission.title.clone());
            if submission.title.starts_with("fail") {
                return Err(SubmitError::Transport("HTTP 503: unavailable".to_string()));
            }
            if submission.title.starts_with("dup") {
                return Err(SubmitError::Duplicate("exists as node 1".to_string()));
            }
            let id = submitted.len() as i64;
            Ok(EntityRef { id, revision_id: id })
        }
    }

    fn doc(id: &str, title: &str) -> Value {
        json!({"id": id, "title": title, "url": format!("https://example.org/{id}")})
    }

    async fn setup() -> (Reconciler, Arc<RecordingSubmitter>) {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let submitter = Arc::new(RecordingSubmitter::default());
        let taxonomy = Arc::new(Taxonomy::reliefweb().unwrap());
        (Reconciler::new(storage, submitter.clone(), taxonomy), submitter)
    }

    async fn record(reconciler: &Reconciler, id: &str) -> ImportRecord {
        reconciler
            .storage()
            .load_records("echo")
            .await
            .unwrap()
            .into_values()
            .find(|r| r.imported_item_id == id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_documents_are_not_resubmitted() {
        let (reconciler, submitter) = setup().await;
        let source = StaticSource::new(vec![doc("1", "One"), doc("2", "Two")]);

        let first = reconciler.run(&source).await.unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.processed_count, 2);

        let second = reconciler.run(&source).await.unwrap();
        assert_eq!(second.submitted, 0);
        assert_eq!(second.skipped_unchanged, 2);
        assert_eq!(second.processed_count, 2);
        assert_eq!(submitter.calls(), 2);
        assert_eq!(record(&reconciler, "1").await.attempts, 0);
    }

    #[tokio::test]
    async fn test_failures_count_up_to_ceiling() {
        let (reconciler, submitter) = setup().await;
        let source = StaticSource::new(vec![doc("1", "failing")]);

        for attempt in 1..=3 {
            let summary = reconciler.run(&source).await.unwrap();
            assert_eq!(summary.failed, 1);
            let rec = record(&reconciler, "1").await;
            assert_eq!(rec.status, ImportStatus::Error);
            assert_eq!(rec.attempts, attempt);
            assert!(rec.message.contains("503"));
        }

        let summary = reconciler.run(&source).await.unwrap();
        assert_eq!(summary.skipped_exhausted, 1);
        assert_eq!(summary.submitted, 0);
        assert_eq!(submitter.calls(), 3);
    }

    #[tokio::test]
    async fn test_content_change_resets_attempts() {
        let (reconciler, _) = setup().await;
        let source = StaticSource::new(vec![doc("1", "failing")]);
        for _ in 0..3 {
            reconciler.run(&source).await.unwrap();
        }

        source.replace(vec![doc("1", "Fixed title")]);
        let summary = reconciler.run(&source).await.unwrap();
        assert_eq!(summary.created, 1);

        let rec = record(&reconciler, "1").await;
        assert_eq!(rec.status, ImportStatus::Success);
        assert_eq!(rec.attempts, 0);
        assert_eq!(rec.entity_id, Some(4));
    }

    #[tokio::test]
    async fn test_invalid_documents_are_skipped() {
        let (reconciler, submitter) = setup().await;
        let source = StaticSource::new(vec![
            json!({"title": "no id", "url": "https://example.org/x"}),
            json!({"id": "2", "title": "no url"}),
            json!({"id": "3", "url": "https://example.org/3"}),
            doc("4", "Valid"),
        ]);

        let summary = reconciler.run(&source).await.unwrap();
        assert_eq!(summary.fetched, 4);
        assert_eq!(summary.skipped_invalid, 3);
        assert_eq!(summary.created, 1);
        assert_eq!(submitter.calls(), 1);
        assert_eq!(reconciler.storage().load_records("echo").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_ids_keep_first() {
        let (reconciler, submitter) = setup().await;
        let source = StaticSource::new(vec![doc("1", "First"), doc("1", "Second")]);

        let summary = reconciler.run(&source).await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(*submitter.submitted.lock().unwrap(), vec!["First".to_string()]);
    }

    #[tokio::test]
    async fn test_duplicates_are_terminal_until_changed() {
        let (reconciler, submitter) = setup().await;
        let source = StaticSource::new(vec![doc("1", "dup report")]);

        let first = reconciler.run(&source).await.unwrap();
        assert_eq!(first.duplicates, 1);
        assert_eq!(record(&reconciler, "1").await.status, ImportStatus::Duplicate);

        let second = reconciler.run(&source).await.unwrap();
        assert_eq!(second.submitted, 0);
        assert_eq!(submitter.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_persists_nothing() {
        let (reconciler, submitter) = setup().await;
        let mut source = StaticSource::new(vec![doc("1", "One")]);
        source.fail_fetch = true;

        let err = reconciler.run(&source).await.unwrap_err();
        assert!(matches!(err, ImportError::Http { status: 500, .. }));
        assert_eq!(submitter.calls(), 0);
        assert!(reconciler.storage().load_records("echo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_is_recorded() {
        let (reconciler, submitter) = setup().await;
        let mut source = StaticSource::new(vec![doc("1", "One")]);
        source.settings.provider_uuid = String::new();

        let summary = reconciler.run(&source).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(submitter.calls(), 0);

        let rec = record(&reconciler, "1").await;
        assert_eq!(rec.status, ImportStatus::Error);
        assert!(rec.message.starts_with("validation failed"));
    }
}
