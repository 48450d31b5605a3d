//! Multi-run reconciliation scenarios against mock sources.
//!
//! Each test drives real adapters through several runs and checks what the
//! submitter saw and what was persisted between runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

use reliefweb_import::api::{self, AppState};
use reliefweb_import::config::{Credentials, SourceSettings};
use reliefweb_import::data_sources::{InoreaderAdapter, SourceAdapter, WorldBankAdapter};
use reliefweb_import::error::{ImportError, SubmitError};
use reliefweb_import::model::{EntityRef, ImportStatus, NormalizedSubmission, RunSummary};
use reliefweb_import::reconcile::Reconciler;
use reliefweb_import::storage::Storage;
use reliefweb_import::submitter::ContentSubmitter;
use reliefweb_import::taxonomy::Taxonomy;

/// Records titles; fails with a transport error while `down` is set.
#[derive(Default)]
struct FlakySubmitter {
    titles: Mutex<Vec<String>>,
    down: AtomicBool,
}

impl FlakySubmitter {
    fn calls(&self) -> usize {
        self.titles.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentSubmitter for FlakySubmitter {
    async fn submit(&self, submission: &NormalizedSubmission) -> Result<EntityRef, SubmitError> {
        let mut titles = self.titles.lock().unwrap();
        titles.push(submission.title.clone());
        if self.down.load(Ordering::SeqCst) {
            return Err(SubmitError::Transport("HTTP 503: maintenance".to_string()));
        }
        let id = 1000 + titles.len() as i64;
        Ok(EntityRef { id, revision_id: id })
    }
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn settings(name: &str, base_url: String) -> SourceSettings {
    let mut settings = SourceSettings::with_defaults(name, "provider-uuid").unwrap();
    settings.base_url = base_url;
    settings.timeout = Duration::from_secs(5);
    settings
}

async fn reconciler(submitter: Arc<FlakySubmitter>) -> Reconciler {
    let storage = Storage::new("sqlite::memory:").await.unwrap();
    Reconciler::new(storage, submitter, Arc::new(Taxonomy::reliefweb().unwrap()))
}

/// World Bank mock serving whatever `documents` currently holds.
async fn worldbank(documents: Arc<Mutex<Value>>) -> String {
    let app = Router::new().route(
        "/wds",
        get(move || {
            let documents = documents.clone();
            async move {
                let documents = documents.lock().unwrap().clone();
                Json(json!({"total": 1, "documents": documents}))
            }
        }),
    );
    format!("{}/wds", serve(app).await)
}

fn wds_document(title: &str, downloads: u32) -> Value {
    json!({
        "D1": {
            "id": "1",
            "display_title": title,
            "url": "https://documents.worldbank.org/curated/en/1",
            "count": "Somalia",
            "docty": "Brief",
            "download_count": downloads
        },
        "facets": {}
    })
}

#[tokio::test]
async fn test_only_meaningful_changes_are_resubmitted() {
    let documents = Arc::new(Mutex::new(wds_document("Somalia brief", 10)));
    let base = worldbank(documents.clone()).await;
    let submitter = Arc::new(FlakySubmitter::default());
    let reconciler = reconciler(submitter.clone()).await;
    let adapter = WorldBankAdapter::new(settings("worldbank", base)).unwrap();

    let first = assert_ok!(reconciler.run(&adapter).await);
    assert_eq!(first.created, 1);

    *documents.lock().unwrap() = wds_document("Somalia brief", 250);
    let second = assert_ok!(reconciler.run(&adapter).await);
    assert_eq!(second.skipped_unchanged, 1);
    assert_eq!(submitter.calls(), 1);

    *documents.lock().unwrap() = wds_document("Somalia brief (revised)", 250);
    let third = assert_ok!(reconciler.run(&adapter).await);
    assert_eq!(third.created, 1);
    assert_eq!(third.processed_count, 1);
    assert_eq!(submitter.calls(), 2);

    let records = assert_ok!(reconciler.storage().list_records("worldbank", None).await);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity_id, Some(1002));
}

#[tokio::test]
async fn test_submitter_outage_stops_at_ceiling_then_recovers_on_change() {
    let documents = Arc::new(Mutex::new(wds_document("Somalia brief", 10)));
    let base = worldbank(documents.clone()).await;
    let submitter = Arc::new(FlakySubmitter::default());
    submitter.down.store(true, Ordering::SeqCst);
    let reconciler = reconciler(submitter.clone()).await;

    let mut settings = settings("worldbank", base);
    settings.max_attempts = 2;
    let adapter = WorldBankAdapter::new(settings).unwrap();

    for _ in 0..2 {
        let summary = assert_ok!(reconciler.run(&adapter).await);
        assert_eq!(summary.failed, 1);
    }
    let exhausted = assert_ok!(reconciler.run(&adapter).await);
    assert_eq!(exhausted.skipped_exhausted, 1);
    assert_eq!(submitter.calls(), 2);

    let failed = assert_ok!(
        reconciler
            .storage()
            .list_records("worldbank", Some(ImportStatus::Error))
            .await
    );
    assert_eq!(failed[0].attempts, 2);
    assert!(failed[0].message.contains("maintenance"));

    // The submitter is back, but only new content is tried again.
    submitter.down.store(false, Ordering::SeqCst);
    let still_exhausted = assert_ok!(reconciler.run(&adapter).await);
    assert_eq!(still_exhausted.submitted, 0);

    *documents.lock().unwrap() = wds_document("Somalia brief, second edition", 10);
    let recovered = assert_ok!(reconciler.run(&adapter).await);
    assert_eq!(recovered.created, 1);
    assert_eq!(recovered.processed_count, 1);
}

#[tokio::test]
async fn test_fetch_failure_keeps_previous_state() {
    let documents = Arc::new(Mutex::new(wds_document("Somalia brief", 10)));
    let base = worldbank(documents).await;
    let submitter = Arc::new(FlakySubmitter::default());
    let reconciler = reconciler(submitter.clone()).await;

    let adapter = WorldBankAdapter::new(settings("worldbank", base)).unwrap();
    assert_ok!(reconciler.run(&adapter).await);

    let unreachable = WorldBankAdapter::new(settings(
        "worldbank",
        "http://127.0.0.1:9/wds".to_string(),
    ))
    .unwrap();
    let err = assert_err!(reconciler.run(&unreachable).await);
    assert!(matches!(err, ImportError::Transport { .. }));
    assert!(err.is_retryable());

    let records = assert_ok!(reconciler.storage().list_records("worldbank", None).await);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ImportStatus::Success);
}

/// Inoreader mock behind ClientLogin.
async fn inoreader() -> String {
    let app = Router::new()
        .route("/accounts/ClientLogin", post(|| async { "Auth=ino-token\n" }))
        .route(
            "/reader/api/0/stream/contents/*stream",
            get(|| async {
                Json(json!({
                    "items": [
                        {
                            "id": "tag:google.com,2005:reader/item/0001",
                            "title": "Lebanon: Flash Update #3",
                            "canonical": [{"href": "https://example.org/lb/3"}],
                            "categories": ["user/1/label/source:1503", "user/1/label/format:Situation Report"]
                        },
                        {
                            "id": "tag:google.com,2005:reader/item/0002",
                            "title": "Untagged post",
                            "canonical": [{"href": "https://example.org/untagged"}],
                            "categories": []
                        }
                    ]
                }))
            }),
        );
    serve(app).await
}

#[tokio::test]
async fn test_router_runs_inoreader_through_oneshot() {
    let base = inoreader().await;
    let submitter = Arc::new(FlakySubmitter::default());
    let reconciler = reconciler(submitter.clone()).await;

    let mut settings = settings("inoreader", format!("{base}/reader/api/0"));
    settings.credentials = Credentials::ClientLogin {
        login_url: format!("{base}/accounts/ClientLogin"),
        email: "editor@example.org".to_string(),
        password: "ino-password".to_string(),
        app_id: String::new(),
        app_key: String::new(),
    };
    let adapter: Box<dyn SourceAdapter> = Box::new(InoreaderAdapter::new(settings).unwrap());
    let app = api::router(AppState::new(reconciler, vec![adapter]));

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/importers/inoreader/run")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let summary: RunSummary = serde_json::from_slice(&body).unwrap();
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.skipped_invalid, 1);
    assert_eq!(*submitter.titles.lock().unwrap(), vec!["Lebanon: Flash Update #3"]);
}
