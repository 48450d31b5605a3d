//! Outbound hand-off of normalized submissions.
//!
//! The submitter validates and persists content on the platform side. The
//! loop only sees the [`ContentSubmitter`] trait: a created/updated
//! [`EntityRef`] on success, a [`SubmitError`] otherwise.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::SubmitterSettings;
use crate::error::{SubmitError, redact};
use crate::fetcher::excerpt;
use crate::model::{EntityRef, NormalizedSubmission};

/// Anything that can persist a normalized submission.
#[async_trait]
pub trait ContentSubmitter: Send + Sync {
    async fn submit(&self, submission: &NormalizedSubmission) -> Result<EntityRef, SubmitError>;
}

/// Submits records as JSON to `{url}/{bundle}`.
#[derive(Clone)]
pub struct HttpSubmitter {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: i64,
    #[serde(alias = "revision")]
    revision_id: i64,
}

#[derive(Deserialize)]
struct SubmitErrorBody {
    #[serde(alias = "error")]
    message: String,
}

impl HttpSubmitter {
    pub fn new(settings: &SubmitterSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            url: settings.url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    fn redact(&self, message: &str) -> String {
        match &self.api_key {
            Some(key) => redact(message, &[key]),
            None => redact::<&str>(message, &[]),
        }
    }
}

#[async_trait]
impl ContentSubmitter for HttpSubmitter {
    async fn submit(&self, submission: &NormalizedSubmission) -> Result<EntityRef, SubmitError> {
        let url = format!("{}/{}", self.url, submission.bundle.as_str());
        debug!(uuid = %submission.uuid, url = %url, "Submitting");

        let mut request = self.client.post(&url).json(submission);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await.map_err(|e| {
            SubmitError::Transport(self.redact(&e.without_url().to_string()))
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SubmitError::Transport(self.redact(&e.to_string())))?;

        if status.is_success() {
            return serde_json::from_str::<SubmitResponse>(&body)
                .map(|entity| EntityRef {
                    id: entity.id,
                    revision_id: entity.revision_id,
                })
                .map_err(|e| SubmitError::Transport(format!("invalid submitter response: {e}")));
        }

        let message = serde_json::from_str::<SubmitErrorBody>(&body)
            .map(|body| body.message)
            .unwrap_or(body);
        let message = self.redact(&excerpt(&message));

        Err(match status.as_u16() {
            409 => SubmitError::Duplicate(message),
            400 | 422 => SubmitError::Validation(message),
            code => SubmitError::Transport(format!("HTTP {code}: {message}")),
        })
    }
}
