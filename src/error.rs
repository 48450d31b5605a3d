//! Error types for the import pipeline.
//!
//! Two families of errors exist:
//!
//! - [`ImportError`]: run-level failures. A fetch that fails aborts the whole
//!   run for that source, since there is no document list to reconcile.
//! - [`SubmitError`]: per-document failures returned by the submitter. These
//!   are recorded on the document's import record and never abort the batch.
//!
//! # Secrets
//!
//! Messages carried by these errors are redacted before construction (see
//! [`redact`]). API keys, passwords and tokens must never reach a log line or
//! an HTTP response body.

use thiserror::Error;

/// Placeholder written in place of a secret.
pub const REDACTED: &str = "[REDACTED]";

/// Query parameter names whose values are masked in messages.
const SECRET_PARAMS: [&str; 6] = ["key", "api_key", "apikey", "token", "access_token", "password"];

/// Run-level error for an importer.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The source answered with a non-success status code.
    #[error("{importer}: HTTP {status} from source: {message}")]
    Http {
        importer: String,
        status: u16,
        message: String,
    },

    /// Connection, timeout or TLS failure.
    #[error("{importer}: transport error: {message}")]
    Transport { importer: String, message: String },

    /// The response body could not be decoded.
    #[error("{importer}: malformed response: {message}")]
    Decode { importer: String, message: String },

    /// Login or token exchange failed.
    #[error("{importer}: authentication failed: {message}")]
    Auth { importer: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("unknown importer '{0}'")]
    UnknownImporter(String),
}

impl ImportError {
    /// Whether a later run has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            ImportError::Http { status, .. } => *status >= 500 || *status == 429,
            ImportError::Transport { .. } => true,
            _ => false,
        }
    }
}

/// Failure reported by the content submitter for one document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The submission was rejected as invalid.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The content already exists under another entity.
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("submission transport error: {0}")]
    Transport(String),
}

/// Lookup table construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyError {
    #[error("lookup table '{table}' has duplicate key '{key}'")]
    DuplicateKey { table: String, key: String },
}

/// Replace every occurrence of the given secrets in `message`, then mask the
/// values of well-known secret query parameters.
pub fn redact<S: AsRef<str>>(message: &str, secrets: &[S]) -> String {
    let mut redacted = message.to_string();
    for secret in secrets {
        let secret = secret.as_ref();
        if !secret.is_empty() {
            redacted = redacted.replace(secret, REDACTED);
            let encoded = urlencoding::encode(secret);
            if encoded != secret {
                redacted = redacted.replace(encoded.as_ref(), REDACTED);
            }
        }
    }
    mask_secret_params(&redacted)
}

fn mask_secret_params(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;

    while let Some(pos) = rest.find('=') {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);
        out.push('=');
        let tail = &tail[1..];

        let name_start = head
            .char_indices()
            .rfind(|(_, c)| *c == '?' || *c == '&' || c.is_whitespace())
            .map_or(0, |(i, c)| i + c.len_utf8());
        let name = head[name_start..].to_ascii_lowercase();

        let value_len = tail
            .find(|c: char| c == '&' || c.is_whitespace() || c == '"' || c == ')')
            .unwrap_or(tail.len());

        if SECRET_PARAMS.contains(&name.as_str()) && value_len > 0 {
            out.push_str(REDACTED);
        } else {
            out.push_str(&tail[..value_len]);
        }
        rest = &tail[value_len..];
    }
    out.push_str(rest);
    out
}
