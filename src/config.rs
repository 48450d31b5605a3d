//! Service configuration loaded from environment variables.
//!
//! Every importer reads its settings from `RWIMPORT_<NAME>_*` variables, e.g.
//! `RWIMPORT_ECHO_TIMEOUT=20`. Credentials are picked from whichever
//! variables are present:
//!
//! | variables                                    | scheme                  |
//! |----------------------------------------------|-------------------------|
//! | `REFRESH_TOKEN`, `CLIENT_ID`, `CLIENT_SECRET`| OAuth2 refresh token    |
//! | `EMAIL`, `PASSWORD` (+ `APP_ID`, `APP_KEY`)  | ClientLogin             |
//! | `USERNAME`, `PASSWORD`                       | HTTP Basic              |
//! | `API_KEY` (+ `API_KEY_HEADER`)               | API key header          |
//!
//! Secrets are never printed: the `Debug` impl of [`Credentials`] masks them.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{ImportError, REDACTED};
use crate::model::DEFAULT_MAX_ATTEMPTS;

/// Environment variable prefix.
const PREFIX: &str = "RWIMPORT";

/// Default port for the HTTP API.
pub const DEFAULT_PORT: u16 = 3000;

/// Default database path.
pub const DEFAULT_DB_PATH: &str = "sqlite:reliefweb-import.db?mode=rwc";

/// Default submitter endpoint.
const DEFAULT_SUBMIT_URL: &str = "http://localhost:8080/api/v1/import";

/// Default request timeout in seconds, used as both connect and read timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of documents requested per run.
const DEFAULT_LIMIT: usize = 50;

/// Header used for API keys when none is configured.
const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Every importer this service knows about.
pub const IMPORTERS: [&str; 5] = ["echo", "worldbank", "inoreader", "logcluster", "workday"];

/// How to authenticate against a source.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    None,
    ApiKey {
        header: String,
        key: String,
    },
    Basic {
        username: String,
        password: String,
    },
    OAuthRefresh {
        token_url: String,
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ClientLogin {
        login_url: String,
        email: String,
        password: String,
        app_id: String,
        app_key: String,
    },
}

impl Credentials {
    /// Secret values that must be redacted from messages.
    pub fn secrets(&self) -> Vec<String> {
        match self {
            Credentials::None => vec![],
            Credentials::ApiKey { key, .. } => vec![key.clone()],
            Credentials::Basic { password, .. } => vec![password.clone()],
            Credentials::OAuthRefresh {
                client_secret,
                refresh_token,
                ..
            } => vec![client_secret.clone(), refresh_token.clone()],
            Credentials::ClientLogin {
                password, app_key, ..
            } => vec![password.clone(), app_key.clone()],
        }
    }

    fn scheme(&self) -> &'static str {
        match self {
            Credentials::None => "none",
            Credentials::ApiKey { .. } => "api_key",
            Credentials::Basic { .. } => "basic",
            Credentials::OAuthRefresh { .. } => "oauth_refresh",
            Credentials::ClientLogin { .. } => "client_login",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            _ => write!(f, "{}({})", self.scheme(), REDACTED),
        }
    }
}

/// Settings for one importer.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Importer name, e.g. "echo".
    pub name: String,
    /// API base URL.
    pub base_url: String,
    /// Connect and read timeout.
    pub timeout: Duration,
    /// Number of documents requested per run.
    pub limit: usize,
    /// Failed attempts after which a document is skipped.
    pub max_attempts: u32,
    /// Provider on whose behalf content is submitted.
    pub provider_uuid: String,
    pub credentials: Credentials,
    /// Stream or feed identifier, for sources that need one.
    pub stream: Option<String>,
}

impl SourceSettings {
    /// Settings with defaults for a known importer.
    pub fn with_defaults(name: &str, provider_uuid: &str) -> Result<Self, ImportError> {
        let base_url = default_base_url(name)
            .ok_or_else(|| ImportError::UnknownImporter(name.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            limit: DEFAULT_LIMIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            provider_uuid: provider_uuid.to_string(),
            credentials: Credentials::None,
            stream: None,
        })
    }
}

fn default_base_url(name: &str) -> Option<&'static str> {
    match name {
        "echo" => Some("https://erccportal.jrc.ec.europa.eu/API/ERCC/EchoFlash/GetPagedItems"),
        "worldbank" => Some("https://search.worldbank.org/api/v3/wds"),
        "inoreader" => Some("https://www.inoreader.com/reader/api/0"),
        "logcluster" => Some("https://logcluster.org/api/v1/documents"),
        "workday" => Some("https://wd3-services1.myworkday.com/ccx/api/recruiting/v4/unhcr/jobPostings"),
        _ => None,
    }
}

/// Settings for the outbound submitter.
#[derive(Clone)]
pub struct SubmitterSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl fmt::Debug for SubmitterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitterSettings")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| REDACTED))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Whole-service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub submitter: SubmitterSettings,
    pub sources: Vec<SourceSettings>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ImportError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ImportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{PREFIX}_{suffix}")).filter(|value| !value.trim().is_empty())
        };

        let port = match var("PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| ImportError::Config(format!("invalid {PREFIX}_PORT '{port}'")))?,
            None => DEFAULT_PORT,
        };

        let database_url = var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let submitter = SubmitterSettings {
            url: var("SUBMIT_URL").unwrap_or_else(|| DEFAULT_SUBMIT_URL.to_string()),
            api_key: var("SUBMIT_API_KEY"),
            timeout: parse_timeout(var("SUBMIT_TIMEOUT"), "SUBMIT_TIMEOUT")?,
        };

        let names: Vec<String> = match var("IMPORTERS") {
            Some(list) => list
                .split(',')
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
            None => IMPORTERS.iter().map(|name| name.to_string()).collect(),
        };

        let default_provider = var("PROVIDER_UUID");
        let mut sources = Vec::with_capacity(names.len());
        for name in names {
            let source_var = |suffix: &str| var(&format!("{}_{suffix}", name.to_uppercase()));
            sources.push(load_source(&name, source_var, default_provider.as_deref())?);
        }

        Ok(Self {
            port,
            database_url,
            submitter,
            sources,
        })
    }

    /// Settings for a named importer.
    pub fn source(&self, name: &str) -> Option<&SourceSettings> {
        self.sources.iter().find(|s| s.name == name)
    }
}

fn load_source<F>(
    name: &str,
    var: F,
    default_provider: Option<&str>,
) -> Result<SourceSettings, ImportError>
where
    F: Fn(&str) -> Option<String>,
{
    let provider_uuid = var("PROVIDER_UUID")
        .or_else(|| default_provider.map(str::to_string))
        .ok_or_else(|| {
            ImportError::Config(format!(
                "no provider UUID for importer '{name}' (set {PREFIX}_PROVIDER_UUID)"
            ))
        })?;

    let mut settings = SourceSettings::with_defaults(name, &provider_uuid)?;

    if let Some(base_url) = var("BASE_URL") {
        settings.base_url = base_url.trim_end_matches('/').to_string();
    }
    settings.timeout = parse_timeout(var("TIMEOUT"), &format!("{}_TIMEOUT", name.to_uppercase()))?;
    if let Some(limit) = var("LIMIT") {
        settings.limit = limit
            .parse()
            .map_err(|_| ImportError::Config(format!("invalid limit '{limit}' for '{name}'")))?;
    }
    if let Some(max_attempts) = var("MAX_ATTEMPTS") {
        settings.max_attempts = max_attempts.parse().map_err(|_| {
            ImportError::Config(format!("invalid max attempts '{max_attempts}' for '{name}'"))
        })?;
    }
    settings.stream = var("STREAM");
    settings.credentials = load_credentials(name, &var)?;

    Ok(settings)
}

fn load_credentials<F>(name: &str, var: &F) -> Result<Credentials, ImportError>
where
    F: Fn(&str) -> Option<String>,
{
    let missing = |what: &str| ImportError::Config(format!("importer '{name}' is missing {what}"));

    if let Some(refresh_token) = var("REFRESH_TOKEN") {
        return Ok(Credentials::OAuthRefresh {
            token_url: var("TOKEN_URL").ok_or_else(|| missing("TOKEN_URL"))?,
            client_id: var("CLIENT_ID").ok_or_else(|| missing("CLIENT_ID"))?,
            client_secret: var("CLIENT_SECRET").ok_or_else(|| missing("CLIENT_SECRET"))?,
            refresh_token,
        });
    }

    if let (Some(email), Some(password)) = (var("EMAIL"), var("PASSWORD")) {
        return Ok(Credentials::ClientLogin {
            login_url: var("LOGIN_URL").ok_or_else(|| missing("LOGIN_URL"))?,
            email,
            password,
            app_id: var("APP_ID").unwrap_or_default(),
            app_key: var("APP_KEY").unwrap_or_default(),
        });
    }

    if let (Some(username), Some(password)) = (var("USERNAME"), var("PASSWORD")) {
        return Ok(Credentials::Basic { username, password });
    }

    if let Some(key) = var("API_KEY") {
        return Ok(Credentials::ApiKey {
            header: var("API_KEY_HEADER").unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string()),
            key,
        });
    }

    Ok(Credentials::None)
}

fn parse_timeout(value: Option<String>, name: &str) -> Result<Duration, ImportError> {
    match value {
        Some(secs) => secs
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .ok_or_else(|| ImportError::Config(format!("invalid {name} '{secs}'"))),
        None => Ok(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
    }
}
