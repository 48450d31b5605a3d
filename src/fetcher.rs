//! HTTP plumbing shared by every source adapter.
//!
//! [`HttpFetcher`] owns the client and credentials for one importer. Each run
//! opens a [`FetchSession`], which performs any login or token exchange once
//! and then signs every request of the run.
//!
//! Errors leaving this module never contain credentials: URLs are stripped
//! from transport errors and every message goes through [`redact`].

use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{Credentials, SourceSettings};
use crate::error::{ImportError, redact};

/// User agent sent to every source.
const USER_AGENT: &str = concat!("reliefweb-import/", env!("CARGO_PKG_VERSION"));

/// Longest response excerpt included in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Client and credentials for one importer.
#[derive(Clone)]
pub struct HttpFetcher {
    importer: String,
    client: reqwest::Client,
    credentials: Credentials,
}

impl HttpFetcher {
    /// Build a fetcher whose timeout applies both to connecting and to the
    /// whole request.
    pub fn new(settings: &SourceSettings) -> Result<Self, ImportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.timeout)
            .timeout(settings.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ImportError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            importer: settings.name.clone(),
            client,
            credentials: settings.credentials.clone(),
        })
    }

    /// Resolve credentials into request authorization for one run.
    pub async fn open_session(&self) -> Result<FetchSession<'_>, ImportError> {
        let mut secrets = self.credentials.secrets();

        let auth = match &self.credentials {
            Credentials::None => SessionAuth::None,
            Credentials::ApiKey { header, key } => {
                SessionAuth::Headers(vec![(header.clone(), key.clone())])
            }
            Credentials::Basic { username, password } => SessionAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            Credentials::OAuthRefresh {
                token_url,
                client_id,
                client_secret,
                refresh_token,
            } => {
                let token = self
                    .refresh_access_token(token_url, client_id, client_secret, refresh_token, &secrets)
                    .await?;
                secrets.push(token.clone());
                SessionAuth::Headers(vec![("Authorization".to_string(), format!("Bearer {token}"))])
            }
            Credentials::ClientLogin {
                login_url,
                email,
                password,
                app_id,
                app_key,
            } => {
                let token = self
                    .client_login(login_url, email, password, app_id, app_key, &secrets)
                    .await?;
                secrets.push(token.clone());
                let mut headers = vec![(
                    "Authorization".to_string(),
                    format!("GoogleLogin auth={token}"),
                )];
                if !app_id.is_empty() {
                    headers.push(("AppId".to_string(), app_id.clone()));
                    headers.push(("AppKey".to_string(), app_key.clone()));
                }
                SessionAuth::Headers(headers)
            }
        };

        debug!(importer = %self.importer, "Fetch session opened");

        Ok(FetchSession {
            fetcher: self,
            auth,
            secrets,
        })
    }

    /// OAuth2 refresh-token grant, client credentials sent as Basic auth.
    async fn refresh_access_token(
        &self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
        secrets: &[String],
    ) -> Result<String, ImportError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let response = self
            .client
            .post(token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| self.auth_error(&transport_message(e), secrets))?;

        let body = checked_body(response)
            .await
            .map_err(|message| self.auth_error(&message, secrets))?;

        serde_json::from_str::<TokenResponse>(&body)
            .map(|token| token.access_token)
            .map_err(|e| self.auth_error(&format!("invalid token response: {e}"), secrets))
    }

    /// Google-style ClientLogin: the response carries an `Auth=` line.
    async fn client_login(
        &self,
        login_url: &str,
        email: &str,
        password: &str,
        app_id: &str,
        app_key: &str,
        secrets: &[String],
    ) -> Result<String, ImportError> {
        let mut request = self
            .client
            .post(login_url)
            .form(&[("Email", email), ("Passwd", password)]);
        if !app_id.is_empty() {
            request = request.header("AppId", app_id).header("AppKey", app_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.auth_error(&transport_message(e), secrets))?;

        let body = checked_body(response)
            .await
            .map_err(|message| self.auth_error(&message, secrets))?;

        body.lines()
            .find_map(|line| line.trim().strip_prefix("Auth="))
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .ok_or_else(|| self.auth_error("no auth token in login response", secrets))
    }

    fn auth_error(&self, message: &str, secrets: &[String]) -> ImportError {
        ImportError::Auth {
            importer: self.importer.clone(),
            message: redact(message, secrets),
        }
    }
}

/// Read a response body, turning non-success statuses into a message.
async fn checked_body(response: Response) -> Result<String, String> {
    let status = response.status();
    let body = response.text().await.map_err(transport_message)?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(format!("HTTP {}: {}", status.as_u16(), excerpt(&body)))
    }
}

fn transport_message(error: reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else {
        error.without_url().to_string()
    }
}

/// Trimmed response body, cut to [`MAX_ERROR_BODY`] characters.
pub(crate) fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

enum SessionAuth {
    None,
    Headers(Vec<(String, String)>),
    Basic { username: String, password: String },
}

/// An authorized view of a fetcher, valid for one run.
pub struct FetchSession<'a> {
    fetcher: &'a HttpFetcher,
    auth: SessionAuth,
    secrets: Vec<String>,
}

impl FetchSession<'_> {
    /// GET a JSON document. An empty body yields `Ok(None)`.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, ImportError> {
        debug!(importer = %self.fetcher.importer, url = %self.redact(url), "GET");
        let request = self.fetcher.client.get(url).query(query);
        self.execute(request).await
    }

    fn redact(&self, message: &str) -> String {
        redact(message, &self.secrets)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            SessionAuth::None => request,
            SessionAuth::Headers(headers) => headers
                .iter()
                .fold(request, |request, (name, value)| request.header(name, value)),
            SessionAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Option<Value>, ImportError> {
        let importer = &self.fetcher.importer;

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| ImportError::Transport {
                importer: importer.clone(),
                message: self.redact(&transport_message(e)),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ImportError::Transport {
            importer: importer.clone(),
            message: self.redact(&transport_message(e)),
        })?;

        if !status.is_success() {
            return Err(ImportError::Http {
                importer: importer.clone(),
                status: status.as_u16(),
                message: self.redact(&excerpt(&body)),
            });
        }

        if body.trim().is_empty() {
            debug!(importer = %importer, "Empty response body");
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ImportError::Decode {
                importer: importer.clone(),
                message: self.redact(&e.to_string()),
            })
    }
}
