use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use vox_core::errors::LiveError;

/// Environment fallbacks checked when no token has been adopted.
pub mod env_vars {
    pub const ACCESS_TOKEN: &str = "VOX_ACCESS_TOKEN";
    pub const PROJECT_ID: &str = "GOOGLE_CLOUD_PROJECT";
}

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Credentials for the live backend: an OAuth access token plus the
/// cloud project it belongs to.
#[derive(Clone)]
pub struct Credentials {
    pub access_token: SecretString,
    pub project_id: Option<String>,
    pub email: Option<String>,
}

/// Holds the current credentials and validates tokens handed over by
/// clients. Starts from environment fallbacks when present.
///
/// Priority:
/// 1. Token adopted via `adopt_token` (validated against tokeninfo)
/// 2. VOX_ACCESS_TOKEN env var (unvalidated, for local development)
/// 3. None — live starts fail with `AuthenticationRequired`
pub struct CredentialBroker {
    current: RwLock<Option<Credentials>>,
    http: reqwest::Client,
    tokeninfo_url: String,
}

impl CredentialBroker {
    pub fn new() -> Self {
        let current = std::env::var(env_vars::ACCESS_TOKEN)
            .ok()
            .filter(|t| !t.is_empty())
            .map(|token| Credentials {
                access_token: SecretString::from(token),
                project_id: std::env::var(env_vars::PROJECT_ID).ok(),
                email: None,
            });

        if current.is_some() {
            info!("credentials loaded from environment");
        }

        Self {
            current: RwLock::new(current),
            http: reqwest::Client::new(),
            tokeninfo_url: TOKENINFO_URL.to_string(),
        }
    }

    /// Override the tokeninfo endpoint (for tests).
    pub fn with_tokeninfo_url(mut self, url: impl Into<String>) -> Self {
        self.tokeninfo_url = url.into();
        self
    }

    /// Validate a client-supplied access token and adopt it as the current
    /// credentials. Returns the account email the token resolves to.
    pub async fn adopt_token(&self, token: &str) -> Result<Option<String>, LiveError> {
        if token.is_empty() {
            return Err(LiveError::AuthenticationRequired("empty token".into()));
        }

        let resp = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(|e| LiveError::ConnectFailed(format!("tokeninfo request: {e}")))?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "token validation rejected");
            return Err(LiveError::AuthenticationRequired(
                "token rejected by tokeninfo".into(),
            ));
        }

        let info: TokenInfo = resp
            .json()
            .await
            .map_err(|e| LiveError::Decode(format!("tokeninfo body: {e}")))?;

        if let Some(ref expires) = info.expires_in {
            if expires.parse::<i64>().unwrap_or(0) <= 0 {
                return Err(LiveError::AuthenticationRequired("token expired".into()));
            }
        }

        let email = info.email.clone();
        *self.current.write() = Some(Credentials {
            access_token: SecretString::from(token.to_string()),
            project_id: std::env::var(env_vars::PROJECT_ID).ok(),
            email: email.clone(),
        });
        info!("access token adopted");
        Ok(email)
    }

    /// The current credentials, if any.
    pub fn active(&self) -> Option<Credentials> {
        self.current.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn email(&self) -> Option<String> {
        self.current.read().as_ref().and_then(|c| c.email.clone())
    }

    /// Drop the current credentials. Sessions already connected keep their
    /// connection; new connect attempts will fail until a token is adopted.
    pub fn logout(&self) {
        *self.current.write() = None;
        info!("credentials cleared");
    }

    /// Bearer value for outbound requests, without exposing the secret in
    /// logs or debug output.
    pub fn bearer(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|c| format!("Bearer {}", c.access_token.expose_secret()))
    }
}

impl Default for CredentialBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    expires_in: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    scope: Option<String>,
}
