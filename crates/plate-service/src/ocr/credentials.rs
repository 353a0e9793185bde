//! Credentials for the Cloud Vision API.
//!
//! The credentials file is either a Google service-account key, exchanged for
//! short-lived OAuth2 bearer tokens, or a plain `{"api_key": "..."}` object.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const VISION_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service-account key as downloaded from the cloud console
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CredentialsFile {
    ApiKey { api_key: String },
    ServiceAccount(ServiceAccountKey),
}

/// How requests to the Vision API are authorized
pub enum VisionAuth {
    ApiKey(String),
    ServiceAccount(TokenSource),
}

impl std::fmt::Debug for VisionAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(..)"),
            Self::ServiceAccount(source) => {
                write!(f, "ServiceAccount({})", source.client_email())
            }
        }
    }
}

impl VisionAuth {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read OCR credentials {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Invalid OCR credentials in {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: CredentialsFile = serde_json::from_str(raw)
            .context("Expected a service-account key or an {\"api_key\": ...} object")?;

        match parsed {
            CredentialsFile::ApiKey { api_key } => Ok(Self::ApiKey(api_key)),
            CredentialsFile::ServiceAccount(key) => {
                Ok(Self::ServiceAccount(TokenSource::new(key)?))
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// When a token with `lifetime` left should be replaced; `None` when the
/// deadline does not fit in an `Instant`, so the token is not cached.
fn refresh_deadline(now: Instant, lifetime: Duration) -> Option<Instant> {
    now.checked_add(lifetime.saturating_sub(TOKEN_REFRESH_MARGIN))
}

/// Exchanges signed service-account assertions for bearer tokens, caching
/// each token until shortly before it expires.
pub struct TokenSource {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub fn new(key: ServiceAccountKey) -> Result<Self> {
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Service-account private_key is not a valid RSA PEM key")?;

        Ok(Self {
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Build the RS256 JWT sent to the token endpoint
    pub fn signed_assertion(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: VISION_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .context("Failed to sign service-account assertion")
    }

    /// Current bearer token, fetching a new one when the cached token is due
    pub async fn access_token(&self, http: &reqwest::Client) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let assertion = self.signed_assertion()?;
        let response = http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("Token request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Token endpoint returned {}: {}", status, body));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Invalid token endpoint response")?;

        let lifetime = Duration::from_secs(token.expires_in);
        tracing::debug!(
            client_email = %self.key.client_email,
            expires_in = token.expires_in,
            "Obtained OCR access token"
        );

        *cached = refresh_deadline(Instant::now(), lifetime).map(|refresh_at| CachedToken {
            value: token.access_token.clone(),
            refresh_at,
        });

        Ok(token.access_token)
    }
}
