//! Credentials for the model and embeddings endpoints.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{Error, Result};

pub const COGNITIVE_SERVICES_RESOURCE: &str = "https://cognitiveservices.azure.com";

const API_KEY_HEADER: &str = "api-key";
const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Exactly one way of authenticating against an Azure OpenAI resource.
#[derive(Clone)]
pub enum AzureCredential {
    ApiKey(String),
    Token(Arc<dyn TokenProvider>),
}

impl std::fmt::Debug for AzureCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("AzureCredential::ApiKey(***)"),
            Self::Token(_) => f.write_str("AzureCredential::Token"),
        }
    }
}

impl AzureCredential {
    /// The header that authenticates one request.
    ///
    /// # Errors
    /// Returns an error if a token cannot be obtained or is not a valid header value.
    pub async fn header(&self) -> Result<(HeaderName, HeaderValue)> {
        match self {
            Self::ApiKey(key) => {
                let mut value = HeaderValue::from_str(key)?;
                value.set_sensitive(true);
                Ok((HeaderName::from_static(API_KEY_HEADER), value))
            }
            Self::Token(provider) => {
                let token = provider.token().await?;
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
                value.set_sensitive(true);
                Ok((AUTHORIZATION, value))
            }
        }
    }

    /// Fetches a token once so a misconfigured identity fails at start-up
    /// rather than on the first session.
    ///
    /// # Errors
    /// Returns an error if the token provider fails.
    pub async fn warm_up(&self) -> Result<()> {
        if let Self::Token(provider) = self {
            provider.token().await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum IdentitySource {
    AppService { endpoint: Url, secret: String },
    Imds,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Managed-identity tokens from the App Service identity endpoint or the
/// instance metadata service, cached until shortly before expiry.
pub struct ManagedIdentityCredential {
    client: Client,
    source: IdentitySource,
    client_id: Option<String>,
    resource: String,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ManagedIdentityCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            IdentitySource::AppService { endpoint, .. } => endpoint.as_str(),
            IdentitySource::Imds => IMDS_ENDPOINT,
        };
        f.debug_struct("ManagedIdentityCredential")
            .field("source", &source)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_on: Option<Timestamp>,
    expires_in: Option<Timestamp>,
}

/// Identity endpoints disagree on whether timestamps are strings or numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Number(u64),
    Text(String),
}

impl Timestamp {
    fn seconds(&self) -> Option<u64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl ManagedIdentityCredential {
    /// `endpoint` and `secret` are the App Service `IDENTITY_ENDPOINT` and
    /// `IDENTITY_HEADER`; without them the instance metadata service is used.
    ///
    /// # Errors
    /// Returns an error if the endpoint is not a URL or the HTTP client cannot be built.
    #[allow(clippy::result_large_err)]
    pub fn new(
        endpoint: Option<&str>,
        secret: Option<&str>,
        client_id: Option<String>,
    ) -> Result<Self> {
        let source = match (endpoint, secret) {
            (Some(endpoint), Some(secret)) => IdentitySource::AppService {
                endpoint: Url::parse(endpoint)?,
                secret: secret.to_string(),
            },
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::Config(
                    "IDENTITY_ENDPOINT and IDENTITY_HEADER must be set together".to_string(),
                ));
            }
            (None, None) => IdentitySource::Imds,
        };
        let client = Client::builder().timeout(TOKEN_REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            source,
            client_id,
            resource: COGNITIVE_SERVICES_RESOURCE.to_string(),
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<CachedToken> {
        let request = match &self.source {
            IdentitySource::AppService { endpoint, secret } => {
                let mut query = vec![
                    ("api-version", APP_SERVICE_API_VERSION),
                    ("resource", self.resource.as_str()),
                ];
                if let Some(client_id) = &self.client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.client
                    .get(endpoint.clone())
                    .query(&query)
                    .header("X-IDENTITY-HEADER", secret)
            }
            IdentitySource::Imds => {
                let mut query = vec![
                    ("api-version", IMDS_API_VERSION),
                    ("resource", self.resource.as_str()),
                ];
                if let Some(client_id) = &self.client_id {
                    query.push(("client_id", client_id.as_str()));
                }
                self.client
                    .get(IMDS_ENDPOINT)
                    .query(&query)
                    .header("Metadata", "true")
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "identity endpoint returned {status}: {}",
                crate::safe_truncate(&body, 256)
            )));
        }
        let body: TokenResponse = response.json().await?;
        let now = SystemTime::now();
        let expires_at = token_expiry(&body, now);
        tracing::debug!("Obtained managed identity token");
        Ok(CachedToken {
            token: body.access_token,
            expires_at,
        })
    }
}

fn token_expiry(body: &TokenResponse, now: SystemTime) -> SystemTime {
    if let Some(at) = body.expires_on.as_ref().and_then(Timestamp::seconds) {
        return UNIX_EPOCH + Duration::from_secs(at);
    }
    body.expires_in
        .as_ref()
        .and_then(Timestamp::seconds)
        .map_or(now, |secs| now + Duration::from_secs(secs))
}

fn is_fresh(token: &CachedToken, now: SystemTime) -> bool {
    token
        .expires_at
        .duration_since(now)
        .is_ok_and(|left| left > REFRESH_MARGIN)
}

#[async_trait]
impl TokenProvider for ManagedIdentityCredential {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if is_fresh(token, SystemTime::now()) {
                return Ok(token.token.clone());
            }
        }
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn token(&self) -> Result<String> {
            Ok("tok".to_string())
        }
    }

    #[tokio::test]
    async fn api_key_uses_api_key_header() {
        let (name, value) = AzureCredential::ApiKey("secret".into())
            .header()
            .await
            .unwrap();
        assert_eq!(name.as_str(), "api-key");
        assert_eq!(value.to_str().unwrap(), "secret");
        assert!(value.is_sensitive());
    }

    #[tokio::test]
    async fn token_uses_bearer_header() {
        let (name, value) = AzureCredential::Token(Arc::new(StaticToken))
            .header()
            .await
            .unwrap();
        assert_eq!(name, AUTHORIZATION);
        assert_eq!(value.to_str().unwrap(), "Bearer tok");
    }

    #[test]
    fn debug_output_hides_the_key() {
        let rendered = format!("{:?}", AzureCredential::ApiKey("secret".into()));
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn expiry_accepts_string_or_number_timestamps() {
        let now = UNIX_EPOCH + Duration::from_secs(1_000);
        let body: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_on":"5000"}"#).unwrap();
        assert_eq!(token_expiry(&body, now), UNIX_EPOCH + Duration::from_secs(5_000));

        let body: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":3599}"#).unwrap();
        assert_eq!(token_expiry(&body, now), now + Duration::from_secs(3_599));
    }

    #[test]
    fn tokens_are_refreshed_inside_the_margin() {
        let now = UNIX_EPOCH + Duration::from_secs(10_000);
        let soon = CachedToken {
            token: "a".into(),
            expires_at: now + Duration::from_secs(60),
        };
        let later = CachedToken {
            token: "b".into(),
            expires_at: now + Duration::from_secs(3_600),
        };
        assert!(!is_fresh(&soon, now));
        assert!(is_fresh(&later, now));
    }

    #[test]
    fn half_configured_app_service_identity_is_rejected() {
        let err = ManagedIdentityCredential::new(Some("http://localhost:8081/msi/token"), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
