//! Entra ID client-secret credential.
//!
//! Exchanges a service principal's client id/secret for a bearer token with
//! the OAuth2 client-credentials grant.

use crate::identity::{BearerTokenProvider, TokenProvider};
use crate::models::{AzChatError, ConfigError, IdentityError, Result, ServicePrincipal};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Scope for Azure OpenAI (Cognitive Services) data-plane calls.
pub const COGNITIVE_SERVICES_SCOPE: &str = "https://cognitiveservices.azure.com/.default";

/// An access token and its expiry.
#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

impl AccessToken {
    /// Whether the token expires within `margin` of `now`.
    pub fn expires_within(&self, margin: ChronoDuration, now: DateTime<Utc>) -> bool {
        self.expires_on - margin <= now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client-secret credential for a service principal.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    principal: ServicePrincipal,
}

impl ClientSecretCredential {
    /// Create a credential for the given service principal.
    pub fn new(principal: ServicePrincipal) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(AzChatError::Network)?;

        Ok(Self { http, principal })
    }

    /// Tenant this credential authenticates against.
    pub fn tenant_id(&self) -> &str {
        &self.principal.tenant_id
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.principal.authority_host.trim_end_matches('/'),
            self.principal.tenant_id
        )
    }

    /// Request a token for `scope`.
    pub async fn get_token(&self, scope: &str) -> Result<AccessToken> {
        let requested_at = Utc::now();
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.principal.client_id.as_str()),
            ("client_secret", self.principal.client_secret.as_str()),
            ("scope", scope),
        ];

        let response = self
            .http
            .post(self.token_url())
            .form(&form)
            .send()
            .await
            .map_err(AzChatError::Network)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(AzChatError::Network)?;

        if !(200..300).contains(&status) {
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => err.error_description.unwrap_or(err.error),
                Err(_) => body,
            };
            return Err(IdentityError::TokenRequest { status, message }.into());
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| IdentityError::InvalidTokenResponse(e.to_string()))?;

        let expires_on = i64::try_from(parsed.expires_in)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| requested_at.checked_add_signed(lifetime))
            .ok_or_else(|| {
                IdentityError::InvalidTokenResponse(format!(
                    "expires_in {} is out of range",
                    parsed.expires_in
                ))
            })?;
        debug!(
            tenant = %self.principal.tenant_id,
            expires_in_secs = parsed.expires_in,
            "Acquired access token"
        );

        Ok(AccessToken {
            token: parsed.access_token,
            expires_on,
        })
    }
}

/// Entry point for Entra ID authentication.
pub struct AzureIdentity {
    credential: Arc<ClientSecretCredential>,
}

impl AzureIdentity {
    /// Build from the AZURE_CLIENT_ID / AZURE_TENANT_ID / AZURE_CLIENT_SECRET variables.
    pub fn from_env() -> Result<Self> {
        let principal = ServicePrincipal::from_env().map_err(AzChatError::Config)?;
        Self::from_service_principal(principal)
    }

    /// Build from resolved service principal credentials.
    pub fn from_service_principal(principal: ServicePrincipal) -> Result<Self> {
        if principal.tenant_id.is_empty()
            || principal.client_id.is_empty()
            || principal.client_secret.is_empty()
        {
            return Err(ConfigError::MissingIdentity {
                missing: vec!["tenant_id/client_id/client_secret".to_string()],
            }
            .into());
        }
        Ok(Self {
            credential: Arc::new(ClientSecretCredential::new(principal)?),
        })
    }

    /// Underlying credential.
    pub fn credential(&self) -> &Arc<ClientSecretCredential> {
        &self.credential
    }

    /// Token provider bound to the Cognitive Services scope.
    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        Arc::new(BearerTokenProvider::new(
            Arc::clone(&self.credential),
            COGNITIVE_SERVICES_SCOPE,
        ))
    }

    /// Fetch a raw bearer token for the Cognitive Services scope.
    pub async fn get_token(&self) -> Result<String> {
        Ok(self
            .credential
            .get_token(COGNITIVE_SERVICES_SCOPE)
            .await?
            .token)
    }
}
