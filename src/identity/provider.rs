//! Bearer token suppliers.

use crate::identity::{AccessToken, ClientSecretCredential};
use crate::models::{AzChatError, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Supplies a bearer token for each outgoing request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Token provider backed by a [`ClientSecretCredential`].
///
/// The last token is reused until it is within five minutes of expiry.
pub struct BearerTokenProvider {
    credential: Arc<ClientSecretCredential>,
    scope: String,
    cached: Mutex<Option<AccessToken>>,
}

impl BearerTokenProvider {
    const REFRESH_MARGIN_SECS: i64 = 300;

    pub fn new(credential: Arc<ClientSecretCredential>, scope: impl Into<String>) -> Self {
        Self {
            credential,
            scope: scope.into(),
            cached: Mutex::new(None),
        }
    }

    /// Scope tokens are requested for.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

#[async_trait]
impl TokenProvider for BearerTokenProvider {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let margin = ChronoDuration::seconds(Self::REFRESH_MARGIN_SECS);

        if let Some(token) = cached.as_ref().filter(|t| !t.expires_within(margin, Utc::now())) {
            return Ok(token.token.clone());
        }

        debug!(scope = %self.scope, "Refreshing bearer token");
        let fresh = self.credential.get_token(&self.scope).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

/// Token provider returning a fixed, pre-acquired token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(AzChatError::InvalidInput("empty bearer token".to_string()));
        }
        Ok(self.token.clone())
    }
}
