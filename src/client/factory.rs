//! Client construction.
//!
//! [`ClientFactory`] is the one capability chat sessions depend on: build a
//! configured client. [`AzureOpenAIClientFactory`] is the production
//! implementation; tests substitute their own.

use crate::client::{Auth, AzureOpenAIClient, ChatClient};
use crate::identity::{AzureIdentity, TokenProvider};
use crate::models::{AuthMode, AzChatError, Config, ConfigError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builds configured chat clients.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self) -> Result<Arc<dyn ChatClient>>;
}

/// Factory for [`AzureOpenAIClient`]s.
///
/// Validates its configuration up front; every `create_*` call returns a new
/// client sharing the factory's connection pool and auth.
#[derive(Clone)]
pub struct AzureOpenAIClientFactory {
    http: reqwest::Client,
    endpoint: String,
    api_version: String,
    auth: Auth,
    timeout: Duration,
}

impl AzureOpenAIClientFactory {
    pub const DEFAULT_API_VERSION: &'static str = "2024-10-21";
    const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Create a factory.
    ///
    /// Fails before any network call if the endpoint or credentials are absent.
    pub fn new(
        endpoint: impl Into<String>,
        api_version: impl Into<String>,
        auth: Auth,
    ) -> Result<Self> {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(ConfigError::MissingEndpoint.into());
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "endpoint".to_string(),
                reason: format!("'{endpoint}' is not an http(s) URL"),
            }
            .into());
        }

        let api_version = api_version.into();
        if api_version.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_version".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }

        if matches!(&auth, Auth::ApiKey(key) if key.trim().is_empty()) {
            return Err(ConfigError::MissingCredentials {
                env_var: crate::models::ENV_API_KEY.to_string(),
            }
            .into());
        }

        let timeout = Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            http: build_http(timeout)?,
            endpoint,
            api_version,
            auth,
            timeout,
        })
    }

    /// Factory authenticating with Entra ID bearer tokens.
    pub fn with_identity(
        endpoint: impl Into<String>,
        api_version: impl Into<String>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        Self::new(endpoint, api_version, Auth::Token(token_provider))
    }

    /// Factory authenticating with a static API key.
    pub fn with_api_key(
        endpoint: impl Into<String>,
        api_version: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Self::new(endpoint, api_version, Auth::ApiKey(api_key.into()))
    }

    /// Factory from a [`Config`], resolving the auth mode.
    ///
    /// A service principal gets an identity-backed token provider.
    pub fn from_config(config: &Config) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let mode = config.resolve_auth()?;
        let label = mode.label();

        let auth = match mode {
            AuthMode::ApiKey(key) => Auth::ApiKey(key),
            AuthMode::ServicePrincipal(principal) => {
                Auth::Token(AzureIdentity::from_service_principal(principal)?.token_provider())
            }
        };

        let factory = Self::new(endpoint, config.azure.api_version.clone(), auth)?
            .with_timeout(Duration::from_secs(config.azure.timeout_secs))?;

        info!(
            endpoint = %factory.endpoint,
            api_version = %factory.api_version,
            auth = label,
            "Client factory ready"
        );
        Ok(factory)
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = build_http(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    /// Get the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the API version.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Get the auth mechanism.
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Build a concrete client (files, batches, responses and chat).
    pub fn create_azure_client(&self) -> AzureOpenAIClient {
        AzureOpenAIClient::new(
            self.http.clone(),
            self.endpoint.clone(),
            self.api_version.clone(),
            self.auth.clone(),
            self.timeout,
        )
    }
}

impl fmt::Debug for AzureOpenAIClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureOpenAIClientFactory")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ClientFactory for AzureOpenAIClientFactory {
    fn create_client(&self) -> Result<Arc<dyn ChatClient>> {
        Ok(Arc::new(self.create_azure_client()))
    }
}

fn build_http(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("azchat/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(AzChatError::Network)
}
