//! Configuration models for azchat.
//!
//! Everything a client needs is carried in [`Config`] and passed in at
//! construction. The struct can be loaded from a TOML file or assembled from
//! the usual Azure environment variables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const ENV_ENDPOINT: &str = "AZURE_OPENAI_ENDPOINT";
pub const ENV_API_VERSION: &str = "AZURE_OPENAI_API_VERSION";
pub const ENV_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT";
pub const ENV_BATCH_DEPLOYMENT: &str = "AZURE_OPENAI_DEPLOYMENT_BATCH";
pub const ENV_API_KEY: &str = "AZURE_OPENAI_API_KEY";
pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const ENV_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";

/// Top-level configuration for azchat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Azure OpenAI resource settings
    #[serde(default)]
    pub azure: AzureConfig,

    /// Service principal settings (Entra ID auth)
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Chat defaults
    #[serde(default)]
    pub chat: ChatConfig,

    /// Offline batch job settings
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Azure OpenAI resource configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureConfig {
    /// Resource endpoint, e.g. "https://my-resource.openai.azure.com/"
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Data-plane API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Deployment used for chat calls
    #[serde(default)]
    pub deployment: Option<String>,

    /// Global-Batch deployment used for offline jobs
    #[serde(default)]
    pub batch_deployment: Option<String>,

    /// API key (can also be set via AZURE_OPENAI_API_KEY env var)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "2024-10-21".to_string()
}

fn default_api_key_env() -> String {
    ENV_API_KEY.to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_version: default_api_version(),
            deployment: None,
            batch_deployment: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Service principal (client secret) configuration.
///
/// Any field left unset falls back to the matching AZURE_* variable.
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    /// Entra ID authority
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            authority_host: default_authority_host(),
        }
    }
}

impl fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

/// Chat defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// System prompt seeded into every new session
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Worker pool size for concurrent batch chat
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_workers() -> usize {
    5
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: default_temperature(),
            max_workers: default_max_workers(),
        }
    }
}

/// Offline batch job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Seconds between status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Completion window accepted by the service (e.g. "24h")
    #[serde(default = "default_completion_window")]
    pub completion_window: String,

    /// Output file retention, anchored at job creation
    #[serde(default = "default_output_expires_after")]
    pub output_expires_after_secs: Option<u64>,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_completion_window() -> String {
    "24h".to_string()
}

fn default_output_expires_after() -> Option<u64> {
    // 14 days
    Some(1_209_600)
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            completion_window: default_completion_window(),
            output_expires_after_secs: default_output_expires_after(),
        }
    }
}

/// Resolved service principal credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct ServicePrincipal {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub authority_host: String,
}

impl fmt::Debug for ServicePrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServicePrincipal")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("authority_host", &self.authority_host)
            .finish()
    }
}

impl ServicePrincipal {
    /// Resolve a service principal from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve a service principal through an arbitrary variable lookup.
    ///
    /// Every missing variable is reported at once.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let client_id = get(ENV_CLIENT_ID);
        let tenant_id = get(ENV_TENANT_ID);
        let client_secret = get(ENV_CLIENT_SECRET);

        let missing: Vec<String> = [
            (ENV_CLIENT_ID, client_id.is_none()),
            (ENV_TENANT_ID, tenant_id.is_none()),
            (ENV_CLIENT_SECRET, client_secret.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| name.to_string())
        .collect();

        match (tenant_id, client_id, client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Ok(Self {
                tenant_id,
                client_id,
                client_secret,
                authority_host: get(ENV_AUTHORITY_HOST).unwrap_or_else(default_authority_host),
            }),
            _ => Err(ConfigError::MissingIdentity { missing }),
        }
    }
}

/// How the client authenticates.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMode {
    /// Static `api-key` header
    ApiKey(String),
    /// Entra ID bearer tokens for a service principal
    ServicePrincipal(ServicePrincipal),
}

impl fmt::Debug for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            AuthMode::ServicePrincipal(sp) => f.debug_tuple("ServicePrincipal").field(sp).finish(),
        }
    }
}

impl AuthMode {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            AuthMode::ApiKey(_) => "api-key",
            AuthMode::ServicePrincipal(_) => "service-principal",
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml_str(&content)
            .map(Self::expand_env)
            .map_err(|e| ConfigError::Parse {
                path: path.to_owned(),
                source: e,
            })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration through an arbitrary variable lookup.
    ///
    /// Empty values count as absent.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            azure: AzureConfig {
                endpoint: get(ENV_ENDPOINT),
                api_version: get(ENV_API_VERSION).unwrap_or_else(default_api_version),
                deployment: get(ENV_DEPLOYMENT),
                batch_deployment: get(ENV_BATCH_DEPLOYMENT),
                api_key: get(ENV_API_KEY),
                ..Default::default()
            },
            identity: IdentityConfig {
                tenant_id: get(ENV_TENANT_ID),
                client_id: get(ENV_CLIENT_ID),
                client_secret: get(ENV_CLIENT_SECRET),
                authority_host: get(ENV_AUTHORITY_HOST).unwrap_or_else(default_authority_host),
            },
            ..Default::default()
        }
    }

    /// Endpoint without trailing slash.
    pub fn endpoint(&self) -> Result<String, ConfigError> {
        non_empty(self.azure.endpoint.as_deref())
            .map(|e| e.trim_end_matches('/').to_string())
            .ok_or(ConfigError::MissingEndpoint)
    }

    /// Deployment for chat calls.
    pub fn deployment(&self) -> Result<String, ConfigError> {
        non_empty(self.azure.deployment.as_deref()).ok_or_else(|| ConfigError::MissingDeployment {
            var: ENV_DEPLOYMENT.to_string(),
        })
    }

    /// Global-Batch deployment for offline jobs.
    pub fn batch_deployment(&self) -> Result<String, ConfigError> {
        non_empty(self.azure.batch_deployment.as_deref()).ok_or_else(|| {
            ConfigError::MissingDeployment {
                var: ENV_BATCH_DEPLOYMENT.to_string(),
            }
        })
    }

    /// Resolve the authentication mode.
    ///
    /// A complete service principal wins; otherwise an API key from config or
    /// the `api_key_env` variable is used.
    pub fn resolve_auth(&self) -> Result<AuthMode, ConfigError> {
        self.resolve_auth_with(|name| std::env::var(name).ok())
    }

    /// [`Config::resolve_auth`] with an explicit environment lookup.
    pub fn resolve_auth_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<AuthMode, ConfigError> {
        let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let pick = |configured: &Option<String>, var: &str| {
            non_empty(configured.as_deref()).or_else(|| env(var))
        };

        let tenant_id = pick(&self.identity.tenant_id, ENV_TENANT_ID);
        let client_id = pick(&self.identity.client_id, ENV_CLIENT_ID);
        let client_secret = pick(&self.identity.client_secret, ENV_CLIENT_SECRET);

        if let (Some(tenant_id), Some(client_id), Some(client_secret)) =
            (tenant_id, client_id, client_secret)
        {
            return Ok(AuthMode::ServicePrincipal(ServicePrincipal {
                tenant_id,
                client_id,
                client_secret,
                authority_host: expand_env_vars(&self.identity.authority_host),
            }));
        }

        if let Some(key) = non_empty(self.azure.api_key.as_deref()) {
            return Ok(AuthMode::ApiKey(key));
        }

        env(&self.azure.api_key_env)
            .map(AuthMode::ApiKey)
            .ok_or_else(|| ConfigError::MissingCredentials {
                env_var: self.azure.api_key_env.clone(),
            })
    }

    /// Validate static values. Credentials are checked by [`Config::resolve_auth`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;

        if !(0.0..=2.0).contains(&self.chat.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "chat.temperature".to_string(),
                reason: format!("{} is outside [0, 2]", self.chat.temperature),
            });
        }
        if self.chat.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chat.max_workers".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch.poll_interval_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Example configuration file.
    pub fn example_toml() -> &'static str {
        r#"# azchat configuration file
# Values may reference environment variables as ${NAME}.

[azure]
endpoint = "https://my-resource.openai.azure.com/"
api_version = "2024-10-21"
deployment = "gpt-4o-mini"
# Global-Batch deployment, used by `azchat job`
batch_deployment = "gpt-4o-mini-batch"
# api_key = "${AZURE_OPENAI_API_KEY}"
api_key_env = "AZURE_OPENAI_API_KEY"
timeout_secs = 120

[identity]
# When all three are set (here or via AZURE_* env vars) Entra ID auth is used.
# tenant_id = "00000000-0000-0000-0000-000000000000"
# client_id = "00000000-0000-0000-0000-000000000000"
# client_secret = "${AZURE_CLIENT_SECRET}"
authority_host = "https://login.microsoftonline.com"

[chat]
system_prompt = "You are a helpful assistant."
temperature = 0.7
max_workers = 5

[batch]
poll_interval_secs = 5
completion_window = "24h"
output_expires_after_secs = 1209600
"#
    }

    /// Expand `${VAR}` references in string values loaded from a file.
    pub fn expand_env(mut self) -> Self {
        let expand = |v: &mut Option<String>| {
            if let Some(s) = v {
                *s = expand_env_vars(s);
            }
        };
        expand(&mut self.azure.endpoint);
        expand(&mut self.azure.deployment);
        expand(&mut self.azure.batch_deployment);
        expand(&mut self.azure.api_key);
        expand(&mut self.identity.tenant_id);
        expand(&mut self.identity.client_id);
        expand(&mut self.identity.client_secret);
        self.azure.api_version = expand_env_vars(&self.azure.api_version);
        self
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// Unset variables expand to nothing, so an unresolved reference reads as absent.
pub fn expand_env_vars(s: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };

    re.replace_all(s, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Azure OpenAI endpoint is required (set AZURE_OPENAI_ENDPOINT or azure.endpoint)")]
    MissingEndpoint,

    #[error("Deployment name is required (set {var})")]
    MissingDeployment { var: String },

    #[error(
        "No credentials: set AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET or {env_var}"
    )]
    MissingCredentials { env_var: String },

    #[error("Missing required environment variables: {}", .missing.join(", "))]
    MissingIdentity { missing: Vec<String> },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_from_lookup_reads_azure_vars() {
        let config = Config::from_lookup(lookup(&[
            (ENV_ENDPOINT, "https://res.openai.azure.com/"),
            (ENV_DEPLOYMENT, "gpt-4o-mini"),
            (ENV_API_KEY, "k"),
        ]));

        assert_eq!(config.endpoint().unwrap(), "https://res.openai.azure.com");
        assert_eq!(config.deployment().unwrap(), "gpt-4o-mini");
        assert_eq!(config.azure.api_version, "2024-10-21");
        assert!(config.batch_deployment().is_err());
    }

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let config = Config::from_lookup(lookup(&[(ENV_ENDPOINT, "   ")]));
        assert!(matches!(config.endpoint(), Err(ConfigError::MissingEndpoint)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_service_principal_preferred_over_key() {
        let config = Config::from_lookup(lookup(&[
            (ENV_ENDPOINT, "https://res.openai.azure.com"),
            (ENV_API_KEY, "k"),
            (ENV_TENANT_ID, "t"),
            (ENV_CLIENT_ID, "c"),
            (ENV_CLIENT_SECRET, "s"),
        ]));

        let auth = config.resolve_auth_with(|_| None).unwrap();
        match auth {
            AuthMode::ServicePrincipal(sp) => {
                assert_eq!(sp.tenant_id, "t");
                assert_eq!(sp.authority_host, "https://login.microsoftonline.com");
            }
            other => panic!("expected service principal, got {other:?}"),
        }
    }

    #[test]
    fn test_partial_identity_falls_back_to_key() {
        let config = Config::from_lookup(lookup(&[(ENV_TENANT_ID, "t"), (ENV_API_KEY, "k")]));
        let auth = config.resolve_auth_with(|_| None).unwrap();
        assert_eq!(auth, AuthMode::ApiKey("k".to_string()));
    }

    #[test]
    fn test_api_key_from_named_env_var() {
        let mut config = Config::default();
        config.azure.api_key_env = "MY_KEY".to_string();
        let auth = config
            .resolve_auth_with(lookup(&[("MY_KEY", "from-env")]))
            .unwrap();
        assert_eq!(auth, AuthMode::ApiKey("from-env".to_string()));
    }

    #[test]
    fn test_no_credentials() {
        let config = Config::default();
        let err = config.resolve_auth_with(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredentials { .. }));
    }

    #[test]
    fn test_service_principal_lists_all_missing() {
        let err = ServicePrincipal::from_lookup(lookup(&[(ENV_CLIENT_ID, "c")])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains(ENV_TENANT_ID));
        assert!(msg.contains(ENV_CLIENT_SECRET));
        assert!(!msg.contains(ENV_CLIENT_ID));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = AuthMode::ApiKey("super-secret".to_string());
        assert!(!format!("{auth:?}").contains("super-secret"));

        let sp = ServicePrincipal {
            tenant_id: "t".into(),
            client_id: "c".into(),
            client_secret: "hunter2".into(),
            authority_host: "h".into(),
        };
        assert!(!format!("{sp:?}").contains("hunter2"));
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_toml_str(Config::example_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chat.max_workers, 5);
        assert_eq!(config.batch.output_expires_after_secs, Some(1_209_600));
        assert_eq!(config.batch_deployment().unwrap(), "gpt-4o-mini-batch");
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let config = Config::from_toml_str("[azure]\nendpoint = \"https://x\"\n").unwrap();
        assert_eq!(config.azure.timeout_secs, 120);
        assert_eq!(config.batch.poll_interval_secs, 5);
        assert_eq!(config.chat.temperature, 0.7);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::from_toml_str("[azure]\nendpoint = \"https://x\"\n").unwrap();
        config.chat.max_workers = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_expand_env_vars_without_placeholders() {
        assert_eq!(expand_env_vars("plain"), "plain");
        assert_eq!(expand_env_vars("${AZCHAT_SURELY_UNSET_VAR}"), "");
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("azchat.toml");
        std::fs::write(
            &path,
            "[azure]\nendpoint = \"https://r.openai.azure.com/\"\ndeployment = \"gpt\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.endpoint().unwrap(), "https://r.openai.azure.com");
        assert_eq!(config.deployment().unwrap(), "gpt");

        let missing = temp_dir.path().join("nope.toml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::FileRead { .. })
        ));
    }
}
