//! Azure OpenAI data-plane client.
//!
//! Covers the calls azchat makes: chat completions, the Responses API, file
//! upload/download and Batch API jobs. Every URL carries `?api-version=`.
//! Failures are returned as the service reported them; nothing is retried.

use crate::batch::{BatchJob, CreateBatchRequest};
use crate::client::{ResponseObject, ResponseRequest};
use crate::identity::TokenProvider;
use crate::models::{AzChatError, AzureApiError, Message, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// How requests are authenticated. Exactly one mechanism per client.
#[derive(Clone)]
pub enum Auth {
    /// Static resource key sent as `api-key`
    ApiKey(String),
    /// Entra ID bearer token fetched per request
    Token(Arc<dyn TokenProvider>),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Auth::Token(_) => f.write_str("Token(<provider>)"),
        }
    }
}

impl Auth {
    pub fn label(&self) -> &'static str {
        match self {
            Auth::ApiKey(_) => "api-key",
            Auth::Token(_) => "bearer-token",
        }
    }
}

/// A chat completion call.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Deployment (model) name
    pub deployment: String,
    /// Full conversation, replayed in order
    pub messages: Vec<Message>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Result of a chat completion call.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    /// Assistant reply text
    pub content: String,
    /// Model reported by the service
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub finish_reason: Option<String>,
    /// Request duration
    pub duration: Duration,
}

/// Anything that can answer a chat completion.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion>;
}

/// Chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

impl ApiErrorDetail {
    fn describe(self) -> String {
        match self.code {
            Some(serde_json::Value::String(code)) => format!("{code}: {}", self.message),
            Some(serde_json::Value::Null) | None => self.message,
            Some(code) => format!("{code}: {}", self.message),
        }
    }
}

/// File metadata returned by the Files API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Azure OpenAI client bound to one resource endpoint.
///
/// Built by [`crate::client::AzureOpenAIClientFactory`]; cheap to clone.
#[derive(Clone)]
pub struct AzureOpenAIClient {
    http: reqwest::Client,
    /// Resource endpoint, no trailing slash
    endpoint: String,
    api_version: String,
    auth: Auth,
    /// Request timeout (for error reporting)
    timeout: Duration,
}

impl AzureOpenAIClient {
    pub(crate) fn new(
        http: reqwest::Client,
        endpoint: String,
        api_version: String,
        auth: Auth,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint,
            api_version,
            auth,
            timeout,
        }
    }

    /// Get the endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the API version.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    fn url(&self, path: &str) -> String {
        format!("{}/openai/{}", self.endpoint, path.trim_start_matches('/'))
    }

    /// Build auth headers for a request.
    async fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        match &self.auth {
            Auth::ApiKey(key) => {
                let value = HeaderValue::from_str(key)
                    .map_err(|_| AzChatError::InvalidInput("API key is not a valid header".into()))?;
                headers.insert("api-key", value);
            }
            Auth::Token(provider) => {
                let token = provider.token().await?;
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    AzChatError::InvalidInput("bearer token is not a valid header".into())
                })?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        Ok(headers)
    }

    /// Send a request and map non-2xx statuses to errors.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .query(&[("api-version", self.api_version.as_str())])
            .headers(self.headers().await?)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AzChatError::Timeout(self.timeout)
                } else {
                    AzChatError::Network(e)
                }
            })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_error) => api_error.error.describe(),
            Err(_) => body,
        };

        let error = match status {
            401 | 403 => AzureApiError::AuthenticationFailed { status, message },
            404 => AzureApiError::NotFound(message),
            _ => AzureApiError::ApiError { status, message },
        };
        Err(error.into())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| {
                AzureApiError::InvalidResponse(format!("Failed to parse {what}: {e}")).into()
            })
    }

    /// Complete a chat request against a deployment.
    pub async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        if request.deployment.trim().is_empty() {
            return Err(AzChatError::InvalidInput("deployment name is empty".into()));
        }

        let start = Instant::now();
        let body = ChatCompletionBody {
            model: &request.deployment,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            deployment = %request.deployment,
            messages = request.messages.len(),
            "Sending chat completion"
        );

        let url = self.url(&format!("deployments/{}/chat/completions", request.deployment));
        let response: ChatCompletionResponse = self
            .send_json(self.http.post(url).json(&body), "chat completion")
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                AzureApiError::InvalidResponse("No choices in response".to_string())
            })?;

        let finish_reason = choice.finish_reason;
        let content = choice.message.content.ok_or_else(|| {
            AzureApiError::InvalidResponse(format!(
                "completion has no content (finish_reason: {})",
                finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

        let usage = response.usage.unwrap_or_default();

        Ok(ChatCompletion {
            content,
            model: response
                .model
                .unwrap_or_else(|| request.deployment.clone()),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            finish_reason,
            duration: start.elapsed(),
        })
    }

    /// Create a model response (Responses API).
    pub async fn create_response(&self, request: &ResponseRequest) -> Result<ResponseObject> {
        debug!(model = %request.model, "Creating response");
        self.send_json(self.http.post(self.url("responses")).json(request), "response")
            .await
    }

    /// Upload a file (multipart) for the given purpose.
    pub async fn upload_file(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        purpose: &str,
    ) -> Result<FileObject> {
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/jsonl")
            .map_err(AzChatError::Network)?;
        let form = reqwest::multipart::Form::new()
            .text("purpose", purpose.to_string())
            .part("file", part);

        debug!(filename = filename, bytes = size, purpose = purpose, "Uploading file");
        self.send_json(self.http.post(self.url("files")).multipart(form), "file object")
            .await
    }

    /// Download a file's content as text.
    pub async fn file_content(&self, file_id: &str) -> Result<String> {
        let url = self.url(&format!("files/{file_id}/content"));
        self.send(self.http.get(url))
            .await?
            .text()
            .await
            .map_err(AzChatError::Network)
    }

    /// Submit a batch job.
    pub async fn create_batch(&self, request: &CreateBatchRequest) -> Result<BatchJob> {
        debug!(input_file_id = %request.input_file_id, "Creating batch");
        self.send_json(self.http.post(self.url("batches")).json(request), "batch")
            .await
    }

    /// Fetch a batch job's current state.
    pub async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob> {
        let url = self.url(&format!("batches/{batch_id}"));
        self.send_json(self.http.get(url), "batch").await
    }
}

#[async_trait]
impl ChatClient for AzureOpenAIClient {
    async fn chat(&self, request: ChatRequest) -> Result<ChatCompletion> {
        self.chat_completion(&request).await
    }
}
