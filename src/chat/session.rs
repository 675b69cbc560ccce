//! Stateful chat session.
//!
//! The session owns the conversation and replays all of it on every turn.
//! History always reads `[system?] (user, assistant)*`.

use crate::client::{ChatRequest, ClientFactory};
use crate::models::{ChatConfig, ConfigError, ENV_DEPLOYMENT, Message, Result, Role};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Per-session generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    /// Seeded as the first message when non-empty
    pub system_prompt: Option<String>,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl ChatOptions {
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

impl From<&ChatConfig> for ChatOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            max_tokens: None,
        }
    }
}

/// A multi-turn conversation with one deployment.
pub struct ChatSession {
    factory: Arc<dyn ClientFactory>,
    deployment: String,
    options: ChatOptions,
    history: Vec<Message>,
}

impl ChatSession {
    /// Start a session; seeds the system prompt when one is set.
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        deployment: impl Into<String>,
        options: ChatOptions,
    ) -> Result<Self> {
        let deployment = deployment.into();
        if deployment.trim().is_empty() {
            return Err(ConfigError::MissingDeployment {
                var: ENV_DEPLOYMENT.to_string(),
            }
            .into());
        }

        let mut session = Self {
            factory,
            deployment,
            options,
            history: Vec::new(),
        };
        session.reset();
        Ok(session)
    }

    /// Send a user message and return the assistant reply.
    ///
    /// On failure the user message is dropped again and the error returned.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<String> {
        self.history.push(Message::user(text));

        match self.complete().await {
            Ok(reply) => {
                self.history.push(Message::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                self.history.pop();
                Err(e)
            }
        }
    }

    async fn complete(&self) -> Result<String> {
        let client = self.factory.create_client()?;
        let request = ChatRequest {
            deployment: self.deployment.clone(),
            messages: self.history.clone(),
            temperature: Some(self.options.temperature),
            max_tokens: self.options.max_tokens,
        };

        let completion = client.chat(request).await?;
        debug!(
            deployment = %self.deployment,
            turns = self.history.len(),
            input_tokens = completion.input_tokens,
            output_tokens = completion.output_tokens,
            duration_ms = completion.duration.as_millis() as u64,
            "Chat turn complete"
        );
        Ok(completion.content)
    }

    /// Conversation so far, oldest first.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Drop everything except the initial system prompt.
    pub fn reset(&mut self) {
        self.history.clear();
        if let Some(prompt) = self
            .options
            .system_prompt
            .as_deref()
            .filter(|p| !p.is_empty())
        {
            self.history.push(Message::system(prompt));
        }
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// Number of completed user turns.
    pub fn turns(&self) -> usize {
        self.history.iter().filter(|m| m.role == Role::User).count()
    }
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("deployment", &self.deployment)
            .field("options", &self.options)
            .field("messages", &self.history.len())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::EchoFactory;
    use super::*;
    use crate::models::AzChatError;
    use std::sync::atomic::Ordering;

    fn session(system: Option<&str>) -> (Arc<EchoFactory>, ChatSession) {
        let factory = Arc::new(EchoFactory::default());
        let mut options = ChatOptions::default();
        options.system_prompt = system.map(str::to_string);
        let session = ChatSession::new(factory.clone(), "gpt-4o", options).unwrap();
        (factory, session)
    }

    #[test]
    fn test_new_seeds_system_prompt() {
        let (_, s) = session(Some("be brief"));
        assert_eq!(s.history(), &[Message::system("be brief")]);

        let (_, s) = session(None);
        assert!(s.history().is_empty());

        let (_, s) = session(Some(""));
        assert!(s.history().is_empty());
    }

    #[test]
    fn test_empty_deployment_rejected() {
        let factory = Arc::new(EchoFactory::default());
        let Err(err) = ChatSession::new(factory, " ", ChatOptions::default()) else {
            panic!("blank deployment accepted");
        };
        assert!(matches!(
            err,
            AzChatError::Config(ConfigError::MissingDeployment { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_grows_history() {
        let (factory, mut s) = session(Some("sys"));

        assert_eq!(s.send("hello").await.unwrap(), "echo:hello");
        assert_eq!(s.send("again").await.unwrap(), "echo:again");

        assert_eq!(s.history().len(), 5);
        assert_eq!(s.history()[3], Message::user("again"));
        assert_eq!(s.history()[4], Message::assistant("echo:again"));
        assert_eq!(s.turns(), 2);

        // Second call replays the whole conversation.
        let requests = factory.client.requests.lock().unwrap();
        assert_eq!(requests[1].len(), 4);
        assert_eq!(requests[1][0], Message::system("sys"));
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_send_keeps_history_consistent() {
        let (_, mut s) = session(None);
        s.send("ok").await.unwrap();

        let err = s.send("fail").await.unwrap_err();
        assert!(matches!(err, AzChatError::AzureApi(_)));
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.history()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_reset_keeps_system_prompt() {
        let (_, mut s) = session(Some("sys"));
        s.send("one").await.unwrap();
        s.reset();
        assert_eq!(s.history(), &[Message::system("sys")]);

        let (_, mut s) = session(None);
        s.send("one").await.unwrap();
        s.reset();
        assert!(s.history().is_empty());
    }

    #[test]
    fn test_options_from_config() {
        let config = ChatConfig {
            system_prompt: Some("sys".to_string()),
            temperature: 0.2,
            max_workers: 3,
        };
        let options = ChatOptions::from(&config);
        assert_eq!(options.temperature, 0.2);
        assert_eq!(options.system_prompt.as_deref(), Some("sys"));
        assert_eq!(
            ChatOptions::default().with_max_tokens(64).max_tokens,
            Some(64)
        );
    }
}
