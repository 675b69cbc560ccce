//! Stateless chat helpers.
//!
//! Every call gets a fresh [`ChatSession`], so nothing carries over between
//! prompts. [`ChatUtil::batch_chat`] fans prompts out over a bounded pool.

use crate::chat::{ChatOptions, ChatSession};
use crate::client::ClientFactory;
use crate::models::{AzChatError, ConfigError, ENV_DEPLOYMENT, Result};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One-shot and concurrent chat over a shared factory.
#[derive(Clone)]
pub struct ChatUtil {
    factory: Arc<dyn ClientFactory>,
}

impl ChatUtil {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self { factory }
    }

    /// Send one message in a throwaway session.
    pub async fn quick_chat(
        &self,
        deployment: &str,
        text: &str,
        options: &ChatOptions,
    ) -> Result<String> {
        let mut session = ChatSession::new(Arc::clone(&self.factory), deployment, options.clone())?;
        session.send(text).await
    }

    /// Answer every prompt independently, at most `max_workers` at a time.
    ///
    /// Replies come back in prompt order. The first failure cancels the
    /// remaining calls and is returned; there are no partial results.
    pub async fn batch_chat<S: AsRef<str>>(
        &self,
        deployment: &str,
        prompts: &[S],
        options: &ChatOptions,
        max_workers: usize,
    ) -> Result<Vec<String>> {
        if deployment.trim().is_empty() {
            return Err(ConfigError::MissingDeployment {
                var: ENV_DEPLOYMENT.to_string(),
            }
            .into());
        }
        if max_workers == 0 {
            return Err(AzChatError::InvalidInput(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let total = prompts.len();
        info!(prompts = total, max_workers = max_workers, "Starting batch chat");

        let semaphore = Arc::new(Semaphore::new(max_workers));
        let mut tasks = JoinSet::new();

        for (index, prompt) in prompts.iter().enumerate() {
            let factory = Arc::clone(&self.factory);
            let semaphore = Arc::clone(&semaphore);
            let deployment = deployment.to_string();
            let options = options.clone();
            let prompt = prompt.as_ref().to_string();

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| AzChatError::Internal("Semaphore closed".to_string()))?;

                let mut session = ChatSession::new(factory, deployment, options)?;
                let reply = session.send(prompt).await?;
                Ok::<_, AzChatError>((index, reply))
            });
        }

        let mut replies: Vec<Option<String>> = vec![None; total];

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, reply))) => {
                    debug!(index = index, "Batch prompt answered");
                    replies[index] = Some(reply);
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Batch chat call failed, cancelling remaining");
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(AzChatError::TaskFailed(e.to_string()));
                }
            }
        }

        let replies: Vec<String> = replies
            .into_iter()
            .collect::<Option<_>>()
            .ok_or_else(|| AzChatError::Internal("batch reply missing".to_string()))?;

        info!(
            prompts = total,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch chat complete"
        );
        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::EchoFactory;
    use std::sync::atomic::Ordering;

    fn util() -> (Arc<EchoFactory>, ChatUtil) {
        let factory = Arc::new(EchoFactory::default());
        (factory.clone(), ChatUtil::new(factory))
    }

    #[tokio::test]
    async fn test_quick_chat() {
        let (factory, util) = util();
        let options = ChatOptions::default().with_system_prompt("sys");

        let reply = util.quick_chat("gpt", "hi", &options).await.unwrap();
        assert_eq!(reply, "echo:hi");

        let requests = factory.client.requests.lock().unwrap();
        assert_eq!(requests[0].len(), 2);
    }

    #[tokio::test]
    async fn test_batch_chat_keeps_input_order() {
        let (_, util) = util();
        let prompts = ["a", "b", "c"];

        let replies = util
            .batch_chat("gpt", &prompts, &ChatOptions::default(), 3)
            .await
            .unwrap();
        assert_eq!(replies, ["echo:a", "echo:b", "echo:c"]);
    }

    #[tokio::test]
    async fn test_batch_chat_bounded_pool() {
        let (factory, util) = util();
        let prompts: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();

        let replies = util
            .batch_chat("gpt", &prompts, &ChatOptions::default(), 3)
            .await
            .unwrap();

        let expected: Vec<String> = (0..8).map(|i| format!("echo:p{i}")).collect();
        assert_eq!(replies, expected);
        assert!(factory.client.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(factory.created.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_batch_chat_fails_on_first_error() {
        let (_, util) = util();
        let err = util
            .batch_chat("gpt", &["p1", "fail", "p2"], &ChatOptions::default(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, AzChatError::AzureApi(_)));
    }

    #[tokio::test]
    async fn test_batch_chat_edge_cases() {
        let (factory, util) = util();
        let options = ChatOptions::default();

        let replies = util.batch_chat::<&str>("gpt", &[], &options, 4).await.unwrap();
        assert!(replies.is_empty());

        let err = util.batch_chat("gpt", &["a"], &options, 0).await.unwrap_err();
        assert!(matches!(err, AzChatError::InvalidInput(_)));

        let err = util.batch_chat("", &["a"], &options, 1).await.unwrap_err();
        assert!(err.is_local());

        assert_eq!(factory.client.calls.load(Ordering::SeqCst), 0);
    }
}
