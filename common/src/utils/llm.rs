use std::{sync::Arc, time::Duration};

use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs},
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::AppError;

use super::{
    config::AppConfig,
    retry::{retry_transient, RetryPolicy},
};

/// A text completion capability addressed by model name.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String, AppError>;
}

/// Chat completions over an OpenAI-compatible endpoint (OpenRouter by default).
pub struct OpenAiLanguageModel {
    client: Arc<Client<OpenAIConfig>>,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiLanguageModel {
    pub fn new(client: Arc<Client<OpenAIConfig>>, timeout: Duration) -> Self {
        Self {
            client,
            temperature: 0.7,
            max_tokens: 4_000,
            timeout,
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiLanguageModel {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String, AppError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into()])
            .build()?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| AppError::Provider(format!("completion from {model} timed out")))??;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::LLMParsing(format!("empty completion from {model}")))
    }
}

/// A primary model backed by a fallback with the same calling convention.
///
/// Each model gets the full retry budget; the fallback is consulted once the
/// primary has failed for any reason.
#[derive(Clone)]
pub struct ModelPair {
    model: Arc<dyn LanguageModel>,
    primary: String,
    fallback: String,
    retry: RetryPolicy,
}

impl ModelPair {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        primary: String,
        fallback: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            model,
            primary,
            fallback,
            retry,
        }
    }

    pub fn from_config(model: Arc<dyn LanguageModel>, config: &AppConfig) -> Self {
        Self::new(
            model,
            config.primary_model.clone(),
            config.fallback_model.clone(),
            RetryPolicy::standard(),
        )
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let primary = retry_transient(self.retry, || self.model.complete(prompt, &self.primary)).await;
        match primary {
            Ok(text) => {
                debug!(model = %self.primary, chars = text.len(), "completion received");
                Ok(text)
            }
            Err(err) => {
                warn!(
                    primary = %self.primary,
                    fallback = %self.fallback,
                    error = %err,
                    "primary model failed; using fallback"
                );
                retry_transient(self.retry, || self.model.complete(prompt, &self.fallback)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct ScriptedModel {
        calls: Mutex<Vec<String>>,
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete(&self, _prompt: &str, model: &str) -> Result<String, AppError> {
            self.calls.lock().await.push(model.to_string());
            if self.failing.contains(&model) {
                Err(AppError::Provider(format!("{model} unavailable")))
            } else {
                Ok(format!("answer from {model}"))
            }
        }
    }

    fn pair(failing: Vec<&'static str>) -> (Arc<ScriptedModel>, ModelPair) {
        let model = Arc::new(ScriptedModel {
            calls: Mutex::new(Vec::new()),
            failing,
        });
        let pair = ModelPair::new(
            model.clone(),
            "primary".into(),
            "fallback".into(),
            RetryPolicy::immediate(3),
        );
        (model, pair)
    }

    #[tokio::test]
    async fn primary_answers_without_touching_fallback() {
        let (model, pair) = pair(vec![]);
        let text = pair.complete("hi").await.expect("completion");
        assert_eq!(text, "answer from primary");
        assert_eq!(*model.calls.lock().await, vec!["primary".to_string()]);
    }

    #[tokio::test]
    async fn fallback_after_primary_exhausts_retries() {
        let (model, pair) = pair(vec!["primary"]);
        let text = pair.complete("hi").await.expect("completion");
        assert_eq!(text, "answer from fallback");
        let calls = model.calls.lock().await;
        assert_eq!(calls.iter().filter(|m| *m == "primary").count(), 3);
        assert_eq!(calls.last().map(String::as_str), Some("fallback"));
    }

    #[tokio::test]
    async fn both_failing_surfaces_error() {
        let (_, pair) = pair(vec!["primary", "fallback"]);
        assert!(pair.complete("hi").await.is_err());
    }
}
