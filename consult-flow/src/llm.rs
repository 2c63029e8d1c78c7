use std::sync::Arc;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::{Chat, Message};
use rig::providers::openrouter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Sampling temperature shared by every call; kept low so the interview and
/// the ranking stay reasonably deterministic.
pub const TEMPERATURE: f64 = 0.3;

/// Token budget for one interview turn (question or specialist name).
pub const INTERVIEW_MAX_TOKENS: u64 = 150;

/// Token budget for the long-form ranking response.
pub const RANKING_MAX_TOKENS: u64 = 1500;

/// Fallback shown for interview calls when the model is unreachable.
pub const QUESTION_FALLBACK: &str = "Пожалуйста, опишите ваши симптомы подробнее.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the transcript sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Low-level completion boundary. Implementations may fail; the
/// [`LanguageModelClient`] wrapper is what absorbs those failures.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatTurn],
        max_tokens: u64,
        temperature: f64,
    ) -> anyhow::Result<String>;
}

/// Production completion backend over an OpenRouter-compatible endpoint.
pub struct RigChatCompletion {
    api_key: String,
    model: String,
}

impl RigChatCompletion {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        let model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());
        Ok(Self { api_key, model })
    }
}

#[async_trait]
impl ChatCompletion for RigChatCompletion {
    async fn complete(
        &self,
        messages: &[ChatTurn],
        max_tokens: u64,
        temperature: f64,
    ) -> anyhow::Result<String> {
        // System entries become the agent preamble; the last user entry is the
        // prompt and everything in between is chat history.
        let preamble = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let conversation: Vec<&ChatTurn> =
            messages.iter().filter(|m| m.role != Role::System).collect();
        let (prompt, history) = match conversation.split_last() {
            Some((last, rest)) => {
                let history: Vec<Message> = rest
                    .iter()
                    .map(|m| match m.role {
                        Role::Assistant => Message::assistant(m.content.clone()),
                        _ => Message::user(m.content.clone()),
                    })
                    .collect();
                (last.content.clone(), history)
            }
            None => (String::new(), Vec::new()),
        };

        let client = openrouter::Client::new(&self.api_key);
        let agent = client
            .agent(&self.model)
            .preamble(&preamble)
            .temperature(temperature)
            .max_tokens(max_tokens)
            .build();

        let response = agent.chat(&prompt, history).await?;
        Ok(response)
    }
}

/// Outcome of one completion call.
///
/// `Unavailable` is a named case rather than a silently substituted fallback
/// string, so callers that care (the voice adapter, the ranker) can tell a
/// dead service apart from a real reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompletionResult {
    Reply(String),
    Unavailable(String),
}

impl CompletionResult {
    /// Collapse to text, substituting `fallback` when the service failed.
    pub fn reply_or(self, fallback: &str) -> String {
        match self {
            CompletionResult::Reply(text) => text,
            CompletionResult::Unavailable(_) => fallback.to_string(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, CompletionResult::Unavailable(_))
    }
}

/// Thin wrapper around a [`ChatCompletion`] backend that never fails outward.
///
/// One attempt per call, no retry; any transport or service error is folded
/// into [`CompletionResult::Unavailable`].
#[derive(Clone)]
pub struct LanguageModelClient {
    backend: Arc<dyn ChatCompletion>,
}

impl LanguageModelClient {
    pub fn new(backend: Arc<dyn ChatCompletion>) -> Self {
        Self { backend }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(RigChatCompletion::from_env()?)))
    }

    pub async fn complete(
        &self,
        messages: &[ChatTurn],
        max_tokens: u64,
        temperature: f64,
    ) -> CompletionResult {
        match self.backend.complete(messages, max_tokens, temperature).await {
            Ok(text) => {
                debug!(chars = text.len(), "model reply received");
                CompletionResult::Reply(text)
            }
            Err(e) => {
                warn!(error = %e, "model call failed");
                CompletionResult::Unavailable(e.to_string())
            }
        }
    }

    /// Interview-style call: short reply, fixed retry-prompt fallback.
    pub async fn interview(&self, messages: &[ChatTurn]) -> String {
        self.complete(messages, INTERVIEW_MAX_TOKENS, TEMPERATURE)
            .await
            .reply_or(QUESTION_FALLBACK)
    }

    /// Same as [`interview`](Self::interview) but with the failure case kept
    /// distinguishable for callers with their own fallback policy.
    pub async fn interview_outcome(&self, messages: &[ChatTurn]) -> CompletionResult {
        self.complete(messages, INTERVIEW_MAX_TOKENS, TEMPERATURE)
            .await
    }

    /// Ranking-style call: long reply, inline error string on failure.
    pub async fn ranking(&self, messages: &[ChatTurn]) -> String {
        match self
            .complete(messages, RANKING_MAX_TOKENS, TEMPERATURE)
            .await
        {
            CompletionResult::Reply(text) => text,
            CompletionResult::Unavailable(reason) => {
                format!("Ошибка при подборе врачей: {}", reason)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Scripted backend for tests: pops canned replies in order, errors when
    /// a `None` entry is reached. After the script runs out it keeps
    /// returning `default_reply`.
    pub struct ScriptedModel {
        replies: Mutex<Vec<Option<String>>>,
        default_reply: String,
        pub calls: Mutex<Vec<Vec<ChatTurn>>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Option<&str>>) -> Arc<Self> {
            Self::with_default(replies, "ok")
        }

        pub fn with_default(replies: Vec<Option<&str>>, default_reply: &str) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string))
                        .collect(),
                ),
                default_reply: default_reply.to_string(),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn always(reply: &str) -> Arc<Self> {
            Self::with_default(vec![], reply)
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatCompletion for ScriptedModel {
        async fn complete(
            &self,
            messages: &[ChatTurn],
            _max_tokens: u64,
            _temperature: f64,
        ) -> anyhow::Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let mut replies = self.replies.lock().unwrap();
            match replies.pop() {
                Some(Some(text)) => Ok(text),
                Some(None) => Err(anyhow::anyhow!("service unavailable")),
                None => Ok(self.default_reply.clone()),
            }
        }
    }

    /// Backend that always errors.
    pub struct FailingModel;

    #[async_trait]
    impl ChatCompletion for FailingModel {
        async fn complete(
            &self,
            _messages: &[ChatTurn],
            _max_tokens: u64,
            _temperature: f64,
        ) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FailingModel;
    use super::*;

    #[tokio::test]
    async fn interview_falls_back_on_transport_error() {
        let client = LanguageModelClient::new(Arc::new(FailingModel));
        let reply = client.interview(&[ChatTurn::user("болит голова")]).await;
        assert_eq!(reply, QUESTION_FALLBACK);
    }

    #[tokio::test]
    async fn ranking_reports_error_inline() {
        let client = LanguageModelClient::new(Arc::new(FailingModel));
        let reply = client.ranking(&[ChatTurn::user("кандидаты")]).await;
        assert!(reply.starts_with("Ошибка при подборе врачей:"));
        assert!(reply.contains("connection refused"));
    }

    #[tokio::test]
    async fn unavailable_case_is_distinguishable() {
        let client = LanguageModelClient::new(Arc::new(FailingModel));
        let outcome = client
            .interview_outcome(&[ChatTurn::user("симптомы")])
            .await;
        assert!(outcome.is_unavailable());
    }
}
