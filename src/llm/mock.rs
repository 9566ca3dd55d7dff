//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 回显最后一条 User 消息，并记录调用次数；可注入失败文本与人为延迟。
//! token 用量按空白分词计数。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::llm::{LlmClient, TokenUsage};
use crate::memory::{Message, Role};

#[derive(Debug, Default)]
pub struct MockLlmClient {
    calls: AtomicUsize,
    fail_with: Option<String>,
    delay: Option<Duration>,
    usage: TokenUsage,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用都返回给定的错误文本
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            fail_with: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已发生的调用次数（含失败）
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn respond(&self, model: &str, messages: &[Message], tag: &str) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let reply = format!("[{}{}] {}", model, tag, last_user);
        let prompt: usize = messages.iter().map(|m| m.content.split_whitespace().count()).sum();
        self.usage
            .add(prompt as u64, reply.split_whitespace().count() as u64);
        Ok(reply)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        _max_tokens: Option<u32>,
    ) -> Result<String, String> {
        self.respond(model, messages, "").await
    }

    async fn complete_with_image(
        &self,
        model: &str,
        messages: &[Message],
        image: &[u8],
        _max_tokens: Option<u32>,
    ) -> Result<String, String> {
        self.respond(model, messages, &format!(" +{}b", image.len()))
            .await
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }
}
