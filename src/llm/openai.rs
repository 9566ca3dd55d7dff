//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；OpenAI 与 DeepSeek 共用此实现。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 客户端连接参数
#[derive(Debug, Clone, Default)]
pub struct OpenAiSettings {
    pub base_url: Option<String>,
    pub api_key: String,
    pub project: Option<String>,
    pub organization: Option<String>,
    pub temperature: f32,
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    temperature: f32,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(settings: OpenAiSettings) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(settings.api_key);
        if let Some(url) = settings.base_url {
            config = config.with_api_base(url);
        }
        if let Some(project) = settings.project {
            config = config.with_project_id(project);
        }
        if let Some(org) = settings.organization {
            config = config.with_org_id(org);
        }

        Self {
            client: Client::with_config(config),
            temperature: settings.temperature,
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, String> {
        let msg: ChatCompletionRequestMessage = match m.role {
            Role::System => ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(|e| e.to_string())?
                .into(),
            Role::User => ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(|e| e.to_string())?
                .into(),
            Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(|e| e.to_string())?
                .into(),
        };
        Ok(msg)
    }

    fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, String> {
        messages.iter().map(Self::to_openai_message).collect()
    }

    /// user 消息 = 文本 + data URL 图片
    fn image_message(text: &str, image: &[u8]) -> Result<ChatCompletionRequestMessage, String> {
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(image));

        let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(text)
            .build()
            .map_err(|e| e.to_string())?;
        let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(data_url)
                    .detail(ImageDetail::Auto)
                    .build()
                    .map_err(|e| e.to_string())?,
            )
            .build()
            .map_err(|e| e.to_string())?;

        let msg = ChatCompletionRequestUserMessageArgs::default()
            .content(vec![
                ChatCompletionRequestUserMessageContentPart::Text(text_part),
                ChatCompletionRequestUserMessageContentPart::ImageUrl(image_part),
            ])
            .build()
            .map_err(|e| e.to_string())?;
        Ok(msg.into())
    }

    async fn send(
        &self,
        model: &str,
        messages: Vec<ChatCompletionRequestMessage>,
        max_tokens: Option<u32>,
    ) -> Result<String, String> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model)
            .messages(messages)
            .temperature(self.temperature);
        if let Some(max) = max_tokens {
            args.max_completion_tokens(max);
        }
        let request = args.build().map_err(|e| e.to_string())?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| e.to_string())?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        Ok(content)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: Option<u32>,
    ) -> Result<String, String> {
        let messages = Self::to_openai_messages(messages)?;
        self.send(model, messages, max_tokens).await
    }

    async fn complete_with_image(
        &self,
        model: &str,
        messages: &[Message],
        image: &[u8],
        max_tokens: Option<u32>,
    ) -> Result<String, String> {
        let last_user = messages.iter().rposition(|m| m.role == Role::User);
        let mut converted = Vec::with_capacity(messages.len());
        for (i, m) in messages.iter().enumerate() {
            if Some(i) == last_user {
                converted.push(Self::image_message(&m.content, image)?);
            } else {
                converted.push(Self::to_openai_message(m)?);
            }
        }
        if last_user.is_none() {
            converted.push(Self::image_message("", image)?);
        }
        self.send(model, converted, max_tokens).await
    }
}
