//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! DeepSeek 提供与 OpenAI 兼容的接口，但不支持图片输入。
//! - Base URL: https://api.deepseek.com/v1
//! - 模型: deepseek-chat

use crate::llm::openai::{OpenAiClient, OpenAiSettings};

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";

/// 创建 DeepSeek 客户端；base_url 为空时使用官方地址
pub fn create_deepseek_client(api_key: &str, base_url: Option<&str>, temperature: f32) -> OpenAiClient {
    OpenAiClient::new(OpenAiSettings {
        base_url: Some(base_url.unwrap_or(DEEPSEEK_BASE_URL).to_string()),
        api_key: api_key.to_string(),
        project: None,
        organization: None,
        temperature,
    })
}
