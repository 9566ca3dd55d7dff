//! LLM 客户端抽象
//!
//! 所有后端（OpenAI / DeepSeek / Mock）实现 LlmClient。错误以提供方原始文本返回，
//! 由引擎边界统一分类（见 ChatError::classify）。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：模型按调用传入，同一客户端可服务多个模型
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 文本完成
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: Option<u32>,
    ) -> Result<String, String>;

    /// 带图片的完成：图片附在最后一条 user 消息上
    async fn complete_with_image(
        &self,
        _model: &str,
        _messages: &[Message],
        _image: &[u8],
        _max_tokens: Option<u32>,
    ) -> Result<String, String> {
        Err("vision not supported by this client".to_string())
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
