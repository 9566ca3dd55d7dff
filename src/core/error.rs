//! 对话引擎错误类型
//!
//! 提供方（LLM）的原始错误文本只在引擎边界分类一次（classify），之后以具体类别返回给调用方，
//! 由前端转成面向用户的提示（user_message）。不做自动重试。

use thiserror::Error;

use crate::llm::ProviderId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// 未配置凭据的提供方
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(ProviderId),

    /// 提供方不支持请求的模态（如图片），不会发起调用
    #[error("Provider {provider} does not support {capability}")]
    CapabilityUnsupported {
        provider: ProviderId,
        capability: &'static str,
    },

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Region blocked: {0}")]
    RegionBlocked(String),

    #[error("Provider failure: {0}")]
    ProviderFailure(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// 按错误文本子串分类提供方失败；余额不足优先于地区限制
    pub fn classify(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let text = raw.to_lowercase();

        if text.contains("402")
            || (text.contains("insufficient") && text.contains("balance"))
            || text.contains("payment required")
        {
            return ChatError::InsufficientBalance(raw);
        }

        if text.contains("unsupported_country_region_territory")
            || text.contains("request_forbidden")
            || (text.contains("403") && text.contains("openai"))
        {
            return ChatError::RegionBlocked(raw);
        }

        ChatError::ProviderFailure(raw)
    }

    /// 提供方调用失败（而非选择 / 校验失败）
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            ChatError::InsufficientBalance(_)
                | ChatError::RegionBlocked(_)
                | ChatError::ProviderFailure(_)
        )
    }

    /// 面向终端用户的提示
    pub fn user_message(&self) -> String {
        match self {
            ChatError::ProviderUnavailable(p) => {
                format!("{} 未配置，请通过 /ai 选择其他 AI 提供方。", p.display_name())
            }
            ChatError::CapabilityUnsupported { provider, .. } => {
                format!("{} 不支持图片分析，请通过 /ai 切换提供方。", provider.display_name())
            }
            ChatError::InsufficientBalance(_) => {
                "提供方余额不足。请充值或通过 /ai 选择其他提供方。".to_string()
            }
            ChatError::RegionBlocked(_) => "当前地区无法访问该提供方。可选方案：\n\
                 - 将机器人部署在受支持地区的主机上\n\
                 - 通过 /ai 切换到其他提供方"
                .to_string(),
            ChatError::PromptNotFound(_) => "未知的提示词。".to_string(),
            ChatError::ProviderNotFound(_) => "未知的 AI 提供方。".to_string(),
            ChatError::ProviderFailure(_) | ChatError::Transport(_) | ChatError::Internal(_) => {
                "抱歉，处理时出错，请稍后再试。".to_string()
            }
        }
    }
}
