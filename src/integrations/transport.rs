//! 传输层抽象
//!
//! 核心只依赖两种出站操作（发文本、发文件）与三种入站事件；具体平台（Telegram）在 integrations 下实现。

use async_trait::async_trait;

use crate::memory::UserId;

/// 会话 ID（私聊时与用户 ID 相同）
pub type ChatId = i64;

/// 内联按钮
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    /// 回调数据，如 `set_prompt:p1`
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// 随消息附带的交互控件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affordance {
    /// 消息下方的内联按钮（每个内层 Vec 为一行）
    Inline(Vec<Vec<Button>>),
    /// 常驻的回复键盘（按钮文本即发送的文本）
    Keyboard(Vec<Vec<String>>),
}

/// 发起事件的用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: UserId,
    pub first_name: String,
}

/// 入站事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text {
        from: Sender,
        chat: ChatId,
        text: String,
    },
    /// 图片（已下载的字节）
    Image {
        from: Sender,
        chat: ChatId,
        bytes: Vec<u8>,
    },
    /// 内联按钮回调
    Callback {
        from: Sender,
        chat: ChatId,
        data: String,
    },
}

impl InboundEvent {
    pub fn sender(&self) -> &Sender {
        match self {
            InboundEvent::Text { from, .. }
            | InboundEvent::Image { from, .. }
            | InboundEvent::Callback { from, .. } => from,
        }
    }

    pub fn chat(&self) -> ChatId {
        match self {
            InboundEvent::Text { chat, .. }
            | InboundEvent::Image { chat, .. }
            | InboundEvent::Callback { chat, .. } => *chat,
        }
    }
}

/// 出站传输
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        affordance: Option<&Affordance>,
    ) -> anyhow::Result<()>;

    async fn send_document(&self, chat: ChatId, bytes: Vec<u8>, filename: &str) -> anyhow::Result<()>;
}
