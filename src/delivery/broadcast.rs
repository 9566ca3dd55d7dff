//! 广播：把同一条消息并发发给所有收件人
//!
//! 单个收件人失败只记录日志，不影响其他人。返回尝试的收件人数，失败的 ID 另行列出。
//! 并发上限可配置；未设置时所有发送同时进行。

use futures_util::stream::{self, StreamExt};

use crate::integrations::{ChatId, Transport};

/// 一次广播的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// 尝试发送的收件人数
    pub attempted: usize,
    /// 发送失败的收件人
    pub failed: Vec<ChatId>,
}

impl BroadcastReport {
    /// 确认成功的数量
    pub fn delivered(&self) -> usize {
        self.attempted - self.failed.len()
    }
}

/// 广播分发器
#[derive(Debug, Clone, Default)]
pub struct BroadcastDispatcher {
    max_concurrency: Option<usize>,
}

impl BroadcastDispatcher {
    pub fn new(max_concurrency: Option<usize>) -> Self {
        Self {
            max_concurrency: max_concurrency.map(|n| n.max(1)),
        }
    }

    pub fn max_concurrency(&self) -> Option<usize> {
        self.max_concurrency
    }

    pub async fn broadcast(
        &self,
        transport: &dyn Transport,
        message: &str,
        recipients: &[ChatId],
    ) -> BroadcastReport {
        let limit = self
            .max_concurrency
            .unwrap_or(recipients.len())
            .max(1);

        let results: Vec<(ChatId, anyhow::Result<()>)> = stream::iter(recipients.iter().copied())
            .map(|chat| async move { (chat, transport.send_text(chat, message, None).await) })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut failed = Vec::new();
        for (chat, result) in results {
            if let Err(e) = result {
                tracing::error!("Failed to send broadcast to {}: {:#}", chat, e);
                failed.push(chat);
            }
        }
        failed.sort_unstable();

        tracing::info!(
            "Broadcast finished: attempted={} failed={}",
            recipients.len(),
            failed.len()
        );

        BroadcastReport {
            attempted: recipients.len(),
            failed,
        }
    }
}
