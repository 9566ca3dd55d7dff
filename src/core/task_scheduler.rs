//! 提供方调用调度：有界工作池
//!
//! 每次 LLM 调用先取 Semaphore 许可，再 spawn 到运行时执行；调用方只在 await 处挂起，
//! 不会阻塞其他用户的消息处理。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use super::error::ChatError;

/// 调用调度器
#[derive(Clone)]
pub struct CallScheduler {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

impl CallScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 在工作池中执行一次外部调用
    pub async fn run<F, T>(&self, call: F) -> Result<T, ChatError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ChatError::Internal("call scheduler closed".to_string()))?;

        let handle = tokio::spawn(async move {
            let _permit = permit;
            call.await
        });

        handle
            .await
            .map_err(|e| ChatError::Internal(format!("provider task failed: {}", e)))
    }

    /// 当前空闲许可数
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for CallScheduler {
    fn default() -> Self {
        Self::new(4)
    }
}
