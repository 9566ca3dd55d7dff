//! 会话存储
//!
//! 每个用户一个会话：对话窗口 + 选中的提示词 + 选中的提供方。
//! 每个会话各有一把互斥锁：处理一条消息时持有该锁直到回复写回窗口，
//! 同一用户的并发消息因此按到达顺序串行，不同用户互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::ChatError;
use crate::llm::{ProviderId, ProviderRouter};
use crate::memory::{DialogueWindow, Message};
use crate::prompts::PromptCatalog;

/// 用户 ID（传输层的数字 ID）
pub type UserId = i64;

/// 单个用户的会话状态
#[derive(Debug, Clone)]
pub struct UserSession {
    pub window: DialogueWindow,
    /// None 表示使用默认提示词
    pub prompt_id: Option<String>,
    /// None 表示使用 PRIMARY
    pub provider: Option<ProviderId>,
}

impl UserSession {
    pub fn new(history_length: usize) -> Self {
        Self {
            window: DialogueWindow::new(history_length),
            prompt_id: None,
            provider: None,
        }
    }
}

/// 会话存储
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, Arc<Mutex<UserSession>>>>,
    history_length: usize,
}

impl SessionStore {
    pub fn new(history_length: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_length,
        }
    }

    async fn entry(&self, user_id: UserId) -> Arc<Mutex<UserSession>> {
        if let Some(session) = self.sessions.read().await.get(&user_id) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(
            sessions
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(UserSession::new(self.history_length)))),
        )
    }

    /// 获取用户会话的独占锁（不存在则创建）
    ///
    /// 持有期间不要再调用本存储针对同一用户的其他方法，否则会自锁。
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<UserSession> {
        self.entry(user_id).await.lock_owned().await
    }

    /// 追加一条消息，超出 history_length 时丢弃最旧的
    pub async fn append(&self, user_id: UserId, message: Message) {
        self.lock(user_id).await.window.push(message);
    }

    /// 当前窗口（未见过的用户返回空）
    pub async fn context(&self, user_id: UserId) -> Vec<Message> {
        let session = self.sessions.read().await.get(&user_id).cloned();
        match session {
            Some(session) => session.lock().await.window.messages().to_vec(),
            None => Vec::new(),
        }
    }

    pub async fn reset(&self, user_id: UserId) {
        self.lock(user_id).await.window.clear();
    }

    /// 覆盖用户的提示词选择；ID 不在目录中时不修改并返回 PromptNotFound
    pub async fn set_prompt(
        &self,
        user_id: UserId,
        prompt_id: &str,
        catalog: &PromptCatalog,
    ) -> Result<(), ChatError> {
        if !catalog.contains(prompt_id) {
            return Err(ChatError::PromptNotFound(prompt_id.to_string()));
        }
        self.lock(user_id).await.prompt_id = Some(prompt_id.to_string());
        Ok(())
    }

    /// 覆盖用户的提供方选择，返回实际生效的提供方
    ///
    /// 未知 ID 返回 ProviderNotFound 且不修改；未配置的提供方照常记录，路由时回退到 PRIMARY。
    pub async fn set_provider(
        &self,
        user_id: UserId,
        provider: &str,
        router: &ProviderRouter,
    ) -> Result<ProviderId, ChatError> {
        let id: ProviderId = provider.parse()?;
        let effective = router.resolve(Some(id), false).provider;
        if effective != id {
            tracing::info!("Provider {} unavailable for {}, falling back to {}", id, user_id, effective);
        }
        self.lock(user_id).await.provider = Some(id);
        Ok(effective)
    }

    /// 用户当前偏好：(提示词, 提供方)
    pub async fn preferences(&self, user_id: UserId) -> (Option<String>, Option<ProviderId>) {
        let session = self.sessions.read().await.get(&user_id).cloned();
        match session {
            Some(session) => {
                let s = session.lock().await;
                (s.prompt_id.clone(), s.provider)
            }
            None => (None, None),
        }
    }

    /// 最近一条 assistant 回复
    pub async fn last_answer(&self, user_id: UserId) -> Option<String> {
        let session = self.sessions.read().await.get(&user_id).cloned()?;
        let s = session.lock().await;
        s.window.last_assistant().map(|m| m.content.clone())
    }

    pub async fn user_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn history_length(&self) -> usize {
        self.history_length
    }
}
