//! 对话引擎：会话、提示词、路由、缓存、调度、统计、广播的组合
//!
//! 作为显式状态对象通过 Arc 传给各个处理器，不使用全局变量。
//! 文本消息处理期间持有该用户的会话锁，保证同一用户的回合按到达顺序写入窗口。

use crate::config::{AppConfig, Secrets};
use crate::core::error::ChatError;
use crate::core::stats::{StatsRecorder, StatsSnapshot};
use crate::core::task_scheduler::CallScheduler;
use crate::delivery::{
    split_text, BroadcastDispatcher, BroadcastReport, SAFE_SEGMENT_LEN, TRANSPORT_MAX_LEN,
};
use crate::integrations::Transport;
use crate::llm::{CacheKey, ProviderId, ProviderRouter, ResponseCache, Route};
use crate::memory::{Message, SessionStore, UserId};
use crate::prompts::{CatalogOrigin, PromptCatalog, PromptDefinition};

/// 引擎参数
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub history_length: usize,
    pub cache_size: usize,
    pub segment_len: usize,
    pub max_concurrent_calls: usize,
    pub broadcast_concurrency: Option<usize>,
    pub broadcast_prefix: String,
    pub vision_prompt: String,
    pub vision_max_tokens: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            history_length: cfg.app.history_length,
            cache_size: cfg.app.cache_size,
            // 分段不得超过传输层单条上限
            segment_len: if cfg.app.segment_len == 0 {
                SAFE_SEGMENT_LEN
            } else {
                cfg.app.segment_len.min(TRANSPORT_MAX_LEN)
            },
            max_concurrent_calls: cfg.llm.max_concurrent_calls,
            broadcast_concurrency: cfg.broadcast.max_concurrency,
            broadcast_prefix: cfg.broadcast.prefix.clone(),
            vision_prompt: cfg.llm.vision.prompt.clone(),
            vision_max_tokens: cfg.llm.vision.max_tokens,
        }
    }
}

pub struct ChatEngine {
    sessions: SessionStore,
    catalog: PromptCatalog,
    router: ProviderRouter,
    cache: ResponseCache,
    scheduler: CallScheduler,
    stats: StatsRecorder,
    broadcaster: BroadcastDispatcher,
    settings: EngineSettings,
}

impl ChatEngine {
    pub fn new(settings: EngineSettings, catalog: PromptCatalog, router: ProviderRouter) -> Self {
        Self {
            sessions: SessionStore::new(settings.history_length),
            cache: ResponseCache::new(settings.cache_size),
            scheduler: CallScheduler::new(settings.max_concurrent_calls),
            stats: StatsRecorder::new(),
            broadcaster: BroadcastDispatcher::new(settings.broadcast_concurrency),
            catalog,
            router,
            settings,
        }
    }

    /// 按配置与凭据构建：加载提示词文件、注册可用的提供方
    pub fn from_config(cfg: &AppConfig, secrets: &Secrets) -> Self {
        let default_prompt = PromptDefinition::new(
            PromptDefinition::DEFAULT_ID,
            cfg.prompts.default_title.clone(),
            cfg.prompts.default_content.clone(),
        );
        let catalog = PromptCatalog::new(Some(cfg.prompts.path.clone()), default_prompt);
        let router = ProviderRouter::from_config(cfg, secrets);
        Self::new(EngineSettings::from_config(cfg), catalog, router)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn catalog(&self) -> &PromptCatalog {
        &self.catalog
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// 处理一条文本消息，返回分段后的回复
    ///
    /// 失败时用户消息仍留在窗口中，不追加 assistant 回合。
    pub async fn handle_text(&self, user_id: UserId, text: &str) -> Result<Vec<String>, ChatError> {
        self.stats.record(user_id);

        let mut session = self.sessions.lock(user_id).await;
        session.window.push(Message::user(text));

        let system = self.catalog.resolve(session.prompt_id.as_deref());
        let messages = build_request(&system, session.window.messages());

        tracing::info!(
            "Processing message from {}: {} chars, {} turns of context",
            user_id,
            text.chars().count(),
            session.window.len()
        );

        let route = self.router.resolve(session.provider, false);
        let answer = self.resolve_route(route, &messages).await?;

        session.window.push(Message::assistant(answer.clone()));
        Ok(split_text(&answer, self.settings.segment_len))
    }

    /// 分析图片：不缓存，也不写入对话窗口
    pub async fn handle_image(&self, user_id: UserId, image: &[u8]) -> Result<Vec<String>, ChatError> {
        self.stats.record(user_id);

        let (prompt_id, preference) = self.sessions.preferences(user_id).await;
        let route = self.router.resolve(preference, true);
        let client = self
            .router
            .client(route.provider)
            .ok_or(ChatError::ProviderUnavailable(route.provider))?;
        if !route.capable {
            return Err(ChatError::CapabilityUnsupported {
                provider: route.provider,
                capability: "image",
            });
        }

        let system = self.catalog.resolve(prompt_id.as_deref());
        let messages = vec![
            Message::system(system.content),
            Message::user(self.settings.vision_prompt.clone()),
        ];
        let model = route.model;
        let bytes = image.to_vec();
        let max_tokens = self.settings.vision_max_tokens;

        tracing::info!("Processing image from {}: {} bytes via {}", user_id, bytes.len(), model);

        let answer = self
            .scheduler
            .run(async move {
                client
                    .complete_with_image(&model, &messages, &bytes, Some(max_tokens))
                    .await
            })
            .await?
            .map_err(|raw| {
                let err = ChatError::classify(raw);
                tracing::error!("Image request for {} failed: {}", user_id, err);
                err
            })?;

        Ok(split_text(&answer, self.settings.segment_len))
    }

    /// 按用户当前的提供方偏好完成请求，经过响应缓存
    pub async fn resolve(&self, user_id: UserId, messages: &[Message]) -> Result<String, ChatError> {
        let (_, preference) = self.sessions.preferences(user_id).await;
        let route = self.router.resolve(preference, false);
        self.resolve_route(route, messages).await
    }

    /// 命中缓存直接返回（不让出调度）；未命中则在工作池中调用提供方，成功后写入缓存
    async fn resolve_route(&self, route: Route, messages: &[Message]) -> Result<String, ChatError> {
        let client = self
            .router
            .client(route.provider)
            .ok_or(ChatError::ProviderUnavailable(route.provider))?;

        let key = CacheKey::new(route.provider, &route.model, messages);
        if let Some(hit) = self.cache.get_key(&key) {
            tracing::debug!("Response cache hit for {}/{}", route.provider, route.model);
            return Ok(hit);
        }
        tracing::debug!("Response cache miss for {}/{}", route.provider, route.model);

        if !route.capable {
            return Err(ChatError::CapabilityUnsupported {
                provider: route.provider,
                capability: "chat",
            });
        }

        let model = route.model.clone();
        let owned = messages.to_vec();
        let result = self
            .scheduler
            .run(async move { client.complete(&model, &owned, None).await })
            .await?;

        match result {
            Ok(text) => Ok(self.cache.put_if_absent(key, text)),
            Err(raw) => {
                let err = ChatError::classify(raw);
                tracing::error!("Provider {} failed: {}", route.provider, err);
                Err(err)
            }
        }
    }

    pub async fn reset(&self, user_id: UserId) {
        self.sessions.reset(user_id).await;
    }

    pub async fn set_prompt(&self, user_id: UserId, prompt_id: &str) -> Result<PromptDefinition, ChatError> {
        self.sessions
            .set_prompt(user_id, prompt_id, &self.catalog)
            .await?;
        Ok(self.catalog.resolve(Some(prompt_id)))
    }

    /// 返回实际生效的提供方（所选提供方未配置时为 PRIMARY）
    pub async fn set_provider(&self, user_id: UserId, provider: &str) -> Result<ProviderId, ChatError> {
        self.sessions
            .set_provider(user_id, provider, &self.router)
            .await
    }

    /// 用户当前生效的提供方（已考虑回退）
    pub async fn current_provider(&self, user_id: UserId) -> ProviderId {
        let (_, preference) = self.sessions.preferences(user_id).await;
        self.router.resolve(preference, false).provider
    }

    /// 用户选中的提示词 ID（未选择为 None）
    pub async fn selected_prompt(&self, user_id: UserId) -> Option<String> {
        self.sessions.preferences(user_id).await.0
    }

    pub async fn context(&self, user_id: UserId) -> Vec<Message> {
        self.sessions.context(user_id).await
    }

    pub async fn last_answer(&self, user_id: UserId) -> Option<String> {
        self.sessions.last_answer(user_id).await
    }

    pub fn stats(&self) -> &StatsRecorder {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn reload_prompts(&self) -> (CatalogOrigin, usize) {
        let result = self.catalog.reload();
        tracing::info!("Prompts reloaded: origin={:?} count={}", result.0, result.1);
        result
    }

    /// 向所有出现过的用户广播
    pub async fn broadcast(&self, transport: &dyn Transport, message: &str) -> BroadcastReport {
        let recipients = self.stats.recipients();
        let text = format!("{}{}", self.settings.broadcast_prefix, message);
        self.broadcaster
            .broadcast(transport, &text, &recipients)
            .await
    }
}

/// [system] + 对话窗口
fn build_request(system: &PromptDefinition, window: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(window.len() + 1);
    messages.push(Message::system(system.content.clone()));
    messages.extend_from_slice(window);
    messages
}
