//! 提供方路由
//!
//! 提供方是固定的两个变体（PRIMARY / SECONDARY），启动时根据已配置的凭据决定是否可用。
//! 路由不做 I/O、不报错：用户偏好不可用时静默回退到 PRIMARY。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{AppConfig, Secrets};
use crate::core::ChatError;
use crate::llm::deepseek::create_deepseek_client;
use crate::llm::openai::{OpenAiClient, OpenAiSettings};
use crate::llm::LlmClient;

/// 提供方标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum ProviderId {
    /// OpenAI
    #[default]
    Primary,
    /// DeepSeek
    Secondary,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::Primary, ProviderId::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Primary => "PRIMARY",
            ProviderId::Secondary => "SECONDARY",
        }
    }

    /// 菜单中显示的名称
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Primary => "OpenAI",
            ProviderId::Secondary => "DeepSeek",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRIMARY" | "OPEN_AI" | "OPENAI" => Ok(ProviderId::Primary),
            "SECONDARY" | "DEEP_SEEK" | "DEEPSEEK" => Ok(ProviderId::Secondary),
            _ => Err(ChatError::ProviderNotFound(s.to_string())),
        }
    }
}

/// 提供方能力描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub id: ProviderId,
    pub chat_model: String,
    pub vision_model: Option<String>,
    pub supports_vision: bool,
    /// 凭据缺失时为 false；由 ProviderRouter::register 设置
    pub available: bool,
}

impl ProviderProfile {
    pub fn new(id: ProviderId, chat_model: impl Into<String>) -> Self {
        Self {
            id,
            chat_model: chat_model.into(),
            vision_model: None,
            supports_vision: false,
            available: false,
        }
    }

    pub fn with_vision(mut self, model: impl Into<String>) -> Self {
        self.vision_model = Some(model.into());
        self.supports_vision = true;
        self
    }
}

/// 一次路由的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub provider: ProviderId,
    pub model: String,
    /// 请求的模态是否受支持；为 false 时调用方必须以 CapabilityUnsupported 失败
    pub capable: bool,
}

struct ProviderSlot {
    profile: ProviderProfile,
    client: Option<Arc<dyn LlmClient>>,
}

/// 提供方路由器
pub struct ProviderRouter {
    primary: ProviderSlot,
    secondary: ProviderSlot,
}

impl ProviderRouter {
    /// 两个提供方均未注册客户端（均不可用）
    pub fn new(primary: ProviderProfile, secondary: ProviderProfile) -> Self {
        Self {
            primary: ProviderSlot {
                profile: ProviderProfile {
                    id: ProviderId::Primary,
                    available: false,
                    ..primary
                },
                client: None,
            },
            secondary: ProviderSlot {
                profile: ProviderProfile {
                    id: ProviderId::Secondary,
                    available: false,
                    ..secondary
                },
                client: None,
            },
        }
    }

    /// 按凭据构建：OpenAI 为 PRIMARY（支持图片），DeepSeek 为 SECONDARY（仅文本）
    pub fn from_config(cfg: &AppConfig, secrets: &Secrets) -> Self {
        let llm = &cfg.llm;
        let mut router = Self::new(
            ProviderProfile::new(ProviderId::Primary, &llm.openai.chat_model)
                .with_vision(&llm.openai.vision_model),
            ProviderProfile::new(ProviderId::Secondary, &llm.deepseek.chat_model),
        );

        match &secrets.openai_api_key {
            Some(key) => {
                let client = OpenAiClient::new(OpenAiSettings {
                    base_url: llm.openai.base_url.clone(),
                    api_key: key.clone(),
                    project: secrets.openai_project.clone(),
                    organization: secrets.openai_org.clone(),
                    temperature: llm.temperature,
                });
                router.register(ProviderId::Primary, Arc::new(client));
            }
            None => tracing::warn!("OpenAI key not configured, PRIMARY provider unavailable"),
        }

        match &secrets.deepseek_api_key {
            Some(key) => {
                let client = create_deepseek_client(
                    key,
                    llm.deepseek.base_url.as_deref(),
                    llm.temperature,
                );
                router.register(ProviderId::Secondary, Arc::new(client));
            }
            None => tracing::info!("DeepSeek key not configured, SECONDARY provider disabled"),
        }

        router
    }

    /// 注册客户端，使该提供方可用
    pub fn register(&mut self, id: ProviderId, client: Arc<dyn LlmClient>) {
        let slot = self.slot_mut(id);
        slot.profile.available = true;
        slot.client = Some(client);
    }

    fn slot(&self, id: ProviderId) -> &ProviderSlot {
        match id {
            ProviderId::Primary => &self.primary,
            ProviderId::Secondary => &self.secondary,
        }
    }

    fn slot_mut(&mut self, id: ProviderId) -> &mut ProviderSlot {
        match id {
            ProviderId::Primary => &mut self.primary,
            ProviderId::Secondary => &mut self.secondary,
        }
    }

    pub fn profile(&self, id: ProviderId) -> &ProviderProfile {
        &self.slot(id).profile
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ProviderProfile> {
        [&self.primary.profile, &self.secondary.profile].into_iter()
    }

    pub fn is_available(&self, id: ProviderId) -> bool {
        self.slot(id).profile.available
    }

    /// 任一提供方可用
    pub fn any_available(&self) -> bool {
        self.profiles().any(|p| p.available)
    }

    pub fn client(&self, id: ProviderId) -> Option<Arc<dyn LlmClient>> {
        self.slot(id).client.clone()
    }

    /// 解析用户偏好：不可用则回退到 PRIMARY；needs_vision 且不支持时 capable=false
    pub fn resolve(&self, preference: Option<ProviderId>, needs_vision: bool) -> Route {
        let requested = preference.unwrap_or_default();
        let provider = if self.is_available(requested) {
            requested
        } else {
            ProviderId::Primary
        };
        let profile = self.profile(provider);

        if needs_vision {
            let model = profile
                .vision_model
                .clone()
                .unwrap_or_else(|| profile.chat_model.clone());
            Route {
                provider,
                model,
                capable: profile.supports_vision,
            }
        } else {
            Route {
                provider,
                model: profile.chat_model.clone(),
                capable: true,
            }
        }
    }

    /// 聚合所有已注册客户端的 token 使用
    pub fn token_usage(&self) -> (u64, u64, u64) {
        [&self.primary, &self.secondary]
            .iter()
            .filter_map(|slot| slot.client.as_ref())
            .map(|client| client.token_usage())
            .fold((0, 0, 0), |acc, (a, b, c)| (acc.0 + a, acc.1 + b, acc.2 + c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn router(secondary_available: bool) -> ProviderRouter {
        let mut router = ProviderRouter::new(
            ProviderProfile::new(ProviderId::Primary, "gpt-4-turbo")
                .with_vision("gpt-4-vision-preview"),
            ProviderProfile::new(ProviderId::Secondary, "deepseek-chat"),
        );
        router.register(ProviderId::Primary, Arc::new(MockLlmClient::new()));
        if secondary_available {
            router.register(ProviderId::Secondary, Arc::new(MockLlmClient::new()));
        }
        router
    }

    #[test]
    fn test_default_preference_is_primary() {
        let route = router(true).resolve(None, false);
        assert_eq!(route.provider, ProviderId::Primary);
        assert_eq!(route.model, "gpt-4-turbo");
        assert!(route.capable);
    }

    #[test]
    fn test_unavailable_preference_falls_back_to_primary() {
        let route = router(false).resolve(Some(ProviderId::Secondary), false);
        assert_eq!(route.provider, ProviderId::Primary);
        assert_eq!(route.model, "gpt-4-turbo");
    }

    #[test]
    fn test_available_secondary_is_used() {
        let route = router(true).resolve(Some(ProviderId::Secondary), false);
        assert_eq!(route.provider, ProviderId::Secondary);
        assert_eq!(route.model, "deepseek-chat");
    }

    #[test]
    fn test_vision_capability() {
        let r = router(true);
        let primary = r.resolve(None, true);
        assert!(primary.capable);
        assert_eq!(primary.model, "gpt-4-vision-preview");

        let secondary = r.resolve(Some(ProviderId::Secondary), true);
        assert_eq!(secondary.provider, ProviderId::Secondary);
        assert!(!secondary.capable);
    }

    #[test]
    fn test_provider_id_parsing() {
        assert_eq!("PRIMARY".parse::<ProviderId>().unwrap(), ProviderId::Primary);
        assert_eq!("deep_seek".parse::<ProviderId>().unwrap(), ProviderId::Secondary);
        assert!(matches!(
            "CLAUDE".parse::<ProviderId>(),
            Err(ChatError::ProviderNotFound(_))
        ));
    }

    #[test]
    fn test_availability_flags() {
        let r = router(false);
        assert!(r.is_available(ProviderId::Primary));
        assert!(!r.is_available(ProviderId::Secondary));
        assert!(r.client(ProviderId::Secondary).is_none());
        assert!(r.any_available());
    }

    #[tokio::test]
    async fn test_token_usage_sums_registered_clients() {
        use crate::memory::Message;

        let primary = Arc::new(MockLlmClient::new());
        let secondary = Arc::new(MockLlmClient::new());
        let mut r = ProviderRouter::new(
            ProviderProfile::new(ProviderId::Primary, "gpt"),
            ProviderProfile::new(ProviderId::Secondary, "ds"),
        );
        r.register(ProviderId::Primary, primary.clone());
        r.register(ProviderId::Secondary, secondary.clone());
        assert_eq!(r.token_usage(), (0, 0, 0));

        // "[gpt] two words" -> 3, "[ds] one" -> 2
        primary.complete("gpt", &[Message::user("two words")], None).await.unwrap();
        secondary.complete("ds", &[Message::user("one")], None).await.unwrap();
        assert_eq!(r.token_usage(), (3, 5, 8));
    }
}
