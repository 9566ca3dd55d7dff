//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、提供方路由、响应缓存

pub mod cache;
pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod router;
pub mod traits;

pub use cache::{CacheKey, ResponseCache};
pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, OpenAiSettings, TokenUsage};
pub use router::{ProviderId, ProviderProfile, ProviderRouter, Route};
pub use traits::LlmClient;
