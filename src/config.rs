//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CHATGATE__*` 覆盖（双下划线表示嵌套，如 `CHATGATE__APP__HISTORY_LENGTH=8`）。
//! 凭据不进配置文件：见 [`Secrets`]。

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub prompts: PromptsSection,
    pub llm: LlmSection,
    pub broadcast: BroadcastSection,
    pub telegram: TelegramSection,
}

/// [app] 段：对话窗口、缓存容量、管理员、分段长度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 每个用户保留的消息条数
    pub history_length: usize,
    /// 响应缓存条目上限（0 表示不限）
    pub cache_size: usize,
    /// 管理员用户 ID（静态白名单）
    pub admin_ids: Vec<i64>,
    /// 单条出站消息的最大字符数（低于传输层硬上限 4096）
    pub segment_len: usize,
    /// 凭据文件所在目录
    pub secrets_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            history_length: 5,
            cache_size: 1000,
            admin_ids: Vec::new(),
            segment_len: 3800,
            secrets_dir: PathBuf::from("."),
        }
    }
}

/// [prompts] 段：提示词目录文件与内置默认提示词
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptsSection {
    pub path: PathBuf,
    pub default_title: String,
    pub default_content: String,
}

pub const DEFAULT_PROMPT_CONTENT: &str = "You are a senior Linux administrator and teacher with \
expertise in Linux, TCP/IP and NetFlow.\n\
Answer format: a short answer (1-2 sentences), a detailed explanation when needed, \
ready-to-use commands or configs, and a practical exercise.\n\
Never suggest destructive commands such as `rm -rf /`, `chmod 777` or flushing firewall rules; \
always explain risks and alternatives.\n\
Analyse attached logs and configs line by line; for general questions ask which distribution \
is used. Answer in the user's language.";

impl Default for PromptsSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/prompts.json"),
            default_title: "默认提示词".to_string(),
            default_content: DEFAULT_PROMPT_CONTENT.to_string(),
        }
    }
}

/// [llm] 段：温度、调用并发、各提供方模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub temperature: f32,
    /// 同时进行的提供方调用上限
    pub max_concurrent_calls: usize,
    pub openai: LlmOpenAiSection,
    pub deepseek: LlmDeepSeekSection,
    pub vision: VisionSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_concurrent_calls: 4,
            openai: LlmOpenAiSection::default(),
            deepseek: LlmDeepSeekSection::default(),
            vision: VisionSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmOpenAiSection {
    pub base_url: Option<String>,
    pub chat_model: String,
    pub vision_model: String,
}

impl Default for LlmOpenAiSection {
    fn default() -> Self {
        Self {
            base_url: None,
            chat_model: "gpt-4-turbo".to_string(),
            vision_model: "gpt-4-vision-preview".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmDeepSeekSection {
    pub base_url: Option<String>,
    pub chat_model: String,
}

impl Default for LlmDeepSeekSection {
    fn default() -> Self {
        Self {
            base_url: None,
            chat_model: crate::llm::DEEPSEEK_CHAT.to_string(),
        }
    }
}

/// [llm.vision] 段：图片分析的提问与 token 上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VisionSection {
    pub prompt: String,
    pub max_tokens: u32,
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            prompt: "What is in this image?".to_string(),
            max_tokens: 512,
        }
    }
}

/// [broadcast] 段：广播并发上限（未设置 = 不限）与消息前缀
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastSection {
    pub max_concurrency: Option<usize>,
    pub prefix: String,
}

impl Default for BroadcastSection {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            prefix: "📢 广播：\n\n".to_string(),
        }
    }
}

/// [telegram] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub api_base: String,
    /// getUpdates 长轮询超时（秒）
    pub poll_timeout_secs: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CHATGATE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CHATGATE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CHATGATE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("app.admin_ids"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 凭据：优先读 secrets_dir 下的同名文件（首个非空行），否则读环境变量
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub telegram_token: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_project: Option<String>,
    pub openai_org: Option<String>,
    pub deepseek_api_key: Option<String>,
}

impl Secrets {
    pub fn load(dir: &Path) -> Self {
        Self {
            telegram_token: secret(dir, "telegram_token", &["TELEGRAM_BOT_TOKEN", "BOT_TOKEN"]),
            openai_api_key: secret(dir, "openai_api_key", &["OPENAI_API_KEY"]),
            openai_project: secret(dir, "openai_project", &["OPENAI_PROJECT"]),
            openai_org: secret(dir, "openai_org", &["OPENAI_ORG"]),
            deepseek_api_key: secret(dir, "deepseek_api_key", &["DEEPSEEK_API_KEY"]),
        }
    }
}

fn secret(dir: &Path, file: &str, env_keys: &[&str]) -> Option<String> {
    read_secret_file(&dir.join(file)).or_else(|| {
        env_keys
            .iter()
            .filter_map(|k| std::env::var(k).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    })
}

/// 读取文件中第一条非空行；文件不存在返回 None，读取失败记 warn 后返回 None
pub fn read_secret_file(path: &Path) -> Option<String> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(String::from),
        Err(e) => {
            tracing::warn!("Failed to read secret file {:?}: {}", path, e);
            None
        }
    }
}
