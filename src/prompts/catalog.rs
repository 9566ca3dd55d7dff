//! 提示词目录
//!
//! 从 JSON（列表或 标题→内容 映射）或 TOML 文件加载系统提示词并建立 ID 索引。
//! 加载永不失败：文件缺失、为空或无法解析时退回只含默认提示词的目录。
//! reload 重新读取源文件并原子替换整个目录。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// 单个提示词
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptDefinition {
    pub id: String,
    pub title: String,
    pub content: String,
}

impl PromptDefinition {
    pub const DEFAULT_ID: &'static str = "default";

    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
        }
    }

    /// 合成的默认提示词
    pub fn fallback(content: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_ID, "默认提示词", content)
    }
}

/// 目录来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOrigin {
    /// 只含合成的默认提示词
    Default,
    /// 从源文件加载
    Loaded,
}

/// 一份不可变的提示词集合（ID 唯一，保持文件中的顺序）
#[derive(Debug, Clone)]
pub struct PromptSet {
    prompts: Vec<PromptDefinition>,
    index: HashMap<String, usize>,
    origin: CatalogOrigin,
}

impl PromptSet {
    pub fn default_only(default: &PromptDefinition) -> Self {
        Self {
            prompts: vec![default.clone()],
            index: HashMap::from([(default.id.clone(), 0)]),
            origin: CatalogOrigin::Default,
        }
    }

    /// 去重（保留首个）后建立索引；为空则退回默认
    pub fn from_prompts(prompts: Vec<PromptDefinition>, default: &PromptDefinition) -> Self {
        let mut unique = Vec::with_capacity(prompts.len());
        let mut index = HashMap::new();
        for prompt in prompts {
            if index.contains_key(&prompt.id) {
                tracing::warn!("Duplicate prompt id {:?} ignored", prompt.id);
                continue;
            }
            index.insert(prompt.id.clone(), unique.len());
            unique.push(prompt);
        }

        if unique.is_empty() {
            return Self::default_only(default);
        }

        Self {
            prompts: unique,
            index,
            origin: CatalogOrigin::Loaded,
        }
    }

    /// 解析 JSON 文本；首次失败时修复字符串中的裸换行再试一次
    pub fn parse(text: &str, default: &PromptDefinition) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("prompt source is empty".to_string());
        }

        let data: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(first) => {
                let repaired = repair_multiline_strings(text);
                serde_json::from_str(&repaired)
                    .map_err(|e| format!("{} (after repair: {})", first, e))?
            }
        };

        let prompts = match data {
            Value::Object(map) => map
                .into_iter()
                .enumerate()
                .map(|(i, (title, content))| {
                    PromptDefinition::new(format!("p{}", i + 1), title, value_to_text(&content))
                })
                .collect(),
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| normalize_item(i, item))
                .collect(),
            _ => return Err("unsupported prompt source format".to_string()),
        };

        Ok(Self::from_prompts(prompts, default))
    }

    /// 解析 TOML：`[[prompts]]` 数组，字段同 JSON 列表
    pub fn parse_toml(text: &str, default: &PromptDefinition) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct PromptFile {
            #[serde(default)]
            prompts: Vec<toml::Value>,
        }

        let file: PromptFile = toml::from_str(text).map_err(|e| e.to_string())?;
        let items: Vec<Value> = file
            .prompts
            .into_iter()
            .filter_map(|v| serde_json::to_value(v).ok())
            .collect();
        let prompts = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| normalize_item(i, item))
            .collect();
        Ok(Self::from_prompts(prompts, default))
    }

    pub fn get(&self, id: &str) -> Option<&PromptDefinition> {
        self.index.get(id).map(|&i| &self.prompts[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn prompts(&self) -> &[PromptDefinition] {
        &self.prompts
    }

    pub fn origin(&self) -> CatalogOrigin {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// 列表项 → 提示词；缺失的 id / title 按位置补齐，非对象项跳过
fn normalize_item(i: usize, item: &Value) -> Option<PromptDefinition> {
    let Some(obj) = item.as_object() else {
        tracing::warn!("Prompt entry #{} is not an object, skipped", i + 1);
        return None;
    };
    let field = |name: &str| {
        obj.get(name)
            .map(value_to_text)
            .filter(|s| !s.is_empty())
    };

    Some(PromptDefinition {
        id: field("id").unwrap_or_else(|| format!("p{}", i + 1)),
        title: field("title").unwrap_or_else(|| format!("Prompt {}", i + 1)),
        content: field("content").unwrap_or_default(),
    })
}

fn value_to_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

static MULTILINE_FIELD_RE: OnceLock<Vec<Regex>> = OnceLock::new();

/// 把 "title" / "content" 字符串值里的裸换行替换为 \n 转义
fn repair_multiline_strings(text: &str) -> String {
    let patterns = MULTILINE_FIELD_RE.get_or_init(|| {
        ["content", "title"]
            .iter()
            .filter_map(|field| Regex::new(&format!(r#"(?s)("{}"\s*:\s*")(.*?)(")"#, field)).ok())
            .collect()
    });

    let mut out = text.to_string();
    for re in patterns {
        out = re
            .replace_all(&out, |caps: &regex::Captures| {
                format!(
                    "{}{}{}",
                    &caps[1],
                    caps[2].replace("\r\n", "\\n").replace('\n', "\\n"),
                    &caps[3]
                )
            })
            .into_owned();
    }
    out
}

/// 提示词目录：持有当前集合，可在运行时重载
pub struct PromptCatalog {
    source: Option<PathBuf>,
    default: PromptDefinition,
    active: RwLock<Arc<PromptSet>>,
}

impl PromptCatalog {
    /// 创建并立即从 source 加载
    pub fn new(source: Option<PathBuf>, default: PromptDefinition) -> Self {
        let set = Self::load(source.as_deref(), &default);
        Self {
            source,
            default,
            active: RwLock::new(Arc::new(set)),
        }
    }

    /// 以给定集合创建（无源文件，reload 后只剩默认提示词）
    pub fn from_set(set: PromptSet, default: PromptDefinition) -> Self {
        Self {
            source: None,
            default,
            active: RwLock::new(Arc::new(set)),
        }
    }

    /// 读取并解析源文件；任何失败都退回默认目录
    pub fn load(source: Option<&Path>, default: &PromptDefinition) -> PromptSet {
        let Some(path) = source else {
            return PromptSet::default_only(default);
        };
        if !path.exists() {
            tracing::info!("Prompt file {:?} not found, using default prompt", path);
            return PromptSet::default_only(default);
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                if path.extension().and_then(|e| e.to_str()) == Some("toml") {
                    PromptSet::parse_toml(&text, default)
                } else {
                    PromptSet::parse(&text, default)
                }
            });

        match parsed {
            Ok(set) => {
                tracing::info!("Loaded {} prompts from {:?}", set.len(), path);
                set
            }
            Err(e) => {
                tracing::warn!("Failed to load prompts from {:?}: {}. Using default prompt", path, e);
                PromptSet::default_only(default)
            }
        }
    }

    /// 重新加载并原子替换
    pub fn reload(&self) -> (CatalogOrigin, usize) {
        let set = Self::load(self.source.as_deref(), &self.default);
        let result = (set.origin(), set.len());
        *self.active.write() = Arc::new(set);
        result
    }

    /// 按 ID 取提示词；未设置或不存在时返回默认提示词
    pub fn resolve(&self, id: Option<&str>) -> PromptDefinition {
        let set = self.snapshot();
        id.and_then(|id| set.get(id).cloned())
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.active.read().contains(id)
    }

    /// 当前集合的快照
    pub fn snapshot(&self) -> Arc<PromptSet> {
        Arc::clone(&self.active.read())
    }

    pub fn default_prompt(&self) -> &PromptDefinition {
        &self.default
    }
}
