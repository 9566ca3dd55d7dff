//! Chatgate - 多模型对话网关
//!
//! 模块划分：
//! - **bot**: 命令、菜单与回调处理，报表渲染
//! - **config**: 应用配置加载（TOML + 环境变量）与凭据读取
//! - **core**: 对话引擎、错误分类、调用调度、使用统计
//! - **delivery**: 长文本分段与并发广播
//! - **integrations**: 传输抽象与 Telegram 长轮询
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）、路由、响应缓存
//! - **memory**: 对话窗口与按用户的会话存储
//! - **observability**: 日志初始化
//! - **prompts**: 系统提示词目录与热重载

pub mod bot;
pub mod config;
pub mod core;
pub mod delivery;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompts;
