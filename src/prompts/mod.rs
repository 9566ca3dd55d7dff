//! 提示词目录：系统提示词的加载、索引与热重载

pub mod catalog;

pub use catalog::{CatalogOrigin, PromptCatalog, PromptDefinition, PromptSet};
