//! 响应缓存
//!
//! 键 = (提供方, 模型, 完整的有序消息列表)。同一键只写一次，之后相同请求一律返回首次结果。
//! 容量超出时按 LRU 淘汰；capacity 为 0 表示不限。
//! 使用同步锁：命中路径不让出调度。

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::llm::ProviderId;
use crate::memory::{Message, Role};

/// 缓存键：完全按发送内容构造，不做摘要，避免碰撞
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    provider: ProviderId,
    model: String,
    messages: Vec<(Role, String)>,
}

impl CacheKey {
    pub fn new(provider: ProviderId, model: &str, messages: &[Message]) -> Self {
        Self {
            provider,
            model: model.to_string(),
            messages: messages
                .iter()
                .map(|m| (m.role, m.content.clone()))
                .collect(),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// HashMap<SharedKey, _> 可直接用 &CacheKey 查询
#[derive(Debug, Clone)]
struct SharedKey(Arc<CacheKey>);

impl PartialEq for SharedKey {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl Eq for SharedKey {}

impl Hash for SharedKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl Borrow<CacheKey> for SharedKey {
    fn borrow(&self) -> &CacheKey {
        &self.0
    }
}

struct Entry {
    value: String,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<SharedKey, Entry>,
    /// tick -> key，最小 tick 即最久未使用
    order: BTreeMap<u64, SharedKey>,
    next_tick: u64,
}

impl LruState {
    fn touch(&mut self, key: &CacheKey) -> Option<String> {
        let tick = self.next_tick;
        let entry = self.entries.get_mut(key)?;
        let old_tick = std::mem::replace(&mut entry.tick, tick);
        let value = entry.value.clone();
        self.next_tick += 1;
        if let Some(shared) = self.order.remove(&old_tick) {
            self.order.insert(tick, shared);
        }
        Some(value)
    }
}

/// 响应缓存
pub struct ResponseCache {
    state: Mutex<LruState>,
    capacity: usize,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            capacity,
        }
    }

    /// 未命中返回 None（不是错误）
    pub fn get(&self, provider: ProviderId, model: &str, messages: &[Message]) -> Option<String> {
        self.get_key(&CacheKey::new(provider, model, messages))
    }

    pub fn get_key(&self, key: &CacheKey) -> Option<String> {
        self.state.lock().touch(key)
    }

    /// 写入首个结果；键已存在时保留旧值并返回它
    pub fn put_if_absent(&self, key: CacheKey, value: String) -> String {
        let mut state = self.state.lock();
        if let Some(existing) = state.touch(&key) {
            return existing;
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        let shared = SharedKey(Arc::new(key));
        state.order.insert(tick, shared.clone());
        state.entries.insert(
            shared,
            Entry {
                value: value.clone(),
                tick,
            },
        );

        if self.capacity > 0 {
            while state.entries.len() > self.capacity {
                let Some((_, oldest)) = state.order.pop_first() else {
                    break;
                };
                state.entries.remove(&oldest);
                tracing::debug!(
                    "Response cache evicted entry for {}/{}",
                    oldest.0.provider(),
                    oldest.0.model()
                );
            }
        }

        value
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(1000)
    }
}
