//! 使用统计：消息总数、活跃用户集合、每个用户的最近活跃时间
//!
//! 每条入站消息更新一次；报表与广播（收件人集合）读取。

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Local};
use parking_lot::RwLock;

use crate::memory::UserId;

/// 统计快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total_messages: u64,
    pub active_users: usize,
    /// 所有用户中最近一次活跃时间
    pub last_active_at: Option<DateTime<Local>>,
}

#[derive(Default)]
struct Activity {
    users: BTreeSet<UserId>,
    last_active: HashMap<UserId, DateTime<Local>>,
}

#[derive(Default)]
pub struct StatsRecorder {
    total_messages: AtomicU64,
    activity: RwLock<Activity>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, user_id: UserId) {
        self.record_at(user_id, Local::now());
    }

    pub fn record_at(&self, user_id: UserId, at: DateTime<Local>) {
        self.total_messages.fetch_add(1, Ordering::Relaxed);
        let mut activity = self.activity.write();
        activity.users.insert(user_id);
        activity.last_active.insert(user_id, at);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let activity = self.activity.read();
        StatsSnapshot {
            total_messages: self.total_messages.load(Ordering::Relaxed),
            active_users: activity.users.len(),
            last_active_at: activity.last_active.values().max().copied(),
        }
    }

    /// 广播收件人：所有出现过的用户（升序）
    pub fn recipients(&self) -> Vec<UserId> {
        self.activity.read().users.iter().copied().collect()
    }

    pub fn last_active(&self, user_id: UserId) -> Option<DateTime<Local>> {
        self.activity.read().last_active.get(&user_id).copied()
    }
}
