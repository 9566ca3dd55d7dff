//! 按用户分道的入站分发
//!
//! 每个用户一条串行通道（unbounded mpsc + 一个工作任务），同一用户的事件严格按接收顺序处理，
//! 不同用户的通道并发执行。通道在空闲超过 idle 后自行回收，下次事件到来时重新创建。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::memory::UserId;

/// 空闲通道的默认回收时间
pub const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(60);

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;
type LaneMap<T> = Arc<Mutex<HashMap<UserId, mpsc::UnboundedSender<T>>>>;

pub struct UserLanes<T: Send + 'static> {
    handler: Handler<T>,
    lanes: LaneMap<T>,
    idle: Duration,
}

impl<T: Send + 'static> UserLanes<T> {
    pub fn new<F, Fut>(idle: Duration, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |item: T| -> BoxFuture<'static, ()> {
                Box::pin(handler(item))
            }),
            lanes: Arc::new(Mutex::new(HashMap::new())),
            idle,
        }
    }

    /// 投递到该用户的通道；通道不存在（或已回收）时新建
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn dispatch(&self, user_id: UserId, item: T) {
        let mut lanes = self.lanes.lock();

        let item = match lanes.get(&user_id) {
            Some(tx) => match tx.send(item) {
                Ok(()) => return,
                Err(mpsc::error::SendError(item)) => item,
            },
            None => item,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(item).is_err() {
            return;
        }
        lanes.insert(user_id, tx);
        drop(lanes);

        tracing::debug!("Lane opened for user {}", user_id);
        tokio::spawn(run_lane(
            user_id,
            rx,
            Arc::clone(&self.handler),
            Arc::clone(&self.lanes),
            self.idle,
        ));
    }

    /// 当前存活的通道数
    pub fn active(&self) -> usize {
        self.lanes.lock().len()
    }
}

async fn run_lane<T: Send + 'static>(
    user_id: UserId,
    mut rx: mpsc::UnboundedReceiver<T>,
    handler: Handler<T>,
    lanes: LaneMap<T>,
    idle: Duration,
) {
    loop {
        let item = match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => return,
            Err(_) => {
                // 发送方只在持有表锁时写入；锁内确认为空再移除
                let next = {
                    let mut map = lanes.lock();
                    match rx.try_recv() {
                        Ok(item) => Some(item),
                        Err(_) => {
                            map.remove(&user_id);
                            None
                        }
                    }
                };
                match next {
                    Some(item) => item,
                    None => {
                        tracing::debug!("Lane for user {} closed after idle", user_id);
                        return;
                    }
                }
            }
        };
        handler(item).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_user_keeps_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let lanes = {
            let seen = Arc::clone(&seen);
            UserLanes::new(DEFAULT_LANE_IDLE, move |(user, n): (UserId, u32)| {
                let seen = Arc::clone(&seen);
                async move {
                    // 先到的事件耗时更长
                    tokio::time::sleep(Duration::from_millis(u64::from(10 - n))).await;
                    seen.lock().push((user, n));
                }
            })
        };

        for n in 0..10 {
            lanes.dispatch(1, (1, n));
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().len() < 10 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let order: Vec<u32> = seen.lock().iter().map(|(_, n)| *n).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_users_do_not_block_each_other() {
        let gate = Arc::new(Notify::new());
        let done = Arc::new(Mutex::new(Vec::new()));
        let lanes = {
            let gate = Arc::clone(&gate);
            let done = Arc::clone(&done);
            UserLanes::new(DEFAULT_LANE_IDLE, move |user: UserId| {
                let gate = Arc::clone(&gate);
                let done = Arc::clone(&done);
                async move {
                    if user == 1 {
                        gate.notified().await;
                    }
                    done.lock().push(user);
                }
            })
        };

        lanes.dispatch(1, 1);
        lanes.dispatch(2, 2);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done.lock().contains(&2) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(!done.lock().contains(&1));

        gate.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done.lock().contains(&1) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_idle_lane_is_reclaimed_and_reopened() {
        let count = Arc::new(Mutex::new(0u32));
        let lanes = {
            let count = Arc::clone(&count);
            UserLanes::new(Duration::from_millis(20), move |_: ()| {
                let count = Arc::clone(&count);
                async move {
                    *count.lock() += 1;
                }
            })
        };

        lanes.dispatch(7, ());
        assert_eq!(lanes.active(), 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(lanes.active(), 0);

        lanes.dispatch(7, ());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*count.lock(), 2);
    }
}
