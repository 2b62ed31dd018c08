use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Result, ServerError};
use crate::push::types::MessageEvent;

/// 在线投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineDelivery {
    /// 至少一个在线会话收到
    Delivered { sessions: usize },
    /// 明确没有可用的在线会话，需要走离线推送
    NoLiveSession,
}

/// 在线推送（会话/网关层）
///
/// `Err` 表示投递过程本身失败（网关不可达等），不等同于用户离线。
#[async_trait]
pub trait OnlinePusher: Send + Sync {
    async fn push_online(&self, user_id: &str, event: &Arc<MessageEvent>) -> Result<OnlineDelivery>;
}

/// 在线会话
#[derive(Debug, Clone)]
struct LiveSession {
    session_id: u64,
    platform_id: i32,
    sender: mpsc::Sender<Arc<MessageEvent>>,
}

/// 进程内会话注册表
///
/// 网关把每条长连接注册进来，拿到一个接收端；推送时按用户找到所有会话写入。
/// 使用 DashMap（分片锁），推送路径上不跨 await 持有分片引用。
pub struct SessionRegistry {
    /// user_id -> 在线会话列表
    sessions: DashMap<String, Vec<LiveSession>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl SessionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// 注册会话，返回 session_id 与消息接收端
    pub fn register(
        &self,
        user_id: &str,
        platform_id: i32,
    ) -> (u64, mpsc::Receiver<Arc<MessageEvent>>) {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .entry(user_id.to_string())
            .or_default()
            .push(LiveSession {
                session_id,
                platform_id,
                sender,
            });
        debug!(
            "[SESSIONS] register user_id={}, platform_id={}, session_id={}",
            user_id, platform_id, session_id
        );
        (session_id, receiver)
    }

    /// 注销会话
    pub fn unregister(&self, user_id: &str, session_id: u64) {
        if let Some(mut list) = self.sessions.get_mut(user_id) {
            list.retain(|s| s.session_id != session_id);
        }
        self.sessions.remove_if(user_id, |_, list| list.is_empty());
    }

    /// 用户当前在线会话数
    pub fn session_count(&self, user_id: &str) -> usize {
        self.sessions.get(user_id).map(|l| l.len()).unwrap_or(0)
    }
}

#[async_trait]
impl OnlinePusher for SessionRegistry {
    async fn push_online(&self, user_id: &str, event: &Arc<MessageEvent>) -> Result<OnlineDelivery> {
        // 发给发送者自己时跳过发起消息的那个平台
        let skip_platform = if user_id == event.sender_id {
            event.sender_platform_id
        } else {
            None
        };

        let mut delivered = 0;
        let mut congested = 0;
        if let Some(mut list) = self.sessions.get_mut(user_id) {
            list.retain(|session| {
                if Some(session.platform_id) == skip_platform {
                    return true;
                }
                match session.sender.try_send(Arc::clone(event)) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        congested += 1;
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
        self.sessions.remove_if(user_id, |_, list| list.is_empty());

        if delivered > 0 {
            return Ok(OnlineDelivery::Delivered { sessions: delivered });
        }
        if congested > 0 {
            warn!(
                "[SESSIONS] all {} session queue(s) full for user_id={}",
                congested, user_id
            );
            return Err(ServerError::ServiceUnavailable(format!(
                "session queues full for {}",
                user_id
            )));
        }
        Ok(OnlineDelivery::NoLiveSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::types::{PushOptions, RecipientSelector};
    use bytes::Bytes;

    fn event(sender: &str, platform: Option<i32>) -> Arc<MessageEvent> {
        Arc::new(MessageEvent {
            client_msg_id: String::new(),
            sender_id: sender.to_string(),
            sender_platform_id: platform,
            selector: RecipientSelector::Direct("u2".to_string()),
            payload: Bytes::from_static(b"x"),
            options: PushOptions { sender_sync: true },
            send_time: 0,
        })
    }

    #[tokio::test]
    async fn test_no_session_is_offline() {
        let registry = SessionRegistry::new(8);
        let result = registry.push_online("u2", &event("u1", None)).await.unwrap();
        assert_eq!(result, OnlineDelivery::NoLiveSession);
    }

    #[tokio::test]
    async fn test_delivers_to_every_session() {
        let registry = SessionRegistry::new(8);
        let (_, mut rx_a) = registry.register("u2", 1);
        let (_, mut rx_b) = registry.register("u2", 5);

        let result = registry.push_online("u2", &event("u1", None)).await.unwrap();
        assert_eq!(result, OnlineDelivery::Delivered { sessions: 2 });
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_sender_sync_skips_origin_platform() {
        let registry = SessionRegistry::new(8);
        let (_, _rx_origin) = registry.register("u1", 1);
        let result = registry.push_online("u1", &event("u1", Some(1))).await.unwrap();
        assert_eq!(result, OnlineDelivery::NoLiveSession);

        let (_, mut rx_web) = registry.register("u1", 5);
        let result = registry.push_online("u1", &event("u1", Some(1))).await.unwrap();
        assert_eq!(result, OnlineDelivery::Delivered { sessions: 1 });
        assert!(rx_web.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_sessions_are_pruned() {
        let registry = SessionRegistry::new(8);
        let (_, rx) = registry.register("u2", 2);
        drop(rx);

        let result = registry.push_online("u2", &event("u1", None)).await.unwrap();
        assert_eq!(result, OnlineDelivery::NoLiveSession);
        assert_eq!(registry.session_count("u2"), 0);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = SessionRegistry::new(8);
        let (id, _rx) = registry.register("u2", 2);
        registry.unregister("u2", id);
        assert_eq!(registry.session_count("u2"), 0);
    }
}
