use async_trait::async_trait;
use moka::future::Cache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MembershipConfig;
use crate::error::{Result, ServerError};

/// 群成员数据源（会话/群组服务的 RPC 边界）
#[async_trait]
pub trait GroupMemberSource: Send + Sync {
    async fn get_group_member_ids(&self, group_id: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Serialize)]
struct MemberIdsRequest<'a> {
    group_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct MemberIdsResponse {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
    #[serde(default)]
    user_ids: Vec<String>,
}

/// 通过 HTTP 调用群组服务获取成员
pub struct HttpMembershipSource {
    client: Client,
    base_url: String,
}

impl HttpMembershipSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/group/get_group_member_user_ids",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl GroupMemberSource for HttpMembershipSource {
    async fn get_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .post(self.url())
            .json(&MemberIdsRequest { group_id })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServerError::Network(format!(
                "membership rpc returned {} for group {}",
                status, group_id
            )));
        }

        let body: MemberIdsResponse = response.json().await?;
        if body.code != 0 {
            return Err(ServerError::Network(format!(
                "membership rpc error code={} message={}",
                body.code, body.message
            )));
        }
        Ok(body.user_ids)
    }
}

/// 群成员缓存（读穿透）
///
/// - 命中直接返回共享快照 `Arc<Vec<String>>`，读者不会修改
/// - 未命中调用 [`GroupMemberSource`]，同一个群的并发未命中只会触发一次加载
/// - 条目 TTL 即允许的最大陈旧时间，成员变更时通过失效通道主动剔除
pub struct MembershipCache {
    cache: Cache<String, Arc<Vec<String>>>,
    source: Arc<dyn GroupMemberSource>,
    rpc_timeout: Duration,
}

impl MembershipCache {
    pub fn new(source: Arc<dyn GroupMemberSource>, config: &MembershipConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_secs(config.max_staleness_secs))
            .build();

        Self {
            cache,
            source,
            rpc_timeout: Duration::from_millis(config.rpc_timeout_ms),
        }
    }

    /// 获取群成员快照
    pub async fn get_members(&self, group_id: &str) -> Result<Arc<Vec<String>>> {
        let source = Arc::clone(&self.source);
        let rpc_timeout = self.rpc_timeout;
        let gid = group_id.to_string();

        self.cache
            .try_get_with(group_id.to_string(), async move {
                debug!("[MEMBERSHIP] cache miss, loading group_id={}", gid);
                let members = tokio::time::timeout(rpc_timeout, source.get_group_member_ids(&gid))
                    .await
                    .map_err(|_| {
                        ServerError::Timeout(format!("membership lookup for group {}", gid))
                    })??;
                Ok::<_, ServerError>(Arc::new(members))
            })
            .await
            .map_err(|e: Arc<ServerError>| (*e).clone())
    }

    /// 剔除一个群的缓存条目
    ///
    /// 与正在进行的 miss 加载并发时，加载结果仍会在剔除之后写入，
    /// 该条目最多保持 `max_staleness_secs` 的旧数据。
    pub async fn invalidate(&self, group_id: &str) {
        self.cache.invalidate(group_id).await;
        debug!("[MEMBERSHIP] invalidated group_id={}", group_id);
    }

    pub async fn contains(&self, group_id: &str) -> bool {
        self.cache.get(group_id).await.is_some()
    }

    /// 创建失效通道并启动监听任务
    ///
    /// 发送端交给成员变更通知的来源，接收端在后台逐条剔除。
    pub fn invalidation_sender(self: &Arc<Self>) -> (mpsc::Sender<String>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(1024);
        let cache = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("[MEMBERSHIP] invalidation listener started");
            while let Some(group_id) = rx.recv().await {
                cache.invalidate(&group_id).await;
            }
            warn!("[MEMBERSHIP] invalidation channel closed");
        });
        (tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        groups: Mutex<HashMap<String, Vec<String>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Self {
            let mut groups = HashMap::new();
            groups.insert(
                "g7".to_string(),
                vec!["u1".to_string(), "u2".to_string(), "u3".to_string()],
            );
            Self {
                groups: Mutex::new(groups),
                calls: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl GroupMemberSource for CountingSource {
        async fn get_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.groups
                .lock()
                .get(group_id)
                .cloned()
                .ok_or_else(|| ServerError::NotFound(format!("group {}", group_id)))
        }
    }

    fn config(timeout_ms: u64) -> MembershipConfig {
        MembershipConfig {
            rpc_timeout_ms: timeout_ms,
            ..MembershipConfig::default()
        }
    }

    #[tokio::test]
    async fn test_read_through_and_invalidate() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let cache = MembershipCache::new(source.clone(), &config(1000));

        let members = cache.get_members("g7").await.unwrap();
        assert_eq!(members.len(), 3);
        cache.get_members("g7").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        source
            .groups
            .lock()
            .insert("g7".to_string(), vec!["u1".to_string()]);
        // 失效前仍返回旧快照
        assert_eq!(cache.get_members("g7").await.unwrap().len(), 3);

        cache.invalidate("g7").await;
        assert_eq!(cache.get_members("g7").await.unwrap().len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let source = Arc::new(CountingSource::new(Duration::from_millis(50)));
        let cache = Arc::new(MembershipCache::new(source.clone(), &config(1000)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_members("g7").await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().len(), 3);
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_errors_are_not_cached() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let cache = MembershipCache::new(source.clone(), &config(1000));

        assert!(matches!(
            cache.get_members("missing").await,
            Err(ServerError::NotFound(_))
        ));
        assert!(!cache.contains("missing").await);
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let source = Arc::new(CountingSource::new(Duration::from_millis(200)));
        let cache = MembershipCache::new(source, &config(20));

        assert!(matches!(
            cache.get_members("g7").await,
            Err(ServerError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidation_channel() {
        let source = Arc::new(CountingSource::new(Duration::ZERO));
        let cache = Arc::new(MembershipCache::new(source, &config(1000)));
        cache.get_members("g7").await.unwrap();

        let (tx, _handle) = cache.invalidation_sender();
        tx.send("g7".to_string()).await.unwrap();

        for _ in 0..50 {
            if !cache.contains("g7").await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("group was not invalidated");
    }
}
