use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::{AuthService, JwtService, MemoryTokenStore, TokenStateStore};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::{HttpServerState, PushHttpServer};
use crate::infra::{
    HttpMembershipSource, MembershipCache, MemoryStream, RedisClient, RedisRegistrationStore,
    RedisTokenStore,
};
use crate::middleware::Gatekeeper;
use crate::push::provider::{ApnsProvider, FcmProvider, MockProvider};
use crate::push::{
    Consumer, MemoryRegistrationStore, OfflinePushers, PushRpcService, PushVendor, Pusher,
    RegistrationStore, SessionRegistry,
};

/// 过期 token 清理周期
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// 推送服务
///
/// 负责组装所有组件：token 存储、推送注册、在线会话、群成员缓存、事件流、
/// consumer worker 和 HTTP 服务器。
pub struct PushServer {
    config: ServerConfig,
    stream: Arc<MemoryStream>,
    consumer: Arc<Consumer>,
    token_store: Arc<dyn TokenStateStore>,
    sessions: Arc<SessionRegistry>,
    membership: Arc<MembershipCache>,
    http: PushHttpServer,
    invalidation_listener: JoinHandle<()>,
}

impl PushServer {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let (token_store, registrations) = build_stores(&config).await?;

        let offline = build_offline_pushers(&config)?;
        if offline.is_empty() {
            warn!("⚠️ 未配置任何离线推送厂商，离线接收方将记为 NoOfflineProvider");
        } else {
            info!("📲 离线推送厂商: {:?}", offline.vendors());
        }

        let sessions = Arc::new(SessionRegistry::new(config.push.session_queue_capacity));
        let membership = Arc::new(MembershipCache::new(
            Arc::new(HttpMembershipSource::new(config.membership.rpc_url.clone())),
            &config.membership,
        ));
        let (invalidation, invalidation_listener) = membership.invalidation_sender();

        let pusher = Arc::new(Pusher::new(
            sessions.clone(),
            offline,
            registrations.clone(),
            membership.clone(),
            &config.push,
        ));

        let stream = Arc::new(MemoryStream::new(
            config.consumer.queue_capacity,
            config.consumer.redelivery_delay(),
        ));
        let consumer = Arc::new(Consumer::new(
            stream.clone(),
            pusher.clone(),
            &config.consumer,
        ));

        let jwt_service = Arc::new(JwtService::new(
            &config.auth.jwt_secret,
            config.auth.token_ttl(),
        ));
        let auth_service = Arc::new(AuthService::new(
            jwt_service.clone(),
            token_store.clone(),
            &config.auth,
        ));
        let gatekeeper = Arc::new(Gatekeeper::new(jwt_service, token_store.clone()));
        let push_service = Arc::new(PushRpcService::new(pusher, registrations, invalidation));

        let http = PushHttpServer::new(
            HttpServerState {
                auth_service,
                push_service,
                publisher: stream.clone(),
                gatekeeper,
                issue_secret: config.auth.issue_secret.clone(),
            },
            config.server.bind_address(),
        );

        Ok(Self {
            config,
            stream,
            consumer,
            token_store,
            sessions,
            membership,
            http,
            invalidation_listener,
        })
    }

    /// 在线会话注册表（供接入层挂接长连接）
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        self.sessions.clone()
    }

    pub fn membership(&self) -> Arc<MembershipCache> {
        self.membership.clone()
    }

    /// 运行直到收到 Ctrl+C
    pub async fn run(self) -> Result<()> {
        info!(
            "🚀 启动推送服务: http={}, workers={}",
            self.config.server.bind_address(),
            self.config.consumer.workers
        );

        let workers = self.consumer.clone().start();
        let purge_task = spawn_purge_task(self.token_store.clone());

        let stream = self.stream.clone();
        let shutdown = async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("❌ 监听 Ctrl+C 失败: {}", e);
            }
            info!("🛑 收到停止信号，关闭事件流");
            stream.close();
        };

        let result = self.http.start(shutdown).await;

        // HTTP 异常退出时事件流可能仍开着
        self.stream.close();
        purge_task.abort();
        self.invalidation_listener.abort();

        for worker in workers {
            if let Err(e) = worker.await {
                error!("❌ consumer worker 异常退出: {}", e);
            }
        }
        if self.stream.in_flight() > 0 {
            warn!(
                "⚠️ 退出时仍有 {} 条未确认事件",
                self.stream.in_flight()
            );
        }

        info!("✅ 推送服务已停止");
        result
    }
}

async fn build_stores(
    config: &ServerConfig,
) -> Result<(Arc<dyn TokenStateStore>, Arc<dyn RegistrationStore>)> {
    // 被踢 token 的墓碑保留一个 token 有效期，超过后 JWT 本身已过期
    let tombstone_ttl = config.auth.token_ttl();

    match &config.redis {
        Some(redis_config) => {
            let client = Arc::new(RedisClient::new(redis_config).await?);
            info!("🗄️ token / 推送注册使用 Redis 存储");
            Ok((
                Arc::new(RedisTokenStore::new(client.clone(), tombstone_ttl)),
                Arc::new(RedisRegistrationStore::new(client)),
            ))
        }
        None => {
            info!("🗄️ token / 推送注册使用内存存储");
            Ok((
                Arc::new(MemoryTokenStore::new(tombstone_ttl)),
                Arc::new(MemoryRegistrationStore::new()),
            ))
        }
    }
}

fn build_offline_pushers(config: &ServerConfig) -> Result<OfflinePushers> {
    let mut pushers = OfflinePushers::new();

    if let Some(fcm) = &config.push.fcm {
        let provider = match &fcm.endpoint {
            Some(endpoint) => FcmProvider::with_endpoint(
                endpoint.clone(),
                fcm.project_id.clone(),
                fcm.access_token.clone(),
            ),
            None => FcmProvider::new(fcm.project_id.clone(), fcm.access_token.clone()),
        };
        pushers.register(Arc::new(provider));
    }

    if let Some(apns) = &config.push.apns {
        let provider = ApnsProvider::new(
            apns.bundle_id.clone(),
            apns.team_id.clone(),
            apns.key_id.clone(),
            &apns.private_key_path,
            apns.sandbox,
        )?;
        pushers.register(Arc::new(provider));
    }

    if config.push.mock_offline {
        for vendor in [PushVendor::Fcm, PushVendor::Apns] {
            if !pushers.vendors().contains(&vendor) {
                pushers.register(Arc::new(MockProvider::new(vendor)));
            }
        }
    }

    Ok(pushers)
}

fn spawn_purge_task(store: Arc<dyn TokenStateStore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!("🧹 清理过期 token: {}", purged),
                Err(e) => warn!("⚠️ 清理过期 token 失败: {}", e),
            }
        }
    })
}
