//! HTTP 服务器 - 使用 Axum 提供推送与鉴权服务

use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthService;
use crate::error::Result;
use crate::http::routes;
use crate::infra::event_stream::EventPublisher;
use crate::middleware::Gatekeeper;
use crate::push::PushRpcService;

/// HTTP 服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub auth_service: Arc<AuthService>,
    pub push_service: Arc<PushRpcService>,
    /// 入站事件流的写端
    pub publisher: Arc<dyn EventPublisher>,
    pub gatekeeper: Arc<Gatekeeper>,
    /// `/auth/user_token` 的调用密钥，未配置时拒绝签发
    pub issue_secret: Option<String>,
}

/// HTTP 推送服务器
pub struct PushHttpServer {
    state: HttpServerState,
    bind_address: String,
}

impl PushHttpServer {
    pub fn new(state: HttpServerState, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    /// 构建完整路由（测试直接使用）
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// 启动 HTTP 服务器，`shutdown` 完成后优雅退出
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!("🌐 HTTP 服务器启动在 {}", self.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("🛑 HTTP 服务器已停止");
        Ok(())
    }
}

pub fn build_router(state: HttpServerState) -> Router {
    Router::new()
        .merge(routes::create_routes(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
