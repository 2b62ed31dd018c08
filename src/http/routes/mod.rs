//! HTTP 路由模块
//!
//! 路由结构：
//! - `/auth/*`  - token 签发、强制下线、解析
//! - `/third/*` - 设备推送 token 注册（需 token）
//! - `/msg/*`   - 消息提交（需 token）
//! - `/push/*`  - 内部 Push RPC（需共享密钥）
//! - `/health`  - 健康检查

pub mod auth;
pub mod health;
pub mod msg;
pub mod push;
pub mod third;

use axum::{middleware, Router};

use crate::http::HttpServerState;
use crate::middleware::{gatekeep, rpc_guard};

/// 创建所有路由
///
/// 需要身份的路由挂在 gatekeep 之后，handler 通过 `OpIdentity` 取调用者；
/// 内部 RPC 挂在 rpc_guard 之后。
pub fn create_routes(state: &HttpServerState) -> Router<HttpServerState> {
    let internal = push::create_route().route_layer(middleware::from_fn_with_state(
        state.issue_secret.clone(),
        rpc_guard,
    ));

    let gated = Router::new()
        .merge(auth::create_gated_route())
        .merge(third::create_route())
        .merge(msg::create_route())
        .route_layer(middleware::from_fn_with_state(
            state.gatekeeper.clone(),
            gatekeep,
        ));

    Router::new()
        .merge(health::create_route())
        .merge(auth::create_route())
        .merge(internal)
        .merge(gated)
}
