//! 内部 Push RPC 路由（请求头 `secret` 校验见 `middleware::rpc_guard`）
//!
//! - `POST /push/push_msg`            同步推送一条消息，返回每个接收方的结果
//! - `POST /push/del_user_push_token` 删除 (user, platform) 的推送注册
//! - `POST /push/invalidate_group`    群成员变更后剔除成员缓存

use axum::{extract::State, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::http::HttpServerState;
use crate::push::{MessageEvent, PushReport};

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/push/push_msg", post(push_msg))
        .route("/push/del_user_push_token", post(del_user_push_token))
        .route("/push/invalidate_group", post(invalidate_group))
}

#[derive(Debug, Deserialize)]
struct DelUserPushTokenRequest {
    user_id: String,
    platform_id: i32,
}

#[derive(Debug, Deserialize)]
struct InvalidateGroupRequest {
    group_id: String,
}

async fn push_msg(
    State(state): State<HttpServerState>,
    Json(event): Json<MessageEvent>,
) -> Result<Json<PushReport>> {
    Ok(Json(state.push_service.push_message(event).await?))
}

async fn del_user_push_token(
    State(state): State<HttpServerState>,
    Json(request): Json<DelUserPushTokenRequest>,
) -> Result<Json<Value>> {
    state
        .push_service
        .delete_user_push_registration(&request.user_id, request.platform_id)
        .await?;
    Ok(Json(json!({})))
}

async fn invalidate_group(
    State(state): State<HttpServerState>,
    Json(request): Json<InvalidateGroupRequest>,
) -> Result<Json<Value>> {
    state.push_service.invalidate_group(&request.group_id).await?;
    Ok(Json(json!({})))
}
