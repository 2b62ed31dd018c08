//! 鉴权路由
//!
//! - `POST /auth/user_token`   业务系统为用户签发 token，需要 issue secret
//! - `POST /auth/parse_token`  解析 token 并返回当前状态
//! - `POST /auth/force_logout` 强制下线（需 token，只能下线自己或由管理员操作）

use axum::{extract::State, response::Json, routing::post, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::auth::{IssueTokenResponse, ParsedToken};
use crate::context::OpIdentity;
use crate::error::Result;
use crate::http::HttpServerState;
use crate::middleware::check_secret;

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/auth/user_token", post(user_token))
        .route("/auth/parse_token", post(parse_token))
}

pub fn create_gated_route() -> Router<HttpServerState> {
    Router::new().route("/auth/force_logout", post(force_logout))
}

#[derive(Debug, Deserialize)]
struct UserTokenRequest {
    secret: String,
    user_id: String,
    platform_id: i32,
}

#[derive(Debug, Deserialize)]
struct ParseTokenRequest {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ForceLogoutRequest {
    user_id: String,
    platform_id: i32,
}

/// POST /auth/user_token
///
/// ```json
/// { "secret": "...", "user_id": "u1", "platform_id": 1 }
/// ```
async fn user_token(
    State(state): State<HttpServerState>,
    Json(request): Json<UserTokenRequest>,
) -> Result<Json<IssueTokenResponse>> {
    if let Err(e) = check_secret(state.issue_secret.as_deref(), Some(&request.secret)) {
        warn!("❌ token 签发被拒绝: user_id={}, error={}", request.user_id, e);
        return Err(e);
    }

    debug!(
        "收到 token 签发请求: user_id={}, platform_id={}",
        request.user_id, request.platform_id
    );
    let response = state
        .auth_service
        .issue_token(&request.user_id, request.platform_id)
        .await?;
    Ok(Json(response))
}

/// POST /auth/parse_token
async fn parse_token(
    State(state): State<HttpServerState>,
    Json(request): Json<ParseTokenRequest>,
) -> Result<Json<ParsedToken>> {
    Ok(Json(state.auth_service.parse_token(&request.token).await?))
}

/// POST /auth/force_logout
async fn force_logout(
    State(state): State<HttpServerState>,
    identity: OpIdentity,
    Json(request): Json<ForceLogoutRequest>,
) -> Result<Json<Value>> {
    let kicked = state
        .auth_service
        .force_logout(&identity.user_id, &request.user_id, request.platform_id)
        .await?;
    Ok(Json(json!({ "kicked": kicked })))
}
