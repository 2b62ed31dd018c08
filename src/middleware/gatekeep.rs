//! Token 鉴权中间件
//!
//! 每次受保护调用：
//! 1. 读取 `token` 请求头，缺失直接拒绝（不查存储）
//! 2. 解析 claims（user_id, platform_id）
//! 3. 查询 token 状态：Absent / Kicked 拒绝，Normal 放行
//! 4. 把 [`OpIdentity`] 写入请求扩展

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::{JwtService, TokenStateStore};
use crate::context::OpIdentity;
use crate::error::{Result, ServerError};

/// 凭证请求头
pub const TOKEN_HEADER: &str = "token";
/// 请求关联 ID 请求头
pub const OPERATION_ID_HEADER: &str = "operationID";

/// 鉴权器
pub struct Gatekeeper {
    jwt_service: Arc<JwtService>,
    store: Arc<dyn TokenStateStore>,
}

impl Gatekeeper {
    pub fn new(jwt_service: Arc<JwtService>, store: Arc<dyn TokenStateStore>) -> Self {
        Self { jwt_service, store }
    }

    /// 校验凭证，返回 (user_id, platform_id)
    pub async fn verify(&self, token: Option<&str>) -> Result<(String, i32)> {
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => {
                return Err(ServerError::InvalidArgument(
                    "header must have token".to_string(),
                ))
            }
        };

        let claims = self.jwt_service.verify(token)?;
        let state = self
            .store
            .lookup(&claims.user_id, claims.platform_id, token)
            .await?;
        state.check()?;

        Ok((claims.user_id, claims.platform_id))
    }
}

/// axum 中间件：`middleware::from_fn_with_state(gatekeeper, gatekeep)`
pub async fn gatekeep(
    State(gatekeeper): State<Arc<Gatekeeper>>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let operation_id = request
        .headers()
        .get(OPERATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let token = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match gatekeeper.verify(token.as_deref()).await {
        Ok((user_id, platform_id)) => {
            let identity = OpIdentity::new(user_id, platform_id, operation_id);
            debug!(
                path = %path,
                user_id = %identity.user_id,
                platform = %identity.platform_name,
                operation_id = %identity.operation_id,
                "[GATEKEEP] accepted"
            );
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            warn!(
                path = %path,
                operation_id = %operation_id,
                error = %e,
                "[GATEKEEP] rejected"
            );
            e.into_response()
        }
    }
}
