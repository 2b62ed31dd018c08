//! 内部 Push RPC 的共享密钥校验
//!
//! `/push/*` 只给业务服务调用，请求头 `secret` 必须等于 `auth.issue_secret`；
//! 未配置密钥时内部 RPC 整体关闭。

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::error::{Result, ServerError};

/// 共享密钥请求头
pub const SECRET_HEADER: &str = "secret";

/// 校验调用方提供的共享密钥
pub fn check_secret(expected: Option<&str>, provided: Option<&str>) -> Result<()> {
    match (expected, provided) {
        (None, _) => Err(ServerError::NoPermission(
            "server secret is not configured".to_string(),
        )),
        (Some(expected), Some(provided)) if expected == provided => Ok(()),
        (Some(_), _) => Err(ServerError::NoPermission("invalid secret".to_string())),
    }
}

/// axum 中间件：`middleware::from_fn_with_state(issue_secret, rpc_guard)`
pub async fn rpc_guard(
    State(secret): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    match check_secret(secret.as_deref(), provided) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            warn!(
                path = %request.uri().path(),
                error = %e,
                "[RPC GUARD] rejected"
            );
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_secret() {
        assert!(check_secret(Some("s"), Some("s")).is_ok());
        assert!(matches!(
            check_secret(Some("s"), Some("x")),
            Err(ServerError::NoPermission(_))
        ));
        assert!(matches!(
            check_secret(Some("s"), None),
            Err(ServerError::NoPermission(_))
        ));
        assert!(matches!(
            check_secret(None, Some("s")),
            Err(ServerError::NoPermission(_))
        ));
    }
}
