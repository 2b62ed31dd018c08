use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};

use crate::error::ServerError;
use crate::model::platform::platform_id_to_name;

/// 通过鉴权后的调用方身份
///
/// 由鉴权中间件写入请求扩展，下游 handler 通过提取器读取。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpIdentity {
    pub user_id: String,
    pub platform_id: i32,
    pub platform_name: String,
    /// 单次请求的关联 ID
    pub operation_id: String,
}

impl OpIdentity {
    pub fn new(user_id: impl Into<String>, platform_id: i32, operation_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            platform_id,
            platform_name: platform_id_to_name(platform_id).to_string(),
            operation_id: operation_id.into(),
        }
    }
}

impl<S> FromRequestParts<S> for OpIdentity
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OpIdentity>()
            .cloned()
            .ok_or_else(|| ServerError::Internal("route is not behind the token gate".to_string()))
    }
}
