use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 服务器错误类型
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ServerError {
    /// 参数错误（缺少 token、事件格式错误等），不重试
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// 无权限
    #[error("No permission: {0}")]
    NoPermission(String),
    /// Token 无法识别（格式错误、签名错误）
    #[error("Token unknown")]
    TokenUnknown,
    /// Token 不存在（未签发、已过期、已清理）
    #[error("Token does not exist")]
    TokenNotExist,
    /// Token 已被踢下线
    #[error("Token has been kicked")]
    TokenKicked,
    /// 当前部署/平台未配置离线推送
    #[error("No offline pusher available: {0}")]
    NoOfflinePusher(String),
    /// 推送厂商返回失败
    #[error("Push provider error: {0}")]
    Provider(String),
    /// 网络错误
    #[error("Network error: {0}")]
    Network(String),
    /// 缓存 / 存储错误
    #[error("Cache error: {0}")]
    Cache(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// 配置错误
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),
    /// 服务不可用
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    /// 资源未找到
    #[error("Not found: {0}")]
    NotFound(String),
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::TokenUnknown | ServerError::TokenNotExist | ServerError::TokenKicked => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::NoPermission(_) => StatusCode::FORBIDDEN,
            ServerError::InvalidArgument(_) | ServerError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Network(_)
            | ServerError::Cache(_)
            | ServerError::Timeout(_)
            | ServerError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::new(&self);
        (status_code, Json(error_response)).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ServerError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ServerError::Timeout(err.to_string())
    }
}

impl From<redis::RedisError> for ServerError {
    fn from(err: redis::RedisError) -> Self {
        ServerError::Cache(err.to_string())
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServerError::Timeout(err.to_string())
        } else {
            ServerError::Network(err.to_string())
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码
///
/// 1xxx 为通用错误，15xx 为 token 状态错误，客户端据此区分
/// "重新登录" 与 "会话被强制结束"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u32")]
pub enum ErrorCode {
    /// 成功
    Success = 0,
    /// 内部错误
    Internal = 500,
    /// 参数错误
    InvalidArgument = 1001,
    /// 无权限
    NoPermission = 1002,
    /// 资源未找到
    NotFound = 1004,
    /// Token 无法识别
    TokenUnknown = 1505,
    /// Token 被踢
    TokenKicked = 1506,
    /// Token 不存在
    TokenNotExist = 1507,
    /// 无离线推送
    NoOfflinePusher = 1601,
    /// 推送厂商错误
    Provider = 1602,
    /// 网络错误
    Network = 2001,
    /// 序列化错误
    Serialization = 2002,
    /// 配置错误
    Configuration = 2003,
    /// 缓存错误
    Cache = 2004,
    /// 超时错误
    Timeout = 3002,
    /// 服务不可用
    ServiceUnavailable = 5000,
}

impl From<ErrorCode> for u32 {
    fn from(code: ErrorCode) -> Self {
        code as u32
    }
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ServerError::NoPermission(_) => ErrorCode::NoPermission,
            ServerError::TokenUnknown => ErrorCode::TokenUnknown,
            ServerError::TokenNotExist => ErrorCode::TokenNotExist,
            ServerError::TokenKicked => ErrorCode::TokenKicked,
            ServerError::NoOfflinePusher(_) => ErrorCode::NoOfflinePusher,
            ServerError::Provider(_) => ErrorCode::Provider,
            ServerError::Network(_) => ErrorCode::Network,
            ServerError::Cache(_) => ErrorCode::Cache,
            ServerError::Serialization(_) => ErrorCode::Serialization,
            ServerError::Configuration(_) => ErrorCode::Configuration,
            ServerError::Timeout(_) => ErrorCode::Timeout,
            ServerError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 详细信息
    pub details: Option<String>,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    pub fn new(error: &ServerError) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            details: None,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    /// 创建带详细信息的错误响应
    pub fn with_details(error: &ServerError, details: String) -> Self {
        Self {
            code: ErrorCode::from(error),
            message: error.to_string(),
            details: Some(details),
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}
