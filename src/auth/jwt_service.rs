use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, ServerError};

/// 会话 token 的 JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    pub platform_id: i32,
    /// 过期时间（unix 秒）
    pub exp: i64,
    /// 签发时间（unix 秒）
    pub iat: i64,
    /// 唯一 ID，保证同一秒内签发的 token 也互不相同
    pub jti: String,
}

/// JWT 签发和验证服务
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
}

impl JwtService {
    /// 创建 JWT 服务 (HS256 对称加密)
    pub fn new(secret: &str, token_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            token_ttl,
        }
    }

    /// 为 (user, platform) 签发 token
    pub fn issue(&self, user_id: &str, platform_id: i32) -> Result<(String, TokenClaims)> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            user_id: user_id.to_string(),
            platform_id,
            exp: now + self.token_ttl.as_secs() as i64,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };
        let token = self.encode(&claims)?;
        Ok((token, claims))
    }

    pub fn encode(&self, claims: &TokenClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| ServerError::Internal(format!("JWT 签发失败: {}", e)))
    }

    /// 验证 token 并解析 claims
    ///
    /// 过期签名归为 `TokenNotExist`，其它解析失败归为 `TokenUnknown`。
    pub fn verify(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ServerError::TokenNotExist,
                _ => {
                    debug!("JWT 解析失败: {}", e);
                    ServerError::TokenUnknown
                }
            })
    }

    pub fn token_ttl(&self) -> Duration {
        self.token_ttl
    }
}
