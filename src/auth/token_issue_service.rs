use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::jwt_service::JwtService;
use crate::auth::token_state::TokenState;
use crate::auth::token_store::TokenStateStore;
use crate::config::AuthConfig;
use crate::error::{Result, ServerError};
use crate::model::platform::{platform_id_to_name, Platform};

/// Token 签发响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    pub token: String,
    /// 剩余有效期（秒）
    pub expire_time_seconds: i64,
}

/// Token 解析结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedToken {
    pub user_id: String,
    pub platform_id: i32,
    pub platform_name: String,
    pub expire_time_seconds: i64,
    pub state: TokenState,
}

/// 认证服务：签发、强制下线、解析
pub struct AuthService {
    jwt_service: Arc<JwtService>,
    store: Arc<dyn TokenStateStore>,
    admin_user_ids: HashSet<String>,
}

impl AuthService {
    pub fn new(
        jwt_service: Arc<JwtService>,
        store: Arc<dyn TokenStateStore>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            jwt_service,
            store,
            admin_user_ids: config.admin_user_ids.iter().cloned().collect(),
        }
    }

    /// 签发 token；同一 (user, platform) 之前的 token 被踢下线
    pub async fn issue_token(&self, user_id: &str, platform_id: i32) -> Result<IssueTokenResponse> {
        if user_id.is_empty() {
            return Err(ServerError::InvalidArgument("user_id is empty".to_string()));
        }
        if Platform::from_id(platform_id).is_none() {
            return Err(ServerError::InvalidArgument(format!(
                "unknown platform_id {}",
                platform_id
            )));
        }

        let (token, claims) = self.jwt_service.issue(user_id, platform_id)?;
        let kicked = self
            .store
            .issue(user_id, platform_id, &token, claims.exp)
            .await?;

        info!(
            "✅ Token 签发成功: user_id={}, platform={}, kicked_previous={}",
            user_id,
            platform_id_to_name(platform_id),
            kicked
        );

        Ok(IssueTokenResponse {
            token,
            expire_time_seconds: claims.exp - claims.iat,
        })
    }

    /// 强制下线 (user, platform) 的所有 token
    ///
    /// 只能下线自己，管理员可以下线任何人。
    pub async fn force_logout(
        &self,
        op_user_id: &str,
        user_id: &str,
        platform_id: i32,
    ) -> Result<usize> {
        if op_user_id != user_id && !self.admin_user_ids.contains(op_user_id) {
            warn!(
                "❌ 无权强制下线: op_user_id={}, target={}",
                op_user_id, user_id
            );
            return Err(ServerError::NoPermission(format!(
                "{} cannot force logout {}",
                op_user_id, user_id
            )));
        }

        let kicked = self.store.kick_platform(user_id, platform_id).await?;
        info!(
            "强制下线: op_user_id={}, user_id={}, platform={}, kicked={}",
            op_user_id,
            user_id,
            platform_id_to_name(platform_id),
            kicked
        );
        Ok(kicked)
    }

    /// 解析 token 并返回其当前状态（不做拒绝判定）
    pub async fn parse_token(&self, token: &str) -> Result<ParsedToken> {
        let claims = self.jwt_service.verify(token)?;
        let state = self
            .store
            .lookup(&claims.user_id, claims.platform_id, token)
            .await?;

        Ok(ParsedToken {
            platform_name: platform_id_to_name(claims.platform_id).to_string(),
            expire_time_seconds: (claims.exp - Utc::now().timestamp()).max(0),
            user_id: claims.user_id,
            platform_id: claims.platform_id,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_store::MemoryTokenStore;
    use std::time::Duration;

    fn service(admins: &[&str]) -> AuthService {
        let config = AuthConfig {
            admin_user_ids: admins.iter().map(|s| s.to_string()).collect(),
            ..AuthConfig::default()
        };
        AuthService::new(
            Arc::new(JwtService::new("secret", Duration::from_secs(3600))),
            Arc::new(MemoryTokenStore::new(Duration::from_secs(3600))),
            &config,
        )
    }

    #[tokio::test]
    async fn test_reissue_kicks_previous_token() {
        let auth = service(&[]);
        let first = auth.issue_token("u1", 2).await.unwrap();
        let second = auth.issue_token("u1", 2).await.unwrap();

        assert_eq!(auth.parse_token(&first.token).await.unwrap().state, TokenState::Kicked);
        assert_eq!(auth.parse_token(&second.token).await.unwrap().state, TokenState::Normal);
        assert_eq!(second.expire_time_seconds, 3600);
    }

    #[tokio::test]
    async fn test_issue_rejects_unknown_platform() {
        let auth = service(&[]);
        assert!(matches!(
            auth.issue_token("u1", 42).await,
            Err(ServerError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_force_logout_permissions() {
        let auth = service(&["admin"]);
        let issued = auth.issue_token("u1", 1).await.unwrap();

        assert!(matches!(
            auth.force_logout("u2", "u1", 1).await,
            Err(ServerError::NoPermission(_))
        ));
        assert_eq!(auth.force_logout("admin", "u1", 1).await.unwrap(), 1);
        assert_eq!(auth.parse_token(&issued.token).await.unwrap().state, TokenState::Kicked);
        assert_eq!(auth.force_logout("u1", "u1", 1).await.unwrap(), 0);
    }
}
