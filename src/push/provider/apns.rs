use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

use crate::error::{Result, ServerError};
use crate::push::provider::provider_trait::OfflinePushProvider;
use crate::push::types::{OfflineNotification, PushTarget, PushVendor};

const APNS_PRODUCTION: &str = "https://api.push.apple.com";
const APNS_SANDBOX: &str = "https://api.sandbox.push.apple.com";

/// APNs (Apple Push Notification service) Provider
///
/// 使用 APNs HTTP/2 API
pub struct ApnsProvider {
    client: Client,
    endpoint: &'static str,
    bundle_id: String,
    team_id: String,
    key_id: String,
    private_key: EncodingKey,
}

impl ApnsProvider {
    /// 创建新的 APNs Provider
    ///
    /// # 参数
    /// - bundle_id: App Bundle ID
    /// - team_id: Apple Developer Team ID
    /// - key_id: APNs Key ID
    /// - private_key_path: 私钥文件路径（.p8 文件）
    /// - sandbox: 是否使用开发环境网关
    pub fn new(
        bundle_id: String,
        team_id: String,
        key_id: String,
        private_key_path: &str,
        sandbox: bool,
    ) -> Result<Self> {
        let private_key_content = std::fs::read_to_string(private_key_path).map_err(|e| {
            ServerError::Configuration(format!("Failed to read APNs private key: {}", e))
        })?;

        let private_key = EncodingKey::from_ec_pem(private_key_content.as_bytes()).map_err(|e| {
            ServerError::Configuration(format!("Failed to parse APNs private key: {}", e))
        })?;

        Ok(Self {
            client: Client::new(),
            endpoint: if sandbox { APNS_SANDBOX } else { APNS_PRODUCTION },
            bundle_id,
            team_id,
            key_id,
            private_key,
        })
    }

    /// 生成 APNs JWT Token（有效期 1 小时）
    fn generate_jwt_token(&self) -> Result<String> {
        let claims = json!({
            "iss": self.team_id,
            "iat": chrono::Utc::now().timestamp(),
        });

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        encode(&header, &claims, &self.private_key)
            .map_err(|e| ServerError::Provider(format!("Failed to generate APNs JWT: {}", e)))
    }

    /// 构建 APNs 消息 payload
    fn build_apns_payload(notification: &OfflineNotification) -> serde_json::Value {
        json!({
            "aps": {
                "alert": {
                    "title": notification.title,
                    "body": notification.body
                },
                "badge": 1,
                "sound": "default"
            },
            "data": {
                "conversation_id": notification.conversation_id,
                "sender_id": notification.sender_id,
                "client_msg_id": notification.client_msg_id,
            }
        })
    }
}

#[async_trait]
impl OfflinePushProvider for ApnsProvider {
    async fn push(&self, target: &PushTarget, notification: &OfflineNotification) -> Result<()> {
        let jwt_token = self.generate_jwt_token()?;
        let url = format!("{}/3/device/{}", self.endpoint, target.push_token);
        let payload = Self::build_apns_payload(notification);

        info!(
            "[APNs] Sending push: user_id={}, platform_id={}, conversation_id={}",
            target.user_id, target.platform_id, notification.conversation_id
        );

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("bearer {}", jwt_token))
            .header("apns-topic", &self.bundle_id)
            .header("apns-priority", "10")
            .header("apns-push-type", "alert")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServerError::Provider(format!("APNs request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            info!("[APNs] Push sent successfully: user_id={}", target.user_id);
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        error!(
            "[APNs] Push failed: user_id={}, status={}, error={}",
            target.user_id, status, error_text
        );

        // APNs 错误体形如 {"reason": "BadDeviceToken"}
        let reason = serde_json::from_str::<serde_json::Value>(&error_text)
            .ok()
            .and_then(|v| v.get("reason").and_then(|r| r.as_str()).map(str::to_string));
        let error_msg = match reason {
            Some(reason) => format!("APNs error: {} ({})", reason, status),
            None => format!("APNs push failed: status={}, error={}", status, error_text),
        };

        Err(ServerError::Provider(error_msg))
    }

    fn vendor(&self) -> PushVendor {
        PushVendor::Apns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apns_payload_shape() {
        let notification = OfflineNotification {
            conversation_id: "si_u1_u2".to_string(),
            sender_id: "u1".to_string(),
            client_msg_id: "c1".to_string(),
            title: "新消息".to_string(),
            body: "hello".to_string(),
        };
        let payload = ApnsProvider::build_apns_payload(&notification);
        assert_eq!(payload["aps"]["alert"]["body"], "hello");
        assert_eq!(payload["data"]["sender_id"], "u1");
    }

    #[test]
    fn test_missing_key_file_is_configuration_error() {
        let result = ApnsProvider::new(
            "com.example.app".to_string(),
            "TEAM".to_string(),
            "KEY".to_string(),
            "/nonexistent/AuthKey.p8",
            true,
        );
        assert!(matches!(result, Err(ServerError::Configuration(_))));
    }
}
