use crate::error::{Result, ServerError};
use crate::push::provider::provider_trait::OfflinePushProvider;
use crate::push::types::{OfflineNotification, PushTarget, PushVendor};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info};

const FCM_ENDPOINT: &str = "https://fcm.googleapis.com";

/// FCM (Firebase Cloud Messaging) Provider
///
/// 使用 FCM HTTP v1 API
pub struct FcmProvider {
    client: Client,
    endpoint: String,
    project_id: String,
    access_token: String, // OAuth 2.0 access token
}

impl FcmProvider {
    /// 创建新的 FCM Provider
    ///
    /// # 参数
    /// - project_id: Firebase 项目 ID
    /// - access_token: OAuth 2.0 access token（从 service account 获取）
    pub fn new(project_id: String, access_token: String) -> Self {
        Self::with_endpoint(FCM_ENDPOINT.to_string(), project_id, access_token)
    }

    pub fn with_endpoint(endpoint: String, project_id: String, access_token: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            project_id,
            access_token,
        }
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.endpoint.trim_end_matches('/'),
            self.project_id
        )
    }

    /// 构建 FCM 消息 payload
    fn build_fcm_payload(
        &self,
        target: &PushTarget,
        notification: &OfflineNotification,
    ) -> serde_json::Value {
        json!({
            "message": {
                "token": target.push_token,
                "notification": {
                    "title": notification.title,
                    "body": notification.body
                },
                "data": {
                    "conversation_id": notification.conversation_id,
                    "sender_id": notification.sender_id,
                    "client_msg_id": notification.client_msg_id,
                },
                "android": {
                    "priority": "high"
                }
            }
        })
    }
}

#[async_trait]
impl OfflinePushProvider for FcmProvider {
    async fn push(&self, target: &PushTarget, notification: &OfflineNotification) -> Result<()> {
        let payload = self.build_fcm_payload(target, notification);

        info!(
            "[FCM] Sending push: user_id={}, platform_id={}, conversation_id={}",
            target.user_id, target.platform_id, notification.conversation_id
        );

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServerError::Provider(format!("FCM request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            info!("[FCM] Push sent successfully: user_id={}", target.user_id);
            Ok(())
        } else {
            let error_text = response.text().await.unwrap_or_default();
            error!(
                "[FCM] Push failed: user_id={}, status={}, error={}",
                target.user_id, status, error_text
            );
            Err(ServerError::Provider(format!(
                "FCM push failed: status={}, error={}",
                status, error_text
            )))
        }
    }

    fn vendor(&self) -> PushVendor {
        PushVendor::Fcm
    }
}
