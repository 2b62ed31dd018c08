use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::{Result, ServerError};
use crate::model::platform::Platform;
use crate::push::pusher::Pusher;
use crate::push::registration::{DeviceRegistration, RegistrationStore};
use crate::push::types::{DeliveryOutcome, MessageEvent, PushReport};

/// Push RPC 服务（同步请求/响应）
pub struct PushRpcService {
    pusher: Arc<Pusher>,
    registrations: Arc<dyn RegistrationStore>,
    invalidation: mpsc::Sender<String>,
}

impl PushRpcService {
    pub fn new(
        pusher: Arc<Pusher>,
        registrations: Arc<dyn RegistrationStore>,
        invalidation: mpsc::Sender<String>,
    ) -> Self {
        Self {
            pusher,
            registrations,
            invalidation,
        }
    }

    /// 推送一条消息
    ///
    /// 没有离线通道的接收方只记录日志；任一接收方失败则整个调用失败。
    pub async fn push_message(&self, event: MessageEvent) -> Result<PushReport> {
        let report = self.pusher.push(Arc::new(event)).await?;

        let skipped = report.count(|o| *o == DeliveryOutcome::NoOfflineProvider);
        if skipped > 0 {
            warn!("[PUSH RPC] {} recipient(s) have no offline pusher", skipped);
        }

        if !report.is_success() {
            let failures: Vec<String> = report
                .failures()
                .map(|(user_id, reason)| format!("{}: {}", user_id, reason))
                .collect();
            return Err(ServerError::ServiceUnavailable(format!(
                "push failed for {} recipient(s): {}",
                failures.len(),
                failures.join(", ")
            )));
        }
        Ok(report)
    }

    /// 更新设备推送 token
    pub async fn update_push_registration(
        &self,
        user_id: &str,
        platform_id: i32,
        push_token: &str,
    ) -> Result<()> {
        validate_platform(platform_id)?;
        if push_token.is_empty() {
            return Err(ServerError::InvalidArgument("push token is empty".to_string()));
        }
        self.registrations
            .upsert(DeviceRegistration::new(user_id, platform_id, push_token))
            .await?;
        info!(
            "[PUSH RPC] registration updated: user_id={}, platform_id={}",
            user_id, platform_id
        );
        Ok(())
    }

    /// 删除设备推送注册
    pub async fn delete_user_push_registration(&self, user_id: &str, platform_id: i32) -> Result<()> {
        if user_id.is_empty() {
            return Err(ServerError::InvalidArgument("user_id is empty".to_string()));
        }
        validate_platform(platform_id)?;

        let existed = self.registrations.delete(user_id, platform_id).await?;
        info!(
            "[PUSH RPC] registration deleted: user_id={}, platform_id={}, existed={}",
            user_id, platform_id, existed
        );
        Ok(())
    }

    /// 群成员变更通知：剔除该群的成员缓存
    pub async fn invalidate_group(&self, group_id: &str) -> Result<()> {
        if group_id.is_empty() {
            return Err(ServerError::InvalidArgument("group_id is empty".to_string()));
        }
        self.invalidation
            .send(group_id.to_string())
            .await
            .map_err(|_| ServerError::ServiceUnavailable("invalidation listener stopped".to_string()))
    }
}

fn validate_platform(platform_id: i32) -> Result<()> {
    Platform::from_id(platform_id)
        .map(|_| ())
        .ok_or_else(|| ServerError::InvalidArgument(format!("unknown platform_id {}", platform_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MembershipConfig, PushConfig};
    use crate::infra::membership_cache::{GroupMemberSource, MembershipCache};
    use crate::push::online::SessionRegistry;
    use crate::push::provider::OfflinePushers;
    use crate::push::registration::MemoryRegistrationStore;
    use crate::push::types::{PushOptions, RecipientSelector};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct NoGroups;

    #[async_trait]
    impl GroupMemberSource for NoGroups {
        async fn get_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
            Err(ServerError::NotFound(format!("group {}", group_id)))
        }
    }

    fn service() -> (PushRpcService, Arc<SessionRegistry>, Arc<MemoryRegistrationStore>) {
        let sessions = Arc::new(SessionRegistry::new(8));
        let registrations = Arc::new(MemoryRegistrationStore::new());
        let membership = Arc::new(MembershipCache::new(
            Arc::new(NoGroups),
            &MembershipConfig::default(),
        ));
        let pusher = Arc::new(Pusher::new(
            sessions.clone(),
            OfflinePushers::new(),
            registrations.clone(),
            membership,
            &PushConfig::default(),
        ));
        let (tx, _rx) = mpsc::channel(8);
        (
            PushRpcService::new(pusher, registrations.clone(), tx),
            sessions,
            registrations,
        )
    }

    fn direct(recv: &str) -> MessageEvent {
        MessageEvent {
            client_msg_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            sender_platform_id: None,
            selector: RecipientSelector::Direct(recv.to_string()),
            payload: Bytes::from_static(b"hi"),
            options: PushOptions::default(),
            send_time: 0,
        }
    }

    #[tokio::test]
    async fn test_push_message_without_offline_provider_succeeds() {
        let (service, sessions, _) = service();
        let (_, mut rx) = sessions.register("u2", 2);

        let report = service.push_message(direct("u2")).await.unwrap();
        assert_eq!(report.outcome_of("u2"), Some(&DeliveryOutcome::DeliveredOnline));
        assert!(rx.recv().await.is_some());

        let report = service.push_message(direct("u3")).await.unwrap();
        assert_eq!(report.outcome_of("u3"), Some(&DeliveryOutcome::NoOfflineProvider));
    }

    #[tokio::test]
    async fn test_group_lookup_failure_is_error() {
        let (service, _, _) = service();
        let mut event = direct("u2");
        event.selector = RecipientSelector::Group("g1".to_string());
        assert!(matches!(
            service.push_message(event).await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_lifecycle() {
        let (service, _, registrations) = service();
        service.update_push_registration("u1", 2, "tok").await.unwrap();
        assert_eq!(registrations.get_user_registrations("u1").await.unwrap().len(), 1);

        service.delete_user_push_registration("u1", 2).await.unwrap();
        assert!(registrations.get_user_registrations("u1").await.unwrap().is_empty());

        assert!(matches!(
            service.delete_user_push_registration("u1", 77).await,
            Err(ServerError::InvalidArgument(_))
        ));
    }
}
