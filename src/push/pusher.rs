use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PushConfig;
use crate::error::{Result, ServerError};
use crate::infra::membership_cache::MembershipCache;
use crate::push::online::{OnlineDelivery, OnlinePusher};
use crate::push::provider::OfflinePushers;
use crate::push::registration::RegistrationStore;
use crate::push::types::{DeliveryOutcome, MessageEvent, PushReport, RecipientSelector};

/// 推送器
///
/// 职责：
/// - 解析接收方（单聊直接得出，群聊读成员缓存）
/// - 逐个接收方先尝试在线投递
/// - 明确没有在线会话时走离线推送
/// - 每个接收方恰好产出一个 [`DeliveryOutcome`]
pub struct Pusher {
    online: Arc<dyn OnlinePusher>,
    offline: OfflinePushers,
    registrations: Arc<dyn RegistrationStore>,
    membership: Arc<MembershipCache>,
    online_timeout: Duration,
    offline_timeout: Duration,
    max_concurrent_deliveries: usize,
}

impl Pusher {
    pub fn new(
        online: Arc<dyn OnlinePusher>,
        offline: OfflinePushers,
        registrations: Arc<dyn RegistrationStore>,
        membership: Arc<MembershipCache>,
        config: &PushConfig,
    ) -> Self {
        if offline.is_empty() {
            warn!("[PUSHER] no offline push provider configured, offline recipients will be skipped");
        }
        Self {
            online,
            offline,
            registrations,
            membership,
            online_timeout: config.online_timeout(),
            offline_timeout: config.offline_timeout(),
            max_concurrent_deliveries: config.max_concurrent_deliveries.max(1),
        }
    }

    /// 按选择器分发一个事件
    pub async fn push(&self, event: Arc<MessageEvent>) -> Result<PushReport> {
        event.validate()?;

        let report = match &event.selector {
            RecipientSelector::Direct(recv_id) => {
                let recipients = event.direct_recipients(recv_id);
                self.push_to_user(&recipients, &event).await
            }
            RecipientSelector::Group(group_id) => self.push_to_group(group_id, &event).await?,
        };

        info!(
            "[PUSHER] event done: client_msg_id={}, conversation_id={}, recipients={}, online={}, offline={}, no_provider={}, failed={}",
            event.client_msg_id,
            event.conversation_id(),
            report.outcomes.len(),
            report.count(|o| *o == DeliveryOutcome::DeliveredOnline),
            report.count(|o| *o == DeliveryOutcome::DeliveredOffline),
            report.count(|o| *o == DeliveryOutcome::NoOfflineProvider),
            report.count(DeliveryOutcome::is_failed),
        );
        Ok(report)
    }

    /// 推送给一组用户，所有接收方都有终态后返回
    pub async fn push_to_user(&self, recipients: &[String], event: &Arc<MessageEvent>) -> PushReport {
        let outcomes: Vec<(String, DeliveryOutcome)> = stream::iter(recipients.iter().cloned())
            .map(|user_id| async move {
                let outcome = self.deliver(&user_id, event).await;
                (user_id, outcome)
            })
            .buffered(self.max_concurrent_deliveries)
            .collect()
            .await;

        let mut report = PushReport::default();
        for (user_id, outcome) in outcomes {
            report.push(user_id, outcome);
        }
        report
    }

    /// 推送给群成员（发送者除外，除非开启 sender-sync）
    ///
    /// 成员查询失败是整个事件的失败，返回 `Err`。
    pub async fn push_to_group(&self, group_id: &str, event: &Arc<MessageEvent>) -> Result<PushReport> {
        let members = self.membership.get_members(group_id).await.map_err(|e| {
            warn!(
                "[PUSHER] membership lookup failed: group_id={}, error={}",
                group_id, e
            );
            e
        })?;

        let recipients = group_recipients(&members, event);
        debug!(
            "[PUSHER] group fan-out: group_id={}, members={}, recipients={}",
            group_id,
            members.len(),
            recipients.len()
        );
        Ok(self.push_to_user(&recipients, event).await)
    }

    async fn deliver(&self, user_id: &str, event: &Arc<MessageEvent>) -> DeliveryOutcome {
        match timeout(self.online_timeout, self.online.push_online(user_id, event)).await {
            Ok(Ok(OnlineDelivery::Delivered { sessions })) => {
                debug!(
                    "[PUSHER] delivered online: user_id={}, sessions={}",
                    user_id, sessions
                );
                DeliveryOutcome::DeliveredOnline
            }
            // sender-sync 只同步到发送者的其它在线会话，不给发送者发离线推送
            Ok(Ok(OnlineDelivery::NoLiveSession)) if user_id == event.sender_id => {
                debug!(
                    "[PUSHER] sender has no other live session, skip offline: user_id={}",
                    user_id
                );
                DeliveryOutcome::DeliveredOnline
            }
            Ok(Ok(OnlineDelivery::NoLiveSession)) => self.deliver_offline(user_id, event).await,
            Ok(Err(e)) => {
                warn!("[PUSHER] online delivery failed: user_id={}, error={}", user_id, e);
                DeliveryOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!("[PUSHER] online delivery timed out: user_id={}", user_id);
                DeliveryOutcome::Failed("online delivery timed out".to_string())
            }
        }
    }

    async fn deliver_offline(&self, user_id: &str, event: &MessageEvent) -> DeliveryOutcome {
        if self.offline.is_empty() {
            debug!("[PUSHER] no offline pusher, skipping user_id={}", user_id);
            return DeliveryOutcome::NoOfflineProvider;
        }

        let registrations =
            match timeout(self.offline_timeout, self.registrations.get_user_registrations(user_id)).await {
                Ok(Ok(registrations)) => registrations,
                Ok(Err(e)) => return DeliveryOutcome::Failed(e.to_string()),
                Err(_) => {
                    return DeliveryOutcome::Failed("registration lookup timed out".to_string())
                }
            };
        if registrations.is_empty() {
            debug!("[PUSHER] user_id={} has no push registration", user_id);
            return DeliveryOutcome::NoOfflineProvider;
        }

        let notification = event.notification();
        let mut delivered = 0;
        let mut failures = Vec::new();
        for registration in &registrations {
            let provider = match self.offline.for_platform(registration.platform_id) {
                Ok(provider) => provider,
                Err(ServerError::NoOfflinePusher(reason)) => {
                    debug!(
                        "[PUSHER] skip platform_id={} for user_id={}: {}",
                        registration.platform_id, user_id, reason
                    );
                    continue;
                }
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };

            match timeout(
                self.offline_timeout,
                provider.push(&registration.target(), &notification),
            )
            .await
            {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => failures.push(e.to_string()),
                Err(_) => failures.push(format!("{} push timed out", provider.vendor().as_str())),
            }
        }

        if delivered > 0 {
            if !failures.is_empty() {
                warn!(
                    "[PUSHER] partial offline delivery: user_id={}, failures={:?}",
                    user_id, failures
                );
            }
            DeliveryOutcome::DeliveredOffline
        } else if !failures.is_empty() {
            warn!(
                "[PUSHER] offline push failed: user_id={}, failures={:?}",
                user_id, failures
            );
            DeliveryOutcome::Failed(failures.join("; "))
        } else {
            info!(
                "[PUSHER] no offline pusher for any platform of user_id={}",
                user_id
            );
            DeliveryOutcome::NoOfflineProvider
        }
    }
}

/// 群聊接收方：成员快照去重，发送者仅在 sender-sync 时保留
pub fn group_recipients(members: &[String], event: &MessageEvent) -> Vec<String> {
    let mut seen = HashSet::with_capacity(members.len());
    members
        .iter()
        .filter(|m| event.options.sender_sync || **m != event.sender_id)
        .filter(|m| seen.insert(m.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MembershipConfig;
    use crate::infra::membership_cache::GroupMemberSource;
    use crate::push::online::SessionRegistry;
    use crate::push::provider::OfflinePushProvider;
    use crate::push::registration::{DeviceRegistration, MemoryRegistrationStore};
    use crate::push::types::{OfflineNotification, PushOptions, PushTarget, PushVendor};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeOnline {
        online: HashSet<String>,
        broken: HashSet<String>,
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OnlinePusher for FakeOnline {
        async fn push_online(&self, user_id: &str, _event: &Arc<MessageEvent>) -> Result<OnlineDelivery> {
            self.calls.lock().push(user_id.to_string());
            tokio::time::sleep(self.delay).await;
            if self.broken.contains(user_id) {
                return Err(ServerError::Network("gateway unreachable".to_string()));
            }
            if self.online.contains(user_id) {
                Ok(OnlineDelivery::Delivered { sessions: 1 })
            } else {
                Ok(OnlineDelivery::NoLiveSession)
            }
        }
    }

    struct RecordingProvider {
        vendor: PushVendor,
        fail: bool,
        pushed: Mutex<Vec<PushTarget>>,
    }

    impl RecordingProvider {
        fn new(vendor: PushVendor, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                vendor,
                fail,
                pushed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl OfflinePushProvider for RecordingProvider {
        async fn push(&self, target: &PushTarget, _n: &OfflineNotification) -> Result<()> {
            self.pushed.lock().push(target.clone());
            if self.fail {
                Err(ServerError::Provider("BadDeviceToken".to_string()))
            } else {
                Ok(())
            }
        }

        fn vendor(&self) -> PushVendor {
            self.vendor
        }
    }

    struct StaticMembers(Mutex<HashMap<String, Vec<String>>>);

    #[async_trait]
    impl GroupMemberSource for StaticMembers {
        async fn get_group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
            self.0
                .lock()
                .get(group_id)
                .cloned()
                .ok_or_else(|| ServerError::Network("group service unreachable".to_string()))
        }
    }

    fn members(groups: &[(&str, &[&str])]) -> Arc<StaticMembers> {
        Arc::new(StaticMembers(Mutex::new(
            groups
                .iter()
                .map(|(g, ms)| (g.to_string(), ms.iter().map(|m| m.to_string()).collect()))
                .collect(),
        )))
    }

    fn event(selector: &str, sender_sync: bool) -> Arc<MessageEvent> {
        Arc::new(MessageEvent {
            client_msg_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            sender_platform_id: Some(1),
            selector: selector.parse().unwrap(),
            payload: Bytes::from_static(b"hello"),
            options: PushOptions { sender_sync },
            send_time: 0,
        })
    }

    struct Harness {
        online: Arc<FakeOnline>,
        registrations: Arc<MemoryRegistrationStore>,
        source: Arc<StaticMembers>,
        membership: Arc<MembershipCache>,
    }

    impl Harness {
        fn new(online: FakeOnline, source: Arc<StaticMembers>) -> Self {
            let membership = Arc::new(MembershipCache::new(
                source.clone(),
                &MembershipConfig::default(),
            ));
            Self {
                online: Arc::new(online),
                registrations: Arc::new(MemoryRegistrationStore::new()),
                source,
                membership,
            }
        }

        fn pusher(&self, offline: OfflinePushers, config: PushConfig) -> Pusher {
            Pusher::new(
                self.online.clone(),
                offline,
                self.registrations.clone(),
                self.membership.clone(),
                &config,
            )
        }
    }

    fn online(users: &[&str]) -> FakeOnline {
        FakeOnline {
            online: users.iter().map(|u| u.to_string()).collect(),
            ..FakeOnline::default()
        }
    }

    #[tokio::test]
    async fn test_direct_recipient_sets() {
        let h = Harness::new(online(&["u1", "u2"]), members(&[]));
        let pusher = h.pusher(OfflinePushers::new(), PushConfig::default());

        let report = pusher.push(event("direct:u2", false)).await.unwrap();
        assert_eq!(report.recipients(), vec!["u2"]);

        let report = pusher.push(event("direct:u2", true)).await.unwrap();
        assert_eq!(report.recipients(), vec!["u2", "u1"]);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_group_online_and_offline_mix() {
        let h = Harness::new(online(&["u2"]), members(&[("g7", &["u1", "u2", "u3"])]));
        h.registrations
            .upsert(DeviceRegistration::new("u3", 2, "fcm-u3"))
            .await
            .unwrap();
        let fcm = RecordingProvider::new(PushVendor::Fcm, false);
        let pusher = h.pusher(
            OfflinePushers::new().with_provider(fcm.clone()),
            PushConfig::default(),
        );

        let report = pusher.push(event("group:g7", false)).await.unwrap();
        assert_eq!(report.recipients(), vec!["u2", "u3"]);
        assert_eq!(report.outcome_of("u2"), Some(&DeliveryOutcome::DeliveredOnline));
        assert_eq!(report.outcome_of("u3"), Some(&DeliveryOutcome::DeliveredOffline));
        assert!(report.is_success());

        let pushed = fcm.pushed.lock();
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].user_id, "u3");
        assert_eq!(pushed[0].push_token, "fcm-u3");
    }

    #[tokio::test]
    async fn test_online_recipient_never_reaches_provider() {
        let h = Harness::new(online(&["u2"]), members(&[]));
        h.registrations
            .upsert(DeviceRegistration::new("u2", 2, "fcm-u2"))
            .await
            .unwrap();
        let fcm = RecordingProvider::new(PushVendor::Fcm, false);
        let pusher = h.pusher(
            OfflinePushers::new().with_provider(fcm.clone()),
            PushConfig::default(),
        );

        pusher.push(event("direct:u2", false)).await.unwrap();
        assert!(fcm.pushed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_is_tolerated() {
        let h = Harness::new(online(&[]), members(&[]));
        h.registrations
            .upsert(DeviceRegistration::new("u2", 1, "apns-u2"))
            .await
            .unwrap();

        let pusher = h.pusher(OfflinePushers::new(), PushConfig::default());
        let report = pusher.push(event("direct:u2", false)).await.unwrap();
        assert_eq!(report.outcome_of("u2"), Some(&DeliveryOutcome::NoOfflineProvider));
        assert!(report.is_success());

        // 只配置了 FCM，iOS 设备同样没有可用通道
        let fcm = RecordingProvider::new(PushVendor::Fcm, false);
        let pusher = h.pusher(OfflinePushers::new().with_provider(fcm.clone()), PushConfig::default());
        let report = pusher.push(event("direct:u2", false)).await.unwrap();
        assert_eq!(report.outcome_of("u2"), Some(&DeliveryOutcome::NoOfflineProvider));
        assert!(fcm.pushed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_per_recipient() {
        let mut fake = online(&["u2"]);
        fake.broken.insert("u4".to_string());
        let h = Harness::new(fake, members(&[("g1", &["u1", "u2", "u3", "u4"])]));
        h.registrations
            .upsert(DeviceRegistration::new("u3", 2, "bad"))
            .await
            .unwrap();
        let fcm = RecordingProvider::new(PushVendor::Fcm, true);
        let pusher = h.pusher(OfflinePushers::new().with_provider(fcm), PushConfig::default());

        let report = pusher.push(event("group:g1", false)).await.unwrap();
        assert_eq!(report.outcome_of("u2"), Some(&DeliveryOutcome::DeliveredOnline));
        assert!(report.outcome_of("u3").unwrap().is_failed());
        assert!(report.outcome_of("u4").unwrap().is_failed());
        assert!(!report.is_success());
        assert_eq!(report.outcomes.len(), 3);
    }

    #[tokio::test]
    async fn test_online_timeout_is_failure() {
        let mut fake = online(&["u2"]);
        fake.delay = Duration::from_millis(200);
        let h = Harness::new(fake, members(&[]));
        let config = PushConfig {
            online_timeout_ms: 20,
            ..PushConfig::default()
        };
        let pusher = h.pusher(OfflinePushers::new(), config);

        let report = pusher.push(event("direct:u2", false)).await.unwrap();
        assert!(report.outcome_of("u2").unwrap().is_failed());
    }

    #[tokio::test]
    async fn test_membership_failure_fails_event() {
        let h = Harness::new(online(&[]), members(&[]));
        let pusher = h.pusher(OfflinePushers::new(), PushConfig::default());
        assert!(matches!(
            pusher.push(event("group:missing", false)).await,
            Err(ServerError::Network(_))
        ));
        assert!(h.online.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sender_sync_never_pushes_sender_offline() {
        // u1 只在发起消息的平台在线，且有 FCM 注册
        let h = Harness::new(online(&["u2"]), members(&[("g7", &["u1", "u2"])]));
        h.registrations
            .upsert(DeviceRegistration::new("u1", 2, "fcm-u1"))
            .await
            .unwrap();
        let fcm = RecordingProvider::new(PushVendor::Fcm, false);
        let pusher = h.pusher(
            OfflinePushers::new().with_provider(fcm.clone()),
            PushConfig::default(),
        );

        let report = pusher.push(event("direct:u2", true)).await.unwrap();
        assert_eq!(report.outcome_of("u1"), Some(&DeliveryOutcome::DeliveredOnline));
        assert!(report.is_success());

        let report = pusher.push(event("group:g7", true)).await.unwrap();
        assert_eq!(report.outcome_of("u1"), Some(&DeliveryOutcome::DeliveredOnline));
        assert!(fcm.pushed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sender_sync_reaches_real_session_registry() {
        let sessions = Arc::new(SessionRegistry::new(4));
        let (_, mut origin) = sessions.register("u1", 1);
        let registrations = Arc::new(MemoryRegistrationStore::new());
        registrations
            .upsert(DeviceRegistration::new("u1", 2, "fcm-u1"))
            .await
            .unwrap();
        let fcm = RecordingProvider::new(PushVendor::Fcm, false);
        let pusher = Pusher::new(
            sessions,
            OfflinePushers::new().with_provider(fcm.clone()),
            registrations,
            Arc::new(MembershipCache::new(members(&[]), &MembershipConfig::default())),
            &PushConfig::default(),
        );

        let report = pusher.push(event("direct:u2", true)).await.unwrap();
        assert_eq!(report.outcome_of("u1"), Some(&DeliveryOutcome::DeliveredOnline));
        assert!(origin.try_recv().is_err());
        assert!(fcm.pushed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_group_sender_sync_includes_sender() {
        let h = Harness::new(online(&["u1", "u2"]), members(&[("g7", &["u1", "u2"])]));
        let pusher = h.pusher(OfflinePushers::new(), PushConfig::default());
        let report = pusher.push(event("group:g7", true)).await.unwrap();
        assert_eq!(report.recipients(), vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn test_group_uses_snapshot_at_resolution() {
        let mut fake = online(&["u2", "u3"]);
        fake.delay = Duration::from_millis(50);
        let h = Harness::new(fake, members(&[("g7", &["u1", "u2", "u3"])]));
        let pusher = Arc::new(h.pusher(OfflinePushers::new(), PushConfig::default()));

        let task = {
            let pusher = Arc::clone(&pusher);
            tokio::spawn(async move { pusher.push(event("group:g7", false)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.source
            .0
            .lock()
            .insert("g7".to_string(), vec!["u1".to_string(), "u5".to_string()]);
        h.membership.invalidate("g7").await;

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.recipients(), vec!["u2", "u3"]);
    }

    #[tokio::test]
    async fn test_empty_sender_rejected() {
        let h = Harness::new(online(&[]), members(&[]));
        let pusher = h.pusher(OfflinePushers::new(), PushConfig::default());
        let mut bad = (*event("direct:u2", false)).clone();
        bad.sender_id.clear();
        assert!(matches!(
            pusher.push(Arc::new(bad)).await,
            Err(ServerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_group_recipients_dedupes() {
        let e = event("group:g", false);
        let ms: Vec<String> = ["u2", "u1", "u2", "u3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(group_recipients(&ms, &e), vec!["u2", "u3"]);
    }
}
