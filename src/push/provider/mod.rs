pub mod apns;
pub mod fcm;
pub mod mock;
pub mod provider_trait;

pub use apns::ApnsProvider;
pub use fcm::FcmProvider;
pub use mock::MockProvider;
pub use provider_trait::OfflinePushProvider;

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::model::platform::Platform;
use crate::push::types::PushVendor;

/// 按厂商索引的离线推送提供者集合
///
/// 部署可以一个都不配置，此时所有离线推送都得到 `NoOfflinePusher`。
#[derive(Clone, Default)]
pub struct OfflinePushers {
    providers: HashMap<PushVendor, Arc<dyn OfflinePushProvider>>,
}

impl OfflinePushers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Arc<dyn OfflinePushProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: Arc<dyn OfflinePushProvider>) {
        self.providers.insert(provider.vendor(), provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn vendors(&self) -> Vec<PushVendor> {
        self.providers.keys().copied().collect()
    }

    /// 查找平台对应的 provider；平台无厂商通道或厂商未配置时返回 `NoOfflinePusher`
    pub fn for_platform(&self, platform_id: i32) -> Result<Arc<dyn OfflinePushProvider>> {
        let vendor = Platform::from_id(platform_id)
            .and_then(|p| p.push_vendor())
            .ok_or_else(|| {
                ServerError::NoOfflinePusher(format!(
                    "platform {} has no offline push channel",
                    platform_id
                ))
            })?;

        self.providers.get(&vendor).cloned().ok_or_else(|| {
            ServerError::NoOfflinePusher(format!("{} provider not configured", vendor.as_str()))
        })
    }
}
