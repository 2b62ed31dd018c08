use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::push::provider::provider_trait::OfflinePushProvider;
use crate::push::types::{OfflineNotification, PushTarget, PushVendor};

/// Mock Provider（用于开发环境）
///
/// 不调用真实 API，只打印日志
pub struct MockProvider {
    vendor: PushVendor,
}

impl MockProvider {
    pub fn new(vendor: PushVendor) -> Self {
        Self { vendor }
    }
}

#[async_trait]
impl OfflinePushProvider for MockProvider {
    async fn push(&self, target: &PushTarget, notification: &OfflineNotification) -> Result<()> {
        info!(
            "[MOCK PUSH] vendor={}, user_id={}, platform_id={}, conversation_id={}, preview={}",
            self.vendor.as_str(),
            target.user_id,
            target.platform_id,
            notification.conversation_id,
            notification.body
        );
        Ok(())
    }

    fn vendor(&self) -> PushVendor {
        self.vendor
    }
}
