use crate::error::Result;
use crate::push::types::{OfflineNotification, PushTarget, PushVendor};
use async_trait::async_trait;

/// 离线推送提供者接口
///
/// 每个实现对应一个厂商通道。调用方负责超时控制。
#[async_trait]
pub trait OfflinePushProvider: Send + Sync {
    /// 向一个已注册设备发送离线通知
    async fn push(&self, target: &PushTarget, notification: &OfflineNotification) -> Result<()>;

    /// 获取 Provider 对应的 Vendor
    fn vendor(&self) -> PushVendor;
}
