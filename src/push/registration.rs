use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::Result;
use crate::push::types::PushTarget;

/// 设备推送注册：(user_id, platform_id) -> 厂商推送 token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    pub user_id: String,
    pub platform_id: i32,
    pub push_token: String,
    pub updated_at: i64,
}

impl DeviceRegistration {
    pub fn new(user_id: impl Into<String>, platform_id: i32, push_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            platform_id,
            push_token: push_token.into(),
            updated_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn target(&self) -> PushTarget {
        PushTarget {
            user_id: self.user_id.clone(),
            platform_id: self.platform_id,
            push_token: self.push_token.clone(),
        }
    }
}

/// 设备推送注册存储
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// 新增或覆盖 (user, platform) 的注册
    async fn upsert(&self, registration: DeviceRegistration) -> Result<()>;

    /// 用户所有平台的注册，按 platform_id 升序
    async fn get_user_registrations(&self, user_id: &str) -> Result<Vec<DeviceRegistration>>;

    /// 删除注册，返回是否存在
    async fn delete(&self, user_id: &str, platform_id: i32) -> Result<bool>;
}

/// 内存注册存储
#[derive(Default)]
pub struct MemoryRegistrationStore {
    registrations: DashMap<String, BTreeMap<i32, DeviceRegistration>>,
}

impl MemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistrationStore {
    async fn upsert(&self, registration: DeviceRegistration) -> Result<()> {
        debug!(
            "[REGISTRATION] upsert user_id={}, platform_id={}",
            registration.user_id, registration.platform_id
        );
        self.registrations
            .entry(registration.user_id.clone())
            .or_default()
            .insert(registration.platform_id, registration);
        Ok(())
    }

    async fn get_user_registrations(&self, user_id: &str) -> Result<Vec<DeviceRegistration>> {
        Ok(self
            .registrations
            .get(user_id)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, user_id: &str, platform_id: i32) -> Result<bool> {
        let removed = match self.registrations.get_mut(user_id) {
            Some(mut entry) => entry.remove(&platform_id).is_some(),
            None => false,
        };
        self.registrations.remove_if(user_id, |_, regs| regs.is_empty());
        debug!(
            "[REGISTRATION] delete user_id={}, platform_id={}, existed={}",
            user_id, platform_id, removed
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_overwrites_same_platform() {
        let store = MemoryRegistrationStore::new();
        store.upsert(DeviceRegistration::new("u1", 2, "old")).await.unwrap();
        store.upsert(DeviceRegistration::new("u1", 2, "new")).await.unwrap();
        store.upsert(DeviceRegistration::new("u1", 1, "ios")).await.unwrap();

        let regs = store.get_user_registrations("u1").await.unwrap();
        assert_eq!(regs.len(), 2);
        assert_eq!(regs[0].platform_id, 1);
        assert_eq!(regs[1].push_token, "new");
    }

    #[tokio::test]
    async fn test_delete_registration() {
        let store = MemoryRegistrationStore::new();
        store.upsert(DeviceRegistration::new("u1", 2, "tok")).await.unwrap();

        assert!(store.delete("u1", 2).await.unwrap());
        assert!(!store.delete("u1", 2).await.unwrap());
        assert!(store.get_user_registrations("u1").await.unwrap().is_empty());
    }
}
