use serde::{Deserialize, Serialize};

use crate::push::types::PushVendor;

/// 客户端平台
///
/// 数值 ID 写入 token claims 与设备注册记录，必须保持稳定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Platform {
    Ios = 1,
    Android = 2,
    Windows = 3,
    Osx = 4,
    Web = 5,
    MiniWebApp = 6,
    Linux = 7,
    AndroidPad = 8,
    IPad = 9,
    Admin = 10,
}

impl Platform {
    pub const ALL: [Platform; 10] = [
        Platform::Ios,
        Platform::Android,
        Platform::Windows,
        Platform::Osx,
        Platform::Web,
        Platform::MiniWebApp,
        Platform::Linux,
        Platform::AndroidPad,
        Platform::IPad,
        Platform::Admin,
    ];

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.id() == id)
    }

    pub fn id(&self) -> i32 {
        *self as i32
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Ios => "IOS",
            Platform::Android => "Android",
            Platform::Windows => "Windows",
            Platform::Osx => "OSX",
            Platform::Web => "Web",
            Platform::MiniWebApp => "MiniWebApp",
            Platform::Linux => "Linux",
            Platform::AndroidPad => "AndroidPad",
            Platform::IPad => "IPad",
            Platform::Admin => "Admin",
        }
    }

    /// 该平台离线推送走的厂商通道；桌面端和 Web 没有离线推送
    pub fn push_vendor(&self) -> Option<PushVendor> {
        match self {
            Platform::Ios | Platform::IPad => Some(PushVendor::Apns),
            Platform::Android | Platform::AndroidPad => Some(PushVendor::Fcm),
            _ => None,
        }
    }
}

impl TryFrom<i32> for Platform {
    type Error = String;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        Platform::from_id(id).ok_or_else(|| format!("unknown platform id: {}", id))
    }
}

impl From<Platform> for i32 {
    fn from(platform: Platform) -> Self {
        platform.id()
    }
}

/// 平台 ID 转名称，未知平台返回空串
pub fn platform_id_to_name(id: i32) -> &'static str {
    Platform::from_id(id).map(|p| p.name()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip_ids() {
        for platform in Platform::ALL {
            assert_eq!(Platform::from_id(platform.id()), Some(platform));
        }
        assert_eq!(Platform::from_id(0), None);
        assert_eq!(Platform::from_id(11), None);
    }

    #[test]
    fn test_platform_names() {
        assert_eq!(platform_id_to_name(1), "IOS");
        assert_eq!(platform_id_to_name(2), "Android");
        assert_eq!(platform_id_to_name(42), "");
    }

    #[test]
    fn test_push_vendor_mapping() {
        assert_eq!(Platform::Ios.push_vendor(), Some(PushVendor::Apns));
        assert_eq!(Platform::AndroidPad.push_vendor(), Some(PushVendor::Fcm));
        assert_eq!(Platform::Web.push_vendor(), None);
    }
}
