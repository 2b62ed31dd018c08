use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 推送平台（厂商通道）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PushVendor {
    Apns,
    Fcm,
}

impl PushVendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            PushVendor::Apns => "apns",
            PushVendor::Fcm => "fcm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "apns" => Some(PushVendor::Apns),
            "fcm" => Some(PushVendor::Fcm),
            _ => None,
        }
    }
}

/// 接收方选择器
///
/// 在事件入口处解析一次，之后各层只做 match，不再按会话类型重复分支。
/// 线上格式为 `direct:<user_id>` / `group:<group_id>`。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecipientSelector {
    Direct(String),
    Group(String),
}

impl RecipientSelector {
    /// 会话 ID：单聊 `si_<小>_<大>`，群聊 `sg_<group_id>`
    pub fn conversation_id(&self, sender_id: &str) -> String {
        match self {
            RecipientSelector::Direct(recv_id) => {
                let (a, b) = if sender_id <= recv_id.as_str() {
                    (sender_id, recv_id.as_str())
                } else {
                    (recv_id.as_str(), sender_id)
                };
                format!("si_{}_{}", a, b)
            }
            RecipientSelector::Group(group_id) => format!("sg_{}", group_id),
        }
    }
}

impl fmt::Display for RecipientSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipientSelector::Direct(id) => write!(f, "direct:{}", id),
            RecipientSelector::Group(id) => write!(f, "group:{}", id),
        }
    }
}

impl FromStr for RecipientSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("selector missing kind: {}", s))?;
        if id.is_empty() {
            return Err(format!("selector missing id: {}", s));
        }
        match kind {
            "direct" => Ok(RecipientSelector::Direct(id.to_string())),
            "group" => Ok(RecipientSelector::Group(id.to_string())),
            other => Err(format!("unknown selector kind: {}", other)),
        }
    }
}

impl Serialize for RecipientSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecipientSelector {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// 消息推送选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOptions {
    /// 同步给发送者的其它在线会话
    #[serde(default)]
    pub sender_sync: bool,
}

/// 推送事件（不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// 客户端消息 ID，仅用于日志关联
    #[serde(default)]
    pub client_msg_id: String,
    pub sender_id: String,
    /// 发送者所在平台，sender-sync 时跳过该平台的会话
    #[serde(default)]
    pub sender_platform_id: Option<i32>,
    pub selector: RecipientSelector,
    #[serde(default)]
    pub payload: Bytes,
    #[serde(default)]
    pub options: PushOptions,
    /// 发送时间（毫秒）
    #[serde(default)]
    pub send_time: i64,
}

impl MessageEvent {
    /// 校验必填字段
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.sender_id.is_empty() {
            return Err(crate::error::ServerError::InvalidArgument(
                "sender_id is empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn conversation_id(&self) -> String {
        self.selector.conversation_id(&self.sender_id)
    }

    /// 单聊接收方集合：[recv] 或 sender-sync 时 [recv, sender]
    pub fn direct_recipients(&self, recv_id: &str) -> Vec<String> {
        let mut recipients = vec![recv_id.to_string()];
        if self.options.sender_sync && self.sender_id != recv_id {
            recipients.push(self.sender_id.clone());
        }
        recipients
    }

    /// 离线通知内容
    pub fn notification(&self) -> OfflineNotification {
        OfflineNotification {
            conversation_id: self.conversation_id(),
            sender_id: self.sender_id.clone(),
            client_msg_id: self.client_msg_id.clone(),
            title: "新消息".to_string(),
            body: preview(&self.payload),
        }
    }
}

fn preview(payload: &Bytes) -> String {
    const MAX_CHARS: usize = 64;
    let text = String::from_utf8_lossy(payload);
    let mut out: String = text.chars().take(MAX_CHARS).collect();
    if text.chars().count() > MAX_CHARS {
        out.push('…');
    }
    out
}

/// 离线推送内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineNotification {
    pub conversation_id: String,
    pub sender_id: String,
    pub client_msg_id: String,
    pub title: String,
    pub body: String,
}

/// 离线推送目标（一个已注册设备）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub user_id: String,
    pub platform_id: i32,
    pub push_token: String,
}

/// 单个接收方的投递结果，每个接收方每个事件恰好一个
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    DeliveredOnline,
    DeliveredOffline,
    NoOfflineProvider,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, DeliveryOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub user_id: String,
    pub outcome: DeliveryOutcome,
}

/// 单个事件的聚合投递结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub outcomes: Vec<RecipientOutcome>,
}

impl PushReport {
    pub fn push(&mut self, user_id: String, outcome: DeliveryOutcome) {
        self.outcomes.push(RecipientOutcome { user_id, outcome });
    }

    /// 没有任何 Failed 即视为成功（NoOfflineProvider 属于可容忍的部分成功）
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|o| o.outcome.is_failed())
    }

    pub fn outcome_of(&self, user_id: &str) -> Option<&DeliveryOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.user_id == user_id)
            .map(|o| &o.outcome)
    }

    pub fn recipients(&self) -> Vec<&str> {
        self.outcomes.iter().map(|o| o.user_id.as_str()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            DeliveryOutcome::Failed(reason) => Some((o.user_id.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn count(&self, pred: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }
}
