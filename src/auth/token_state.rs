// =====================================================
// Token 状态机
// =====================================================

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// 单个 (user, platform, token) 的状态（显式状态机）
///
/// - `Absent -> Normal`：签发
/// - `Normal -> Kicked`：被新 token 顶替或被强制下线
/// - `Kicked` 是吸收态，直到过期被清理才回到 `Absent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    /// 正常可用
    Normal,
    /// 已被踢下线
    Kicked,
    /// 没有记录（未签发、已过期或已清理）
    Absent,
}

impl TokenState {
    /// 存储中的状态码
    pub const NORMAL_CODE: i32 = 0;
    pub const KICKED_CODE: i32 = 2;

    /// 从存储状态码解析；未知状态码视为无法识别的 token
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            Self::NORMAL_CODE => Ok(TokenState::Normal),
            Self::KICKED_CODE => Ok(TokenState::Kicked),
            _ => Err(ServerError::TokenUnknown),
        }
    }

    /// 存储状态码；`Absent` 不落存储
    pub fn code(&self) -> Option<i32> {
        match self {
            TokenState::Normal => Some(Self::NORMAL_CODE),
            TokenState::Kicked => Some(Self::KICKED_CODE),
            TokenState::Absent => None,
        }
    }

    /// 签发该 token 之后的状态
    pub fn on_issue(self) -> Self {
        match self {
            TokenState::Absent | TokenState::Normal => TokenState::Normal,
            TokenState::Kicked => TokenState::Kicked,
        }
    }

    /// 踢下线之后的状态
    pub fn on_kick(self) -> Self {
        match self {
            TokenState::Normal | TokenState::Kicked => TokenState::Kicked,
            TokenState::Absent => TokenState::Absent,
        }
    }

    /// 鉴权判定
    pub fn check(self) -> Result<()> {
        match self {
            TokenState::Normal => Ok(()),
            TokenState::Kicked => Err(ServerError::TokenKicked),
            TokenState::Absent => Err(ServerError::TokenNotExist),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Normal => "NORMAL",
            TokenState::Kicked => "KICKED",
            TokenState::Absent => "ABSENT",
        }
    }
}
