// 认证模块 - token 签发、状态存储与强制下线

pub mod jwt_service;
pub mod token_issue_service;
pub mod token_state;
pub mod token_store;

// 重新导出主要类型
pub use jwt_service::{JwtService, TokenClaims};
pub use token_issue_service::{AuthService, IssueTokenResponse, ParsedToken};
pub use token_state::TokenState;
pub use token_store::{MemoryTokenStore, TokenStateStore};
