//! HTTP 服务器模块 - 使用 Axum 提供推送与鉴权 API
//!
//! 功能包括：
//! - token 签发 / 强制下线 / 解析
//! - 设备推送 token 注册
//! - 消息提交（写入事件流）
//! - Push RPC（同步推送、删除注册、群成员缓存失效）

pub mod routes;
pub mod server;

pub use server::{HttpServerState, PushHttpServer};
