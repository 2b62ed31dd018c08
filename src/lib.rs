pub mod auth;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod http; // HTTP API
pub mod infra;
pub mod logging;
pub mod middleware;
pub mod model;
pub mod push; // 推送扇出
pub mod server;

pub use config::ServerConfig;
pub use context::OpIdentity;
pub use error::{Result, ServerError};
pub use server::PushServer;
