//! 数据模型模块

pub mod platform;

pub use platform::{platform_id_to_name, Platform};
