//! 应用配置
//!
//! 配置按「默认值 → TOML 文件 → 环境变量」的顺序叠加，加载后立即校验。

pub mod models;

pub use models::*;
