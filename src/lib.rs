//! Inkstone - Rust 长篇连载小说生成内核
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **llm**: 模型客户端、限流、回退调度与会话级模型选择
//! - **memory**: 消息类型与上下文预算
//! - **novel**: 写手/审核/主编、修订闸门、节奏与写作会话
//! - **observability**: 日志初始化与生成/切换/限流记录
//! - **store**: 设定、作者画像、历史、审核记录四个持久化实体

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod novel;
pub mod observability;
pub mod store;

pub use novel::{RunMode, WritingSession};
