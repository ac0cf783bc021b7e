//! 错误类型
//!
//! 模型层的瞬时失败在调度器内部吸收；这里是需要调用方（或人）做决定的错误。

use std::path::PathBuf;

use thiserror::Error;

use crate::llm::DispatchError;
use crate::store::EntityKind;

/// 状态存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 文件解析失败且自动修复也失败：内存保持最后一次有效状态，不写盘
    #[error("{entity} is corrupt at {path:?} and could not be repaired: {reason}")]
    CorruptState {
        entity: EntityKind,
        path: PathBuf,
        reason: String,
    },

    /// 写盘失败：内存中的文档已是最新，可稍后重新 save
    #[error("failed to persist {entity} to {path:?}: {source}")]
    Persist {
        entity: EntityKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// 请求的修改违反实体约束（如把非空章节列表替换为空）
    #[error("update to {entity} rejected: {reason}")]
    Rejected { entity: EntityKind, reason: String },
}

impl StoreError {
    /// 写盘失败不影响继续运行
    pub fn is_persist(&self) -> bool {
        matches!(self, StoreError::Persist { .. })
    }
}

/// 写作流程的顶层错误
#[derive(Error, Debug)]
pub enum NovelError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// 审核门槛在尝试次数内未达标，且没有给出继续或放弃的决定
    #[error("chapter {chapter} did not pass review after {attempts} attempts")]
    QualityGateExhausted { chapter: u32, attempts: u32 },
}
