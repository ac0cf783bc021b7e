//! 修复能力：缺失文件的骨架生成、损坏文件的语法修复
//!
//! 作为注入的 trait 使用，测试中可替换为确定性的实现；生产中由模型调度完成。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::llm::{parse_json_lenient, GenerationRequest, ModelSession};
use crate::memory::Message;
use crate::store::EntityKind;

/// 一次修复请求
#[derive(Debug, Clone, PartialEq)]
pub enum RepairRequest {
    /// 为缺失的实体生成初始文档
    Skeleton { entity: EntityKind, project_name: String },
    /// 修复语法错误；excerpt 为截断后的原始内容
    FixSyntax {
        entity: EntityKind,
        excerpt: String,
        parse_error: String,
    },
}

/// 修复能力：尝试产出一个合法文档，失败返回 None
#[async_trait]
pub trait RepairOracle: Send + Sync {
    async fn attempt(&self, request: &RepairRequest) -> Option<Value>;
}

/// 不做任何修复
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRepair;

#[async_trait]
impl RepairOracle for NoRepair {
    async fn attempt(&self, _request: &RepairRequest) -> Option<Value> {
        None
    }
}

/// 经由作者模型完成修复
pub struct DispatcherRepairOracle {
    session: ModelSession,
}

impl DispatcherRepairOracle {
    pub fn new(session: ModelSession) -> Self {
        Self { session }
    }

    fn prompt(request: &RepairRequest) -> String {
        match request {
            RepairRequest::Skeleton { entity, project_name } => format!(
                "请为一个名为《{}》的小说生成一个标准的 {} 配置文件模板。只返回 JSON 内容，不要Markdown格式。",
                project_name,
                entity.file_name()
            ),
            RepairRequest::FixSyntax { excerpt, parse_error, .. } => format!(
                "以下是一个损坏的 JSON 文件内容（解析错误：{}），请修复它并返回合法的 JSON。不要改变数据结构和键值，只修复语法错误。\n\n{}",
                parse_error, excerpt
            ),
        }
    }
}

#[async_trait]
impl RepairOracle for DispatcherRepairOracle {
    async fn attempt(&self, request: &RepairRequest) -> Option<Value> {
        let temperature = match request {
            RepairRequest::Skeleton { .. } => 0.7,
            RepairRequest::FixSyntax { .. } => 0.1,
        };
        let req = GenerationRequest::new(vec![Message::user(Self::prompt(request))])
            .with_temperature(temperature)
            .with_task("store_repair");
        match self.session.chat_author(&req).await {
            Ok(text) => parse_json_lenient(&text).filter(Value::is_object),
            Err(e) => {
                tracing::warn!("repair oracle unavailable: {}", e);
                None
            }
        }
    }
}

/// 修复走了哪条路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPath {
    /// 缺失文件，由模型生成骨架
    OracleSkeleton,
    /// 缺失文件，使用静态默认骨架
    StaticDefault,
    /// 损坏文件，由模型修复语法
    OracleFixed,
    /// 损坏文件，修复失败（缓存冻结）
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    pub entity: EntityKind,
    pub path: RepairPath,
    pub at: DateTime<Utc>,
}
