//! 监督者：需要人（或自动策略）拍板的地方
//!
//! 核心只提出结构化的确认请求，回答是布尔值或一段文本。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

/// 审核门槛用尽后的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// 转为人工干预，继续修改（不再受自动门槛约束）
    Intervene,
    /// 放弃本章
    Abandon,
    /// 交给上层：以 QualityGateExhausted 错误结束本次运行
    Escalate,
}

#[async_trait]
pub trait Supervisor: Send + Sync {
    /// 是/否确认
    async fn confirm(&self, prompt: &str) -> bool;

    /// 自由文本意见；None 或空串表示没有意见
    async fn feedback(&self, prompt: &str) -> Option<String>;

    /// 审核尝试次数用尽仍未达标
    async fn on_gate_exhausted(&self, chapter: u32, attempts: u32) -> GateDecision;
}

/// 无人值守：所有确认为是，不给意见，门槛用尽时按配置决定
#[derive(Debug, Clone, Copy)]
pub struct AutoSupervisor {
    pub on_exhausted: GateDecision,
}

impl Default for AutoSupervisor {
    fn default() -> Self {
        Self {
            on_exhausted: GateDecision::Abandon,
        }
    }
}

#[async_trait]
impl Supervisor for AutoSupervisor {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }

    async fn feedback(&self, _prompt: &str) -> Option<String> {
        None
    }

    async fn on_gate_exhausted(&self, chapter: u32, attempts: u32) -> GateDecision {
        tracing::warn!(
            "chapter {} failed review {} times, auto decision: {:?}",
            chapter,
            attempts,
            self.on_exhausted
        );
        self.on_exhausted
    }
}

/// 预设回答的监督者（测试与离线演示）；回答耗尽后确认为是、无意见、放弃
#[derive(Debug, Default)]
pub struct ScriptedSupervisor {
    confirms: Mutex<VecDeque<bool>>,
    feedbacks: Mutex<VecDeque<Option<String>>>,
    decisions: Mutex<VecDeque<GateDecision>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_confirms(self, answers: impl IntoIterator<Item = bool>) -> Self {
        lock(&self.confirms).extend(answers);
        self
    }

    pub fn with_feedback(self, answers: impl IntoIterator<Item = Option<String>>) -> Self {
        lock(&self.feedbacks).extend(answers);
        self
    }

    pub fn with_decisions(self, answers: impl IntoIterator<Item = GateDecision>) -> Self {
        lock(&self.decisions).extend(answers);
        self
    }

    /// 收到过的提问（按顺序）
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl Supervisor for ScriptedSupervisor {
    async fn confirm(&self, prompt: &str) -> bool {
        lock(&self.prompts).push(prompt.to_string());
        lock(&self.confirms).pop_front().unwrap_or(true)
    }

    async fn feedback(&self, prompt: &str) -> Option<String> {
        lock(&self.prompts).push(prompt.to_string());
        lock(&self.feedbacks).pop_front().flatten()
    }

    async fn on_gate_exhausted(&self, chapter: u32, attempts: u32) -> GateDecision {
        lock(&self.prompts).push(format!("gate exhausted: chapter {} after {}", chapter, attempts));
        lock(&self.decisions)
            .pop_front()
            .unwrap_or(GateDecision::Abandon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_supervisor() {
        let s = AutoSupervisor {
            on_exhausted: GateDecision::Intervene,
        };
        assert!(s.confirm("继续？").await);
        assert_eq!(s.feedback("意见？").await, None);
        assert_eq!(s.on_gate_exhausted(1, 3).await, GateDecision::Intervene);
    }

    #[tokio::test]
    async fn test_scripted_supervisor_pops_then_defaults() {
        let s = ScriptedSupervisor::new()
            .with_confirms([false])
            .with_feedback([Some("节奏太慢".to_string())]);
        assert!(!s.confirm("a").await);
        assert!(s.confirm("b").await);
        assert_eq!(s.feedback("c").await.as_deref(), Some("节奏太慢"));
        assert_eq!(s.feedback("d").await, None);
        assert_eq!(s.on_gate_exhausted(2, 3).await, GateDecision::Abandon);
        assert_eq!(s.prompts().len(), 5);
    }
}
