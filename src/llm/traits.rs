//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock / Scripted）实现 LlmClient：发送有序的 role/content 轮次，
//! 返回文本或带类型的失败（RateLimited / Transient / Fatal）。调度器只依赖这个契约。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::{total_chars, Message};

/// 单次模型调用失败的类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    /// 触发限流：同一模型退避后重试
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// 其它请求错误：立即切换模型
    #[error("Transient error: {0}")]
    Transient(String),

    /// 不可恢复的错误（认证失败、请求非法等）：立即切换模型
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl LlmError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }

    /// 根据错误文本归类（HTTP 429 / rate limit → RateLimited，认证类 → Fatal，其余 Transient）
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit") {
            LlmError::RateLimited(message)
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("invalid api key")
            || lower.contains("invalid_api_key")
            || lower.contains("authentication")
        {
            LlmError::Fatal(message)
        } else {
            LlmError::Transient(message)
        }
    }
}

/// 一次生成请求（临时对象，不持久化）
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    /// 期望输出字数（仅用于进度展示）
    pub target_length_hint: Option<usize>,
    pub stream: bool,
    /// 任务标签，写入生成指标
    pub task: String,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            target_length_hint: None,
            stream: false,
            task: "chat".to_string(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_target_length(mut self, target: usize) -> Self {
        self.target_length_hint = Some(target);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = task.into();
        self
    }

    /// 输入规模（字符数）
    pub fn input_chars(&self) -> usize {
        total_chars(&self.messages)
    }
}

/// LLM 客户端 trait：一次补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit() {
        assert!(LlmError::classify("HTTP 429 Too Many Requests").is_rate_limited());
        assert!(LlmError::classify("Rate limit reached for model").is_rate_limited());
    }

    #[test]
    fn test_classify_auth_is_fatal() {
        assert!(matches!(
            LlmError::classify("401 Unauthorized: invalid api key"),
            LlmError::Fatal(_)
        ));
    }

    #[test]
    fn test_classify_other_is_transient() {
        assert!(matches!(
            LlmError::classify("connection reset by peer"),
            LlmError::Transient(_)
        ));
    }

    #[test]
    fn test_request_builder() {
        let req = GenerationRequest::new(vec![Message::user("写一章")])
            .with_temperature(0.3)
            .with_target_length(2000)
            .with_task("write");
        assert_eq!(req.temperature, 0.3);
        assert_eq!(req.target_length_hint, Some(2000));
        assert_eq!(req.task, "write");
        assert_eq!(req.input_chars(), 3);
        assert!(!req.stream);
    }
}
