//! Mock LLM 客户端（用于测试与离线试跑，无需 API）
//!
//! - MockLlmClient：回显最后一条 User 消息
//! - ScriptedLlmClient：按预设顺序返回结果（成功文本或指定类型的失败），并记录收到的每个请求

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::llm::{GenerationRequest, LlmClient, LlmError};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }
}

/// 脚本化客户端：依次弹出预设结果；脚本耗尽后返回 `exhausted` 结果
#[derive(Debug, Clone)]
pub struct ScriptedLlmClient {
    script: Arc<Mutex<VecDeque<Result<String, LlmError>>>>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
    exhausted: Result<String, LlmError>,
}

impl ScriptedLlmClient {
    pub fn new(script: impl IntoIterator<Item = Result<String, LlmError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            requests: Arc::new(Mutex::new(Vec::new())),
            exhausted: Err(LlmError::Transient("script exhausted".to_string())),
        }
    }

    /// 总是成功返回同一段文本
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(Vec::new()).when_exhausted(Ok(text.into()))
    }

    /// 总是以同一错误失败
    pub fn failing(err: LlmError) -> Self {
        Self::new(Vec::new()).when_exhausted(Err(err))
    }

    pub fn when_exhausted(mut self, outcome: Result<String, LlmError>) -> Self {
        self.exhausted = outcome;
        self
    }

    /// 追加一条脚本结果
    pub fn push(&self, outcome: Result<String, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    /// 已收到的请求数
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 已收到的请求（按顺序）
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| self.exhausted.clone())
    }
}
