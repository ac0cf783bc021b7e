//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；DeepSeek、通义、豆包等均走此路径。
//! 流式模式下逐块累积 delta.content，推理模型输出的 `<think>…</think>` 段落不计入正文。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::llm::{GenerationRequest, LlmClient, LlmError, ModelProfile};
use crate::memory::{Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
    }

    /// (prompt, completion, total)
    pub fn get(&self) -> (u64, u64, u64) {
        let p = self.prompt_tokens.load(Ordering::Relaxed);
        let c = self.completion_tokens.load(Ordering::Relaxed);
        (p, c, p + c)
    }
}

/// OpenAI 兼容客户端：一个实例对应注册表中的一个模型
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 流式输出时是否把推理段落写入 debug 日志
    show_thinking: bool,
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            show_thinking: false,
            usage: TokenUsage::default(),
        }
    }

    /// 推理段落只在全局开关打开且模型支持推理时输出
    pub fn from_profile(profile: &ModelProfile, show_thinking: bool) -> Self {
        Self::new(
            profile.endpoint.as_deref(),
            &profile.model_name,
            profile.credential.as_deref(),
        )
        .with_show_thinking(show_thinking && profile.supports_extended_reasoning)
    }

    pub fn with_show_thinking(mut self, show: bool) -> Self {
        self.show_thinking = show;
        self
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn to_openai_messages(
        &self,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let build_err = |e: async_openai::error::OpenAIError| LlmError::Fatal(e.to_string());
        messages
            .iter()
            .map(|m| {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(build_err)?,
                    ),
                })
            })
            .collect()
    }

    async fn complete_once(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let body = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(&request.messages)?)
            .temperature(request.temperature)
            .build()
            .map_err(|e| LlmError::Fatal(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(body)
            .await
            .map_err(|e| LlmError::classify(e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        Ok(strip_thinking(&content))
    }

    async fn complete_streamed(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let body = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(&request.messages)?)
            .temperature(request.temperature)
            .stream(true)
            .build()
            .map_err(|e| LlmError::Fatal(e.to_string()))?;

        let mut stream = self
            .client
            .chat()
            .create_stream(body)
            .await
            .map_err(|e| LlmError::classify(e.to_string()))?;

        let mut raw = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::classify(e.to_string()))?;
            for choice in &chunk.choices {
                if let Some(delta) = &choice.delta.content {
                    raw.push_str(delta);
                }
            }
            if let Some(target) = request.target_length_hint {
                tracing::trace!("streaming {}: {}/{} chars", self.model, raw.chars().count(), target);
            }
        }

        if self.show_thinking {
            for segment in thinking_segments(&raw) {
                tracing::debug!("[{} thinking] {}", self.model, segment);
            }
        }
        Ok(strip_thinking(&raw))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        if request.stream {
            self.complete_streamed(request).await
        } else {
            self.complete_once(request).await
        }
    }
}

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// 去掉 `<think>…</think>` 段落；未闭合的开标签之后全部视为推理内容
pub fn strip_thinking(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + THINK_OPEN.len()..];
        match after.find(THINK_CLOSE) {
            Some(end) => rest = &after[end + THINK_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

fn thinking_segments(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(THINK_OPEN) {
        let after = &rest[start + THINK_OPEN.len()..];
        match after.find(THINK_CLOSE) {
            Some(end) => {
                segments.push(after[..end].trim());
                rest = &after[end + THINK_CLOSE.len()..];
            }
            None => {
                segments.push(after.trim());
                break;
            }
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_thinking_removes_segments() {
        let raw = "<think>先构思情节</think>\n第1章 风起\n正文<think>再想想</think>结尾";
        assert_eq!(strip_thinking(raw), "第1章 风起\n正文结尾");
    }

    #[test]
    fn test_strip_thinking_unclosed_tag() {
        assert_eq!(strip_thinking("正文<think>没写完"), "正文");
        assert_eq!(strip_thinking("无推理"), "无推理");
    }

    #[test]
    fn test_thinking_segments() {
        let segs = thinking_segments("<think> a </think>x<think>b");
        assert_eq!(segs, vec!["a", "b"]);
    }

    #[test]
    fn test_from_profile_uses_model_name() {
        let profile = ModelProfile::new("ds")
            .with_model_name("deepseek-chat")
            .with_endpoint("http://localhost:1")
            .with_credential("sk-test");
        let client = OpenAiClient::from_profile(&profile, true);
        assert_eq!(client.model, "deepseek-chat");
        assert_eq!(client.token_usage(), (0, 0, 0));
    }
}
