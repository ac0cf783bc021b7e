//! 对话消息：发往模型的 role/content 轮次
//!
//! 生成请求由有序的 Message 组成；输入规模按字符数统计（中文按字计，与字数目标口径一致）。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// 内容字符数
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// 一组消息的总字符数（用于生成指标中的 input_chars）
pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_count).sum()
}

/// 文本字符数：长度目标、上下文预算统一使用此口径
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
