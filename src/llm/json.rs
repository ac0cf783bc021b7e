//! 从模型输出中提取 JSON：优先 ```json 代码块，其次首个 `{` 到末个 `}` 之间的片段

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;

static FENCED_RE: OnceLock<Regex> = OnceLock::new();

fn fenced_block() -> &'static Regex {
    FENCED_RE.get_or_init(|| Regex::new(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```").expect("valid regex"))
}

/// 提取最可能是 JSON 的文本片段（不保证可解析）
pub fn extract_json(text: &str) -> &str {
    if let Some(inner) = fenced_block().captures(text).and_then(|c| c.get(1)) {
        return inner.as_str();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

/// 宽松解析为 JSON 值；失败返回 None
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    let candidate = extract_json(text);
    match serde_json::from_str(candidate) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::debug!("lenient json parse failed: {}", e);
            None
        }
    }
}

/// 宽松解析为具体类型
pub fn parse_json_as<T: DeserializeOwned>(text: &str) -> Option<T> {
    parse_json_lenient(text).and_then(|v| serde_json::from_value(v).ok())
}
