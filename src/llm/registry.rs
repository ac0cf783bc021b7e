//! 模型注册表：可用模型端点与回退链
//!
//! ModelProfile 加载后不可变，以 key 标识；FallbackChain 是模型 key 的有序序列，
//! 遍历按环形进行，但单次调度最多访问每个条目一次（见 dispatcher）。

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::config::LlmSection;

/// 单个模型端点
#[derive(Clone, PartialEq)]
pub struct ModelProfile {
    pub key: String,
    pub endpoint: Option<String>,
    pub credential: Option<String>,
    pub model_name: String,
    pub display_name: String,
    pub min_interval: Duration,
    pub supports_extended_reasoning: bool,
}

impl ModelProfile {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            model_name: key.clone(),
            display_name: key.clone(),
            key,
            endpoint: None,
            credential: None,
            min_interval: Duration::from_secs(1),
            supports_extended_reasoning: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_extended_reasoning(mut self, supported: bool) -> Self {
        self.supports_extended_reasoning = supported;
        self
    }
}

// 凭据不进日志
impl fmt::Debug for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelProfile")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("model_name", &self.model_name)
            .field("display_name", &self.display_name)
            .field("min_interval", &self.min_interval)
            .field("supports_extended_reasoning", &self.supports_extended_reasoning)
            .finish()
    }
}

/// 回退链：模型 key 的有序序列（假定无重复）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackChain {
    keys: Vec<String>,
}

impl FallbackChain {
    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }

    /// 当前 key 之后的下一个（环形）；当前 key 不在链中时返回链首
    pub fn next_after(&self, current: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        let next = match self.keys.iter().position(|k| k == current) {
            Some(idx) => (idx + 1) % self.keys.len(),
            None => 0,
        };
        Some(self.keys[next].as_str())
    }
}

/// 模型注册表：纯数据 + 访问器
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    profiles: BTreeMap<String, ModelProfile>,
    chain: FallbackChain,
}

impl ModelRegistry {
    pub fn new(profiles: impl IntoIterator<Item = ModelProfile>, chain: FallbackChain) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.key.clone(), p)).collect(),
            chain,
        }
    }

    /// 由 [llm] 配置解析：凭据优先取 api_key_env 指向的环境变量，其次明文 api_key；
    /// 回退顺序为空时按 key 字典序，顺序中引用了未注册的模型会被丢弃并告警。
    pub fn from_config(section: &LlmSection) -> Self {
        let profiles: Vec<ModelProfile> = section
            .models
            .iter()
            .map(|(key, entry)| {
                let credential = entry
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .or_else(|| entry.api_key.clone());
                ModelProfile {
                    key: key.clone(),
                    endpoint: entry.base_url.clone(),
                    credential,
                    model_name: entry.model_name.clone().unwrap_or_else(|| key.clone()),
                    display_name: entry.display_name.clone().unwrap_or_else(|| key.clone()),
                    min_interval: Duration::from_secs_f64(entry.min_interval_secs.max(0.0)),
                    supports_extended_reasoning: entry.supports_thinking,
                }
            })
            .collect();

        let order: Vec<String> = if section.fallback_order.is_empty() {
            section.models.keys().cloned().collect()
        } else {
            section
                .fallback_order
                .iter()
                .filter(|k| {
                    let known = section.models.contains_key(k.as_str());
                    if !known {
                        tracing::warn!("fallback_order references unknown model '{}', skipped", k);
                    }
                    known
                })
                .cloned()
                .collect()
        };

        Self::new(profiles, FallbackChain::new(order))
    }

    pub fn get(&self, key: &str) -> Option<&ModelProfile> {
        self.profiles.get(key)
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &ModelProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
