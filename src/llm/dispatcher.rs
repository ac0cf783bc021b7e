//! 模型调度器：限速 → 调用 → 限流退避重试 → 沿回退链切换模型
//!
//! 单次 dispatch 的最坏耗时可由配置算出：每个模型至多 max_attempts 次调用，
//! 每次限流等待不超过 cap，回退链中每个模型至多访问一次。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::RetrySection;
use crate::llm::{FallbackChain, GenerationRequest, LlmClient, LlmError, ModelRegistry, OpenAiClient, RateLimiter};
use crate::observability::Monitor;

/// 限流重试策略：同一模型最多 max_attempts 次，第 n 次失败后等待 min(unit * 2^n, cap)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub unit: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            unit: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(section: &RetrySection) -> Self {
        Self {
            max_attempts: section.max_attempts.max(1),
            unit: Duration::from_millis(section.backoff_unit_ms),
            cap: Duration::from_secs(section.backoff_cap_secs),
        }
    }

    /// 第 `attempt` 次（从 1 开始）限流失败后的等待时长；随 attempt 单调不减，且不超过 cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.unit
            .checked_mul(factor)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

/// 调用方角色：作者（写作）或审核
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    Author,
    Reviewer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Selection {
    author: String,
    reviewer: String,
}

/// 会话级的「当前作者/审核模型」选择。
///
/// 句柄可 clone，clone 之间共享同一选择；不同会话各自创建，互不干扰。
/// 回退切换时，若被放弃的模型正是某个角色的当前模型，该角色随之切到新模型。
#[derive(Debug, Clone)]
pub struct ActiveModels {
    inner: Arc<Mutex<Selection>>,
}

impl ActiveModels {
    pub fn new(author: impl Into<String>, reviewer: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Selection {
                author: author.into(),
                reviewer: reviewer.into(),
            })),
        }
    }

    pub fn get(&self, role: ModelRole) -> String {
        let sel = self.lock();
        match role {
            ModelRole::Author => sel.author.clone(),
            ModelRole::Reviewer => sel.reviewer.clone(),
        }
    }

    pub fn author(&self) -> String {
        self.get(ModelRole::Author)
    }

    pub fn reviewer(&self) -> String {
        self.get(ModelRole::Reviewer)
    }

    pub fn set(&self, role: ModelRole, key: impl Into<String>) {
        let mut sel = self.lock();
        match role {
            ModelRole::Author => sel.author = key.into(),
            ModelRole::Reviewer => sel.reviewer = key.into(),
        }
    }

    /// 将当前为 `old` 的角色切换到 `new`，返回受影响的角色
    pub fn replace(&self, old: &str, new: &str) -> Vec<ModelRole> {
        let mut sel = self.lock();
        let mut changed = Vec::new();
        if sel.author == old {
            sel.author = new.to_string();
            changed.push(ModelRole::Author);
        }
        if sel.reviewer == old {
            sel.reviewer = new.to_string();
            changed.push(ModelRole::Reviewer);
        }
        changed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Selection> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 调度失败：回退链已完整走过一遍
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("All models failed after {switches} switches ({attempts} calls, last model {last_model}): {last_error}")]
    Exhausted {
        switches: usize,
        attempts: usize,
        last_model: String,
        last_error: LlmError,
    },
}

impl DispatchError {
    pub fn switches(&self) -> usize {
        match self {
            DispatchError::Exhausted { switches, .. } => *switches,
        }
    }
}

/// 模型调度器：持有注册表、各模型客户端、限速器与监控
pub struct ModelDispatcher {
    registry: ModelRegistry,
    clients: HashMap<String, Arc<dyn LlmClient>>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    monitor: Monitor,
}

impl ModelDispatcher {
    /// 空调度器（无客户端），通过 with_client 注入
    pub fn new(registry: ModelRegistry, monitor: Monitor) -> Self {
        Self {
            registry,
            clients: HashMap::new(),
            limiter: RateLimiter::new(),
            retry: RetryPolicy::default(),
            monitor,
        }
    }

    /// 为注册表中每个模型创建 OpenAI 兼容客户端
    pub fn from_registry(
        registry: ModelRegistry,
        retry: RetryPolicy,
        monitor: Monitor,
        show_thinking: bool,
    ) -> Self {
        let clients = registry
            .profiles()
            .map(|p| {
                let client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_profile(p, show_thinking));
                (p.key.clone(), client)
            })
            .collect();
        Self {
            registry,
            clients,
            limiter: RateLimiter::new(),
            retry,
            monitor,
        }
    }

    pub fn with_client(mut self, key: impl Into<String>, client: Arc<dyn LlmClient>) -> Self {
        self.clients.insert(key.into(), client);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// 从 `start_key` 开始执行请求；失败时沿回退链切换，直到链被完整走过一遍。
    ///
    /// 每次切换都会写入 ModelSwitch 记录，并同步更新 `active` 中对应角色的选择。
    pub async fn dispatch(
        &self,
        request: &GenerationRequest,
        start_key: &str,
        active: Option<&ActiveModels>,
    ) -> Result<String, DispatchError> {
        let chain = self.registry.chain();
        let budget = chain.len().max(1);
        let mut current = start_key.to_string();
        let mut visited: Vec<String> = Vec::with_capacity(budget);
        let mut switches = 0usize;
        let mut attempts = 0usize;

        loop {
            visited.push(current.clone());
            let err = match self.try_model(&current, request, &mut attempts).await {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            let next = if visited.len() >= budget {
                None
            } else {
                next_unvisited(chain, &current, &visited)
            };
            let Some(next) = next else {
                tracing::error!(
                    "dispatch exhausted after {} switches, last model {}: {}",
                    switches,
                    current,
                    err
                );
                return Err(DispatchError::Exhausted {
                    switches,
                    attempts,
                    last_model: current,
                    last_error: err,
                });
            };

            let reason = if err.is_rate_limited() {
                format!("Rate limit exhausted: {}", err)
            } else {
                format!("API error: {}", err)
            };
            self.monitor.log_switch(&current, &next, &reason);
            if let Some(active) = active {
                let roles = active.replace(&current, &next);
                if !roles.is_empty() {
                    tracing::info!("active model for {:?} switched to {}", roles, next);
                }
            }
            switches += 1;
            current = next;
        }
    }

    /// 单个模型的尝试循环：限流错误退避重试，其它错误立即返回
    async fn try_model(
        &self,
        key: &str,
        request: &GenerationRequest,
        attempts: &mut usize,
    ) -> Result<String, LlmError> {
        let profile = self
            .registry
            .get(key)
            .ok_or_else(|| LlmError::Fatal(format!("model '{}' is not registered", key)))?;
        let client = self
            .clients
            .get(key)
            .ok_or_else(|| LlmError::Fatal(format!("no client for model '{}'", key)))?;

        let mut last_err = LlmError::Transient(format!("model '{}' was not called", key));
        for attempt in 1..=self.retry.max_attempts {
            self.limiter.wait(key, profile.min_interval).await;
            *attempts += 1;
            let started = Instant::now();
            let result = client.complete(request).await;
            self.monitor.log_generation(
                key,
                &request.task,
                request.input_chars(),
                result.as_ref().map_or(0, |text| text.chars().count()),
                started.elapsed(),
                result.is_ok(),
            );
            match result {
                Ok(text) => return Ok(text),
                Err(err @ LlmError::RateLimited(_)) => {
                    if attempt < self.retry.max_attempts {
                        let wait = self.retry.backoff(attempt);
                        self.monitor.log_rate_limit(key, wait, attempt);
                        tokio::time::sleep(wait).await;
                    }
                    last_err = err;
                }
                Err(err) => {
                    self.monitor.log_error(key, &err.to_string());
                    return Err(err);
                }
            }
        }
        Err(last_err)
    }

    /// 连通性测试：对单个模型发送最小请求，不重试、不回退
    pub async fn test_connection(&self, key: &str) -> Result<(), LlmError> {
        let client = self
            .clients
            .get(key)
            .ok_or_else(|| LlmError::Fatal(format!("no client for model '{}'", key)))?;
        let request = GenerationRequest::new(vec![crate::memory::Message::user("Hi")])
            .with_task("connectivity");
        client.complete(&request).await.map(|_| ())
    }
}

/// 从 current 之后沿环找第一个未访问的 key
fn next_unvisited(chain: &FallbackChain, current: &str, visited: &[String]) -> Option<String> {
    let mut candidate = chain.next_after(current)?;
    for _ in 0..chain.len() {
        if !visited.iter().any(|v| v == candidate) {
            return Some(candidate.to_string());
        }
        candidate = chain.next_after(candidate)?;
    }
    None
}

/// 调度器 + 会话级模型选择：按角色发起请求
#[derive(Clone)]
pub struct ModelSession {
    dispatcher: Arc<ModelDispatcher>,
    active: ActiveModels,
}

impl ModelSession {
    pub fn new(dispatcher: Arc<ModelDispatcher>, active: ActiveModels) -> Self {
        Self { dispatcher, active }
    }

    pub fn active(&self) -> &ActiveModels {
        &self.active
    }

    pub fn dispatcher(&self) -> &ModelDispatcher {
        &self.dispatcher
    }

    pub async fn chat(
        &self,
        role: ModelRole,
        request: &GenerationRequest,
    ) -> Result<String, DispatchError> {
        let start = self.active.get(role);
        self.dispatcher
            .dispatch(request, &start, Some(&self.active))
            .await
    }

    pub async fn chat_author(&self, request: &GenerationRequest) -> Result<String, DispatchError> {
        self.chat(ModelRole::Author, request).await
    }

    pub async fn chat_reviewer(&self, request: &GenerationRequest) -> Result<String, DispatchError> {
        self.chat(ModelRole::Reviewer, request).await
    }

    /// 手动选择某角色的模型；未注册的 key 返回 false
    pub fn select(&self, role: ModelRole, key: &str) -> bool {
        if self.dispatcher.registry().get(key).is_none() {
            return false;
        }
        let old = self.active.get(role);
        self.active.set(role, key);
        self.dispatcher
            .monitor()
            .log_switch(&old, key, "Manual/Config Change");
        true
    }
}
