//! 按模型 key 限速：保证同一模型两次出站请求之间至少间隔 min_interval
//!
//! 每个 key 只保存「下一次允许发出请求的时刻」。计算等待时长与预占时间槽在同一把锁内完成，
//! 随后在锁外 sleep，因此并发调度不同 key（或同一 key）时各自的时间戳不会互相覆盖。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct RateLimiter {
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 阻塞（异步挂起）直到该 key 的最小间隔已满足，返回实际等待时长
    pub async fn wait(&self, key: &str, min_interval: Duration) -> Duration {
        let now = Instant::now();
        let start_at = {
            let mut slots = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let start_at = match slots.get(key) {
                Some(&allowed) if allowed > now => allowed,
                _ => now,
            };
            slots.insert(key.to_string(), start_at + min_interval);
            start_at
        };

        let waited = start_at.saturating_duration_since(now);
        if !waited.is_zero() {
            tracing::debug!("rate limiter: waiting {:?} before calling {}", waited, key);
            tokio::time::sleep_until(start_at).await;
        }
        waited
    }
}
