//! 生成监控：模型切换、生成指标、限流等待、错误
//!
//! 每条记录既作为 tracing 事件输出（target = `inkstone::monitor`），也按完成顺序追加到内存日志，
//! 供调用方与测试读取快照。Monitor 可 clone，多个组件共享同一份日志。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

/// 单条监控记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorRecord {
    /// 一次成功或失败的生成
    Generation {
        model: String,
        task: String,
        input_chars: usize,
        output_chars: usize,
        duration_ms: u128,
        success: bool,
    },
    /// 模型切换（回退或手动选择）
    ModelSwitch {
        from: String,
        to: String,
        reason: String,
    },
    /// 触发限流后的退避等待
    RateLimit {
        model: String,
        wait_ms: u128,
        retry: u32,
    },
    /// 模型调用错误
    Error { model: String, message: String },
}

/// 监控器：线程安全的有序日志
#[derive(Debug, Clone, Default)]
pub struct Monitor {
    records: Arc<Mutex<Vec<MonitorRecord>>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_generation(
        &self,
        model: &str,
        task: &str,
        input_chars: usize,
        output_chars: usize,
        duration: Duration,
        success: bool,
    ) {
        tracing::info!(
            target: "inkstone::monitor",
            model,
            task,
            input_chars,
            output_chars,
            duration_ms = duration.as_millis() as u64,
            success,
            "generation"
        );
        self.push(MonitorRecord::Generation {
            model: model.to_string(),
            task: task.to_string(),
            input_chars,
            output_chars,
            duration_ms: duration.as_millis(),
            success,
        });
    }

    pub fn log_switch(&self, from: &str, to: &str, reason: &str) {
        tracing::warn!(target: "inkstone::monitor", from, to, reason, "model switch");
        self.push(MonitorRecord::ModelSwitch {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn log_rate_limit(&self, model: &str, wait: Duration, retry: u32) {
        tracing::warn!(
            target: "inkstone::monitor",
            model,
            wait_ms = wait.as_millis() as u64,
            retry,
            "rate limited"
        );
        self.push(MonitorRecord::RateLimit {
            model: model.to_string(),
            wait_ms: wait.as_millis(),
            retry,
        });
    }

    pub fn log_error(&self, model: &str, message: &str) {
        tracing::error!(target: "inkstone::monitor", model, message, "model error");
        self.push(MonitorRecord::Error {
            model: model.to_string(),
            message: message.to_string(),
        });
    }

    /// 当前所有记录（按完成顺序）
    pub fn snapshot(&self) -> Vec<MonitorRecord> {
        self.lock().clone()
    }

    /// 模型切换记录
    pub fn switches(&self) -> Vec<(String, String, String)> {
        self.lock()
            .iter()
            .filter_map(|r| match r {
                MonitorRecord::ModelSwitch { from, to, reason } => {
                    Some((from.clone(), to.clone(), reason.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn push(&self, record: MonitorRecord) {
        self.lock().push(record);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MonitorRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_keep_completion_order() {
        let monitor = Monitor::new();
        monitor.log_rate_limit("a", Duration::from_secs(2), 1);
        monitor.log_switch("a", "b", "rate limit exhausted");
        monitor.log_generation("b", "chat", 10, 20, Duration::from_millis(5), true);

        let records = monitor.snapshot();
        assert_eq!(records.len(), 3);
        assert!(matches!(records[0], MonitorRecord::RateLimit { .. }));
        assert!(matches!(records[1], MonitorRecord::ModelSwitch { .. }));
        assert!(matches!(records[2], MonitorRecord::Generation { .. }));
    }

    #[test]
    fn test_clones_share_journal() {
        let monitor = Monitor::new();
        let other = monitor.clone();
        other.log_switch("x", "y", "manual");
        assert_eq!(monitor.switches(), vec![("x".into(), "y".into(), "manual".into())]);
    }
}
