//! 上下文预算：决定何时压缩历史、保留多少章
//!
//! 规模估算 = 设定文本 + 滚动摘要 + 活动章节序列化后的字符数。
//! 纯函数，不调用模型；压缩本身由调用方完成（见 novel::agents::PacingAgent::compress_history）。

use crate::config::ContextSection;
use crate::memory::char_len;
use crate::store::{ChapterRecord, History};

/// 超过 max_chars 的该比例时保留数降到至少 2
const TIGHT_RATIO: f64 = 0.8;
/// 超过该比例时保留数降到至少 1
const CRITICAL_RATIO: f64 = 0.95;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextBudgetController {
    pub max_chars: usize,
    pub trigger_ratio: f64,
    pub default_keep: usize,
    /// 活动章节数达到该值即压缩，即使字数不多
    pub max_active_chapters: usize,
}

impl Default for ContextBudgetController {
    fn default() -> Self {
        Self {
            max_chars: 50_000,
            trigger_ratio: 0.8,
            default_keep: 5,
            max_active_chapters: 15,
        }
    }
}

/// 一次压缩的划分：evicted 并入滚动摘要，kept 成为新的活动窗口（保持原顺序）
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionPlan {
    pub evicted: Vec<ChapterRecord>,
    pub kept: Vec<ChapterRecord>,
    pub keep_count: usize,
    pub size_before: usize,
}

impl ContextBudgetController {
    pub fn from_config(section: &ContextSection) -> Self {
        Self {
            max_chars: section.max_chars,
            trigger_ratio: section.trigger_ratio,
            default_keep: section.default_keep,
            max_active_chapters: section.max_active_chapters,
        }
    }

    pub fn context_size(&self, settings_text: &str, history: &History) -> usize {
        char_len(settings_text)
            + char_len(&history.rolling_summary)
            + char_len(&history.serialized_chapters())
    }

    pub fn should_compress(&self, settings_text: &str, history: &History) -> bool {
        let size = self.context_size(settings_text, history) as f64;
        size > self.max_chars as f64 * self.trigger_ratio
            || history.chapters.len() >= self.max_active_chapters
    }

    /// 保留的最近章节数，至少为 1
    pub fn keep_count(&self, settings_text: &str, history: &History) -> usize {
        let size = self.context_size(settings_text, history) as f64;
        let max = self.max_chars as f64;
        let keep = if size > max * CRITICAL_RATIO {
            self.default_keep.saturating_sub(3).max(1)
        } else if size > max * TIGHT_RATIO {
            self.default_keep.saturating_sub(2).max(2)
        } else {
            self.default_keep
        };
        keep.max(1)
    }

    /// 需要压缩且确有章节可移出时给出划分
    pub fn plan(&self, settings_text: &str, history: &History) -> Option<CompressionPlan> {
        if !self.should_compress(settings_text, history) {
            return None;
        }
        let keep_count = self.keep_count(settings_text, history);
        if history.chapters.len() <= keep_count {
            return None;
        }
        let split = history.chapters.len() - keep_count;
        Some(CompressionPlan {
            evicted: history.chapters[..split].to_vec(),
            kept: history.chapters[split..].to_vec(),
            keep_count,
            size_before: self.context_size(settings_text, history),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(chapters: u32, summary_len: usize) -> History {
        History {
            rolling_summary: "前".repeat(summary_len),
            chapters: (1..=chapters)
                .map(|n| ChapterRecord::new(n, format!("第 {} 章", n)))
                .collect(),
        }
    }

    #[test]
    fn test_size_counts_chars_not_bytes() {
        let ctrl = ContextBudgetController::default();
        let h = history(0, 10);
        // "[]" 两个字符
        assert_eq!(ctrl.context_size("设定", &h), 2 + 10 + 2);
    }

    #[test]
    fn test_should_compress_by_size_or_count() {
        let ctrl = ContextBudgetController {
            max_chars: 1000,
            ..Default::default()
        };
        assert!(!ctrl.should_compress("", &history(3, 100)));
        assert!(ctrl.should_compress("", &history(3, 900)));
        assert!(ctrl.should_compress("", &history(15, 0)));
    }

    #[test]
    fn test_keep_count_shrinks_with_pressure() {
        let ctrl = ContextBudgetController {
            max_chars: 10_000,
            ..Default::default()
        };
        let h = history(0, 0);
        assert_eq!(ctrl.keep_count("", &h), 5);
        assert_eq!(ctrl.keep_count(&"设".repeat(8_500), &h), 3);
        assert_eq!(ctrl.keep_count(&"设".repeat(9_600), &h), 2);

        let tight = ContextBudgetController {
            max_chars: 10_000,
            default_keep: 2,
            ..Default::default()
        };
        assert_eq!(tight.keep_count(&"设".repeat(8_500), &h), 2);
        assert_eq!(tight.keep_count(&"设".repeat(9_600), &h), 1);
    }

    #[test]
    fn test_plan_never_empties_history() {
        let ctrl = ContextBudgetController {
            max_chars: 100,
            default_keep: 0,
            ..Default::default()
        };
        for n in 1..=20 {
            let h = history(n, 500);
            if let Some(plan) = ctrl.plan("设定", &h) {
                assert!(!plan.kept.is_empty());
                assert_eq!(plan.evicted.len() + plan.kept.len(), n as usize);
                assert_eq!(plan.kept.last().unwrap().chapter, n);
            }
        }
    }

    #[test]
    fn test_plan_keeps_tail_in_order() {
        let ctrl = ContextBudgetController::default();
        let h = history(16, 0);
        let plan = ctrl.plan("", &h).unwrap();
        assert_eq!(plan.keep_count, 5);
        let kept: Vec<u32> = plan.kept.iter().map(|c| c.chapter).collect();
        assert_eq!(kept, vec![12, 13, 14, 15, 16]);
        assert_eq!(plan.evicted.len(), 11);
    }
}
