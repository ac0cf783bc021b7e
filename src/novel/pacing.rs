//! 节奏与运行模式
//!
//! 全书章节数的来源优先级：pacing_guide.total_chapters → config.chapter_limit →
//! 结构列表（最后一项的 chapter_end，或平铺列表的长度）→ 总字数 / 每章字数。结果至少为 5。

use serde::Serialize;

use crate::store::{PacingGuide, SettingView};

const MIN_TOTAL_CHAPTERS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    Development,
    Climax,
    Ending,
}

impl Stage {
    fn from_progress(progress: f64) -> Self {
        if progress < 0.2 {
            Stage::Setup
        } else if progress < 0.5 {
            Stage::Development
        } else if progress < 0.8 {
            Stage::Climax
        } else {
            Stage::Ending
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Setup => "铺垫期",
            Stage::Development => "发展期",
            Stage::Climax => "高潮期",
            Stage::Ending => "收尾期",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacingStatus {
    pub current_chapter: u32,
    pub total_chapters: usize,
    pub remaining: usize,
    pub progress: f64,
    pub stage: Stage,
}

impl PacingStatus {
    pub fn compute(current_chapter: u32, setting: &SettingView) -> Self {
        let total = total_chapters(setting);
        let current = current_chapter as usize;
        let progress = current as f64 / total as f64;
        Self {
            current_chapter,
            total_chapters: total,
            remaining: total.saturating_sub(current),
            progress,
            stage: Stage::from_progress(progress),
        }
    }

    /// 给简报用的一段节奏说明
    pub fn describe(&self) -> String {
        format!(
            "当前第 {} 章，预计共 {} 章，剩余 {} 章，进度 {:.0}%，处于{}。",
            self.current_chapter,
            self.total_chapters,
            self.remaining,
            self.progress * 100.0,
            self.stage.label()
        )
    }
}

pub fn total_chapters(setting: &SettingView) -> usize {
    let from_words = || {
        (setting.total_words_wan * 10_000.0 / setting.chapter_words.max(1) as f64) as usize
    };
    let from_guide = setting.pacing.as_ref().and_then(|guide| {
        guide.total_chapters().or_else(|| {
            if setting.chapter_limit.is_some() {
                None
            } else {
                structure_total(guide)
            }
        })
    });
    from_guide
        .or(setting.chapter_limit)
        .unwrap_or_else(from_words)
        .max(MIN_TOTAL_CHAPTERS)
}

fn structure_total(guide: &PacingGuide) -> Option<usize> {
    let structure = guide.structure();
    if let Some(end) = structure.last().and_then(|e| e.chapter_end) {
        return Some(end);
    }
    match guide {
        PacingGuide::Flat(items) if items.iter().any(|e| e.chapter_id.is_some()) => {
            Some(items.len())
        }
        _ => None,
    }
}

/// 刚写完的章节是否为一卷的结尾
///
/// 有任何带 chapter_end 的结构项时，只认精确匹配；
/// 结构里没有分卷信息（无结构，或只有 chapter_id 的平铺列表）时，以全书完结作为卷末。
pub fn is_volume_end(chapter: u32, setting: &SettingView) -> bool {
    let structure = setting
        .pacing
        .as_ref()
        .map(PacingGuide::structure)
        .unwrap_or_default();
    let ends: Vec<usize> = structure.iter().filter_map(|e| e.chapter_end).collect();
    if !ends.is_empty() {
        return ends.contains(&(chapter as usize));
    }
    chapter as usize >= total_chapters(setting)
}

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// 每章人工审阅与确认
    Manual,
    /// 自动写 n 章
    Count(u32),
    /// 自动写到全书完结
    Complete,
    /// 自动写到当前卷结束
    Volume,
}

impl RunMode {
    pub fn is_manual(self) -> bool {
        matches!(self, RunMode::Manual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(doc: serde_json::Value) -> SettingView {
        SettingView::from_document(&doc)
    }

    #[test]
    fn test_total_from_words() {
        let s = view(json!({"chapter_words": 2000}));
        assert_eq!(total_chapters(&s), 100);
    }

    #[test]
    fn test_total_precedence() {
        let s = view(json!({"config": {"chapter_limit": 30}}));
        assert_eq!(total_chapters(&s), 30);

        let s = view(json!({
            "config": {"chapter_limit": 30},
            "pacing_guide": {"total_chapters": 40, "structure": []}
        }));
        assert_eq!(total_chapters(&s), 40);

        let s = view(json!({
            "pacing_guide": {"structure": [
                {"name": "第一卷", "chapter_start": 1, "chapter_end": 12},
                {"name": "第二卷", "chapter_start": 13, "chapter_end": 24}
            ]}
        }));
        assert_eq!(total_chapters(&s), 24);

        let s = view(json!({"pacing_guide": [{"chapter_id": 1}, {"chapter_id": 2}, {"chapter_id": 3}]}));
        assert_eq!(total_chapters(&s), MIN_TOTAL_CHAPTERS);
    }

    #[test]
    fn test_stage_boundaries() {
        let s = view(json!({"config": {"chapter_limit": 10}}));
        assert_eq!(PacingStatus::compute(1, &s).stage, Stage::Setup);
        assert_eq!(PacingStatus::compute(2, &s).stage, Stage::Development);
        assert_eq!(PacingStatus::compute(5, &s).stage, Stage::Climax);
        assert_eq!(PacingStatus::compute(8, &s).stage, Stage::Ending);
        assert_eq!(PacingStatus::compute(12, &s).remaining, 0);
    }

    #[test]
    fn test_volume_end_prefers_explicit_chapter_end() {
        let s = view(json!({
            "pacing_guide": {"structure": [
                {"chapter_start": 1, "chapter_end": 6},
                {"chapter_start": 7, "chapter_end": 20}
            ]}
        }));
        assert!(is_volume_end(6, &s));
        assert!(!is_volume_end(7, &s));
        assert!(is_volume_end(20, &s));
    }

    #[test]
    fn test_volume_end_without_volumes_means_book_end() {
        let s = view(json!({"config": {"chapter_limit": 8}}));
        assert!(!is_volume_end(7, &s));
        assert!(is_volume_end(8, &s));
    }
}
