//! 写作会话：一次只处理一章（压缩 → 简报 → 写作 → 修订闸门 → 落盘），按运行模式决定何时停下

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::config::AppConfig;
use crate::core::NovelError;
use crate::llm::ModelSession;
use crate::memory::{char_len, ContextBudgetController};
use crate::novel::agents::{ChapterContext, ChapterSummary, PacingAgent, ReviewAgent, WriterAgent};
use crate::novel::events::{emit, EventSender, NovelEvent};
use crate::novel::pacing::{is_volume_end, PacingStatus, RunMode};
use crate::novel::prompts::Prompts;
use crate::novel::revision::{GateMode, RevisionController, RevisionOutcome, RevisionPolicy};
use crate::novel::supervisor::Supervisor;
use crate::store::StateStore;

/// 写作时带给模型的最近章节数
const RECENT_CHAPTERS: usize = 3;
const MAX_TITLE_CHARS: usize = 50;

/// 一章的结局
#[derive(Debug, Clone, PartialEq)]
pub enum ChapterStep {
    Accepted {
        chapter: u32,
        title: Option<String>,
        path: PathBuf,
        score: f64,
    },
    Abandoned { chapter: u32 },
    /// 已写满全书章节数
    BookComplete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub written: u32,
    pub reason: String,
}

pub struct WritingSession {
    store: Arc<StateStore>,
    writer: Arc<WriterAgent>,
    reviewer: Arc<ReviewAgent>,
    pacing: PacingAgent,
    budget: ContextBudgetController,
    policy: RevisionPolicy,
    supervisor: Arc<dyn Supervisor>,
    events: Option<EventSender>,
    life_event_probability: f64,
}

impl WritingSession {
    pub fn new(
        models: ModelSession,
        store: Arc<StateStore>,
        supervisor: Arc<dyn Supervisor>,
        prompts: Prompts,
    ) -> Self {
        let prompts = Arc::new(prompts);
        Self {
            store,
            writer: Arc::new(WriterAgent::new(models.clone(), prompts.clone())),
            reviewer: Arc::new(ReviewAgent::new(models.clone(), prompts.clone())),
            pacing: PacingAgent::new(models, prompts),
            budget: ContextBudgetController::default(),
            policy: RevisionPolicy::default(),
            supervisor,
            events: None,
            life_event_probability: 0.05,
        }
    }

    /// 上下文预算、修订策略与生活事件概率取自配置
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.budget = ContextBudgetController::from_config(&config.context);
        self.policy = RevisionPolicy::from_config(&config.revision);
        self.life_event_probability = config.store.life_event_probability;
        self
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// 按模式连续写章，直到满足停止条件
    pub async fn run(&self, mode: RunMode) -> Result<RunReport, NovelError> {
        let mut written = 0u32;
        let reason = loop {
            if let RunMode::Count(n) = mode {
                if written >= n {
                    break format!("wrote {} chapters", n);
                }
            }
            let step = match self.write_next_chapter(mode).await {
                Ok(step) => step,
                Err(e) => {
                    emit(&self.events, NovelEvent::Error { text: e.to_string() });
                    emit(
                        &self.events,
                        NovelEvent::Finished {
                            written,
                            reason: e.to_string(),
                        },
                    );
                    return Err(e);
                }
            };
            match step {
                ChapterStep::BookComplete => break "book complete".to_string(),
                ChapterStep::Abandoned { chapter } => {
                    if !mode.is_manual() {
                        break format!("chapter {} abandoned", chapter);
                    }
                    if !self.supervisor.confirm("本章已放弃，是否继续写下一章？").await {
                        break "stopped by user".to_string();
                    }
                }
                ChapterStep::Accepted { chapter, .. } => {
                    written += 1;
                    if mode == RunMode::Volume {
                        let setting = self.store.setting().await?;
                        if is_volume_end(chapter, &setting) {
                            break format!("volume ends at chapter {}", chapter);
                        }
                    }
                    if mode.is_manual() && !self.supervisor.confirm("继续写下一章？").await {
                        break "stopped by user".to_string();
                    }
                }
            }
        };
        tracing::info!("writing session finished: {} chapters, {}", written, reason);
        emit(
            &self.events,
            NovelEvent::Finished {
                written,
                reason: reason.clone(),
            },
        );
        Ok(RunReport { written, reason })
    }

    /// 写下一章（上一章号 + 1）
    pub async fn write_next_chapter(&self, mode: RunMode) -> Result<ChapterStep, NovelError> {
        let setting = self.store.setting().await?;
        let history = self.store.history().await?;
        let completed = history.last_chapter_number();
        let chapter = completed + 1;
        let status = PacingStatus::compute(chapter, &setting);

        if matches!(mode, RunMode::Complete | RunMode::Volume)
            && completed as usize >= status.total_chapters
        {
            return Ok(ChapterStep::BookComplete);
        }

        emit(
            &self.events,
            NovelEvent::ChapterStarted {
                chapter,
                total: status.total_chapters,
                stage: status.stage.label().to_string(),
                progress: status.progress,
            },
        );

        let settings_text = self.store.setting_digest().await?;
        if let Some(plan) = self
            .pacing
            .compress_history(&self.store, &self.budget, &settings_text)
            .await?
        {
            emit(
                &self.events,
                NovelEvent::HistoryCompressed {
                    evicted: plan.evicted.len(),
                    kept: plan.kept.len(),
                },
            );
        }
        let history = self.store.history().await?;
        let author = self.store.author().await?;

        emit(&self.events, NovelEvent::Status { text: format!("第 {} 章：生成创作简报", chapter) });
        let brief = self
            .pacing
            .brief(chapter, &settings_text, &history, &status)
            .await?;

        let target_words = setting.chapter_words;
        let recent_start = history.chapters.len().saturating_sub(RECENT_CHAPTERS);
        let ctx = ChapterContext {
            settings_text,
            rolling_summary: history.rolling_summary.clone(),
            recent_chapters: history.chapters[recent_start..].to_vec(),
            brief,
            persona: author.persona.clone(),
            target_words,
        };
        let draft = self.writer.write_chapter(chapter, &ctx).await?;
        emit(
            &self.events,
            NovelEvent::Drafted {
                chapter,
                chars: char_len(&draft),
                target: target_words,
            },
        );

        let gate = if mode.is_manual() {
            GateMode::Manual
        } else {
            GateMode::Automatic
        };
        let controller = RevisionController::new(
            self.writer.clone(),
            self.reviewer.clone(),
            self.supervisor.clone(),
        )
        .with_policy(self.policy.clone())
        .with_events(self.events.clone());
        let outcome = match controller
            .produce_chapter(chapter, draft, target_words, gate)
            .await?
        {
            RevisionOutcome::Accepted(outcome) => outcome,
            RevisionOutcome::Abandoned { reviews } => {
                for review in &reviews {
                    self.store.append_review(review).await?;
                }
                tracing::info!(
                    "chapter {} abandoned, {} reviews logged, text discarded",
                    chapter,
                    reviews.len()
                );
                return Ok(ChapterStep::Abandoned { chapter });
            }
        };

        let title = extract_title(&outcome.text);
        let path = self
            .store
            .save_chapter_text(chapter, &outcome.text, title.as_deref())
            .await?;
        // 正文已落盘，摘要失败也要写历史，否则下次会重写同一章
        let summary = match self.reviewer.summarize(chapter, &outcome.text).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("chapter {}: summary failed, using placeholder: {}", chapter, e);
                ChapterSummary::unparsed()
            }
        };
        self.store
            .append_chapter(&summary.into_record(chapter, title.as_deref()))
            .await?;
        for review in &outcome.reviews {
            self.store.append_review(review).await?;
        }
        emit(
            &self.events,
            NovelEvent::ChapterAccepted {
                chapter,
                title: title.clone().unwrap_or_default(),
                score: outcome.review.score,
                chars: char_len(&outcome.text),
            },
        );

        self.evolve_author().await;

        Ok(ChapterStep::Accepted {
            chapter,
            title,
            path,
            score: outcome.review.score,
        })
    }

    /// 章节已落盘后的作者演化；失败只记日志，不影响本章结果
    async fn evolve_author(&self) {
        match self.pacing.evolve_author_style(&self.store).await {
            Ok(Some(style)) => emit(
                &self.events,
                NovelEvent::StyleEvolved {
                    preview: style.chars().take(50).collect(),
                },
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!("author style evolution skipped: {}", e),
        }
        match self
            .pacing
            .check_life_event(&self.store, self.life_event_probability)
            .await
        {
            Ok(Some(event)) => emit(
                &self.events,
                NovelEvent::LifeEvent {
                    event: event.event,
                    effect: event.effect,
                },
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!("life event check skipped: {}", e),
        }
    }
}

fn chapter_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"第\s*\d+\s*章\s*(.*)").expect("valid regex"))
}

/// 从正文首行提取标题：「第 N 章 标题」取标题部分，否则首行不足 50 字时整行作标题
pub fn extract_title(text: &str) -> Option<String> {
    let first = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let first = first.trim_matches(|c| c == '#' || c == '*').trim();
    if let Some(caps) = chapter_heading().captures(first) {
        let title = caps.get(1).map_or("", |m| m.as_str()).trim();
        return (!title.is_empty()).then(|| title.to_string());
    }
    (char_len(first) < MAX_TITLE_CHARS && !first.is_empty()).then(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_title_from_heading() {
        assert_eq!(extract_title("第 3 章 夜雨\n正文").as_deref(), Some("夜雨"));
        assert_eq!(extract_title("## 第12章  风起\n正文").as_deref(), Some("风起"));
        assert_eq!(extract_title("第3章\n正文"), None);
    }

    #[test]
    fn test_extract_title_from_short_first_line() {
        assert_eq!(extract_title("\n\n山门\n正文").as_deref(), Some("山门"));
        let long = "长".repeat(60);
        assert_eq!(extract_title(&long), None);
        assert_eq!(extract_title(""), None);
    }
}
