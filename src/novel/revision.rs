//! 单章修订控制：字数约束循环 + 审核门槛循环
//!
//! 字数循环：长度低于下限则扩写、高于上限则精简，最多重试 max_length_retries 次，
//! 用完后接受当前文本（尽力而为，不阻塞）。
//!
//! 审核循环：每轮送审得到分数与通过标志。
//! - 自动模式：分数 ≥ auto_threshold 且通过即接受；否则按审核建议自动精修，最多 auto_revisions 次，
//!   之后由 Supervisor 决定人工干预（转入人工流程，不再受自动门槛约束）、放弃或上报。
//! - 人工模式：分数 ≥ manual_threshold、通过且人工最终确认即接受；未达标或最终确认被拒时，
//!   再问一次是否满意当前版本，不满意则收集意见（为空时用审核建议）修改后重审。
//!   尝试次数用完仍要修改时，同样交给 Supervisor 决定。
//!
//! 放弃的章节不产出正文，但每次审核的记录照常交给调用方留档。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::RevisionSection;
use crate::core::NovelError;
use crate::llm::DispatchError;
use crate::memory::char_len;
use crate::novel::events::{emit, EventSender, NovelEvent};
use crate::novel::supervisor::{GateDecision, Supervisor};
use crate::store::views::{lenient_f64, string_or_list};
use crate::store::ReviewRecord;

/// 审核结果（模型返回的 JSON，宽松解析）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: f64,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub comments: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub suggestions: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ReviewResult {
    pub fn new(score: f64, passed: bool) -> Self {
        Self {
            score,
            passed,
            comments: String::new(),
            suggestions: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions = suggestions.into_iter().map(Into::into).collect();
        self
    }

    /// 审核输出无法解析时的占位结果
    pub fn unparsed() -> Self {
        Self {
            comments: "Error parsing review".to_string(),
            ..Self::new(0.0, false)
        }
    }

    pub fn to_record(&self, chapter: u32, attempt: u32, mode: &str) -> ReviewRecord {
        ReviewRecord {
            chapter,
            attempt,
            score: self.score,
            passed: self.passed,
            timestamp: chrono::Utc::now().timestamp(),
            comments: self.comments.clone(),
            suggestions: self.suggestions.clone(),
            auto_mode: Some(mode.to_string()),
            extra: self.extra.clone(),
        }
    }
}

/// 修改意见来源
#[derive(Debug, Clone, PartialEq)]
pub enum Feedback {
    /// 审核给出的建议
    Suggestions(Vec<String>),
    /// 人工输入
    Human(String),
}

impl Feedback {
    fn from_review(review: &ReviewResult) -> Self {
        if review.suggestions.is_empty() {
            Feedback::Suggestions(vec!["优化剧情".to_string()])
        } else {
            Feedback::Suggestions(review.suggestions.clone())
        }
    }

    /// 写进提示词的文本
    pub fn render(&self) -> String {
        match self {
            Feedback::Suggestions(items) => serde_json::to_string(items).unwrap_or_default(),
            Feedback::Human(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthAdjustment {
    Expand,
    Condense,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    Automatic,
    Manual,
}

impl GateMode {
    fn label(self) -> &'static str {
        match self {
            GateMode::Automatic => "auto",
            GateMode::Manual => "manual",
        }
    }
}

/// 扩写 / 精简
#[async_trait]
pub trait ChapterDrafter: Send + Sync {
    async fn adjust_length(
        &self,
        text: &str,
        target_words: usize,
        adjustment: LengthAdjustment,
    ) -> Result<String, DispatchError>;
}

/// 审核 / 按意见修改
#[async_trait]
pub trait ChapterReviewer: Send + Sync {
    async fn review(&self, chapter: u32, text: &str) -> Result<ReviewResult, DispatchError>;

    async fn revise(
        &self,
        text: &str,
        feedback: &Feedback,
        target_words: usize,
    ) -> Result<String, DispatchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevisionPolicy {
    pub max_length_retries: u32,
    pub max_review_attempts: u32,
    pub auto_revisions: u32,
    pub auto_threshold: f64,
    pub manual_threshold: f64,
    pub lower_ratio: f64,
    pub upper_ratio: f64,
}

impl Default for RevisionPolicy {
    fn default() -> Self {
        Self::from_config(&RevisionSection::default())
    }
}

impl RevisionPolicy {
    pub fn from_config(section: &RevisionSection) -> Self {
        Self {
            max_length_retries: section.max_length_retries as u32,
            max_review_attempts: section.max_review_attempts.max(1) as u32,
            auto_revisions: section.auto_revisions as u32,
            auto_threshold: section.auto_threshold,
            manual_threshold: section.manual_threshold,
            lower_ratio: section.lower_ratio,
            upper_ratio: section.upper_ratio,
        }
    }

    /// 允许的字数区间（含端点）
    pub fn length_bounds(&self, target_words: usize) -> (usize, usize) {
        (
            (target_words as f64 * self.lower_ratio) as usize,
            (target_words as f64 * self.upper_ratio) as usize,
        )
    }
}

/// 被接受的一章
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterOutcome {
    pub text: String,
    /// 最后一次审核
    pub review: ReviewResult,
    /// 本章每次审核的记录（按尝试顺序）
    pub reviews: Vec<ReviewRecord>,
    /// 按意见修改的次数
    pub revisions: u32,
    /// 未达门槛而由人工放行
    pub manual_override: bool,
}

/// 一章修订的结局
#[derive(Debug, Clone, PartialEq)]
pub enum RevisionOutcome {
    Accepted(ChapterOutcome),
    /// 调用方不得落盘正文；审核记录仍需留档
    Abandoned { reviews: Vec<ReviewRecord> },
}

impl RevisionOutcome {
    pub fn accepted(self) -> Option<ChapterOutcome> {
        match self {
            RevisionOutcome::Accepted(outcome) => Some(outcome),
            RevisionOutcome::Abandoned { .. } => None,
        }
    }

    /// 本章每次审核的记录（按尝试顺序）
    pub fn reviews(&self) -> &[ReviewRecord] {
        match self {
            RevisionOutcome::Accepted(outcome) => &outcome.reviews,
            RevisionOutcome::Abandoned { reviews } => reviews,
        }
    }
}

pub struct RevisionController {
    drafter: Arc<dyn ChapterDrafter>,
    reviewer: Arc<dyn ChapterReviewer>,
    supervisor: Arc<dyn Supervisor>,
    policy: RevisionPolicy,
    events: Option<EventSender>,
}

impl RevisionController {
    pub fn new(
        drafter: Arc<dyn ChapterDrafter>,
        reviewer: Arc<dyn ChapterReviewer>,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Self {
            drafter,
            reviewer,
            supervisor,
            policy: RevisionPolicy::default(),
            events: None,
        }
    }

    pub fn with_policy(mut self, policy: RevisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    pub fn policy(&self) -> &RevisionPolicy {
        &self.policy
    }

    /// 字数约束循环；返回最终文本与实际重试次数
    pub async fn enforce_length(
        &self,
        chapter: u32,
        text: String,
        target_words: usize,
    ) -> Result<(String, u32), DispatchError> {
        let (lower, upper) = self.policy.length_bounds(target_words);
        let mut text = text;
        let mut retries = 0u32;
        loop {
            let len = char_len(&text);
            let adjustment = if len < lower {
                LengthAdjustment::Expand
            } else if len > upper {
                LengthAdjustment::Condense
            } else {
                return Ok((text, retries));
            };
            if retries >= self.policy.max_length_retries {
                tracing::info!(
                    "chapter {}: length {} still outside [{}, {}] after {} retries, accepting",
                    chapter,
                    len,
                    lower,
                    upper,
                    retries
                );
                return Ok((text, retries));
            }
            retries += 1;
            let next = self
                .drafter
                .adjust_length(&text, target_words, adjustment)
                .await?;
            emit(
                &self.events,
                NovelEvent::LengthAdjusted {
                    chapter,
                    retry: retries,
                    expand: adjustment == LengthAdjustment::Expand,
                    before: len,
                    after: char_len(&next),
                },
            );
            text = next;
        }
    }

    /// 产出一章：接受或放弃
    pub async fn produce_chapter(
        &self,
        chapter: u32,
        initial_text: String,
        target_words: usize,
        mode: GateMode,
    ) -> Result<RevisionOutcome, NovelError> {
        let (mut text, _) = self.enforce_length(chapter, initial_text, target_words).await?;
        let mut reviews = Vec::new();
        let mut attempt = 0u32;
        let mut revisions = 0u32;
        let mut auto_revisions = 0u32;
        let mut intervened = false;

        loop {
            attempt += 1;
            let review = self.reviewer.review(chapter, &text).await?;
            reviews.push(review.to_record(chapter, attempt, mode.label()));
            emit(
                &self.events,
                NovelEvent::Reviewed {
                    chapter,
                    attempt,
                    score: review.score,
                    passed: review.passed,
                    comments: review.comments.clone(),
                },
            );

            if mode == GateMode::Automatic && !intervened {
                if review.passed && review.score >= self.policy.auto_threshold {
                    return Ok(RevisionOutcome::Accepted(ChapterOutcome {
                        text,
                        review,
                        reviews,
                        revisions,
                        manual_override: false,
                    }));
                }
                if auto_revisions < self.policy.auto_revisions
                    && attempt < self.policy.max_review_attempts
                {
                    auto_revisions += 1;
                    text = self
                        .revise(chapter, attempt, &text, Feedback::from_review(&review), target_words)
                        .await?;
                    revisions += 1;
                    continue;
                }
                match self.gate_exhausted(chapter, attempt).await? {
                    GateDecision::Intervene => intervened = true,
                    _ => return Ok(RevisionOutcome::Abandoned { reviews }),
                }
            }

            // 人工流程（人工模式，或自动模式下转入人工干预）
            let gate_passed = review.passed && review.score >= self.policy.manual_threshold;
            let confirmed =
                gate_passed && self.supervisor.confirm("AI 审核通过，用户最终确认？").await;
            if confirmed
                || self
                    .supervisor
                    .confirm("是否满意当前版本？(No 进入修改流程)")
                    .await
            {
                return Ok(RevisionOutcome::Accepted(ChapterOutcome {
                    text,
                    review,
                    reviews,
                    revisions,
                    manual_override: !gate_passed,
                }));
            }

            if attempt >= self.policy.max_review_attempts {
                match self.gate_exhausted(chapter, attempt).await? {
                    GateDecision::Intervene => {}
                    _ => return Ok(RevisionOutcome::Abandoned { reviews }),
                }
            }

            let feedback = self
                .supervisor
                .feedback("请输入修改意见 (直接回车尝试 AI 自动精修)")
                .await
                .filter(|f| !f.trim().is_empty())
                .map(Feedback::Human)
                .unwrap_or_else(|| Feedback::from_review(&review));
            text = self
                .revise(chapter, attempt, &text, feedback, target_words)
                .await?;
            revisions += 1;
        }
    }

    async fn revise(
        &self,
        chapter: u32,
        attempt: u32,
        text: &str,
        feedback: Feedback,
        target_words: usize,
    ) -> Result<String, DispatchError> {
        let human_feedback = matches!(feedback, Feedback::Human(_));
        let revised = self.reviewer.revise(text, &feedback, target_words).await?;
        emit(
            &self.events,
            NovelEvent::Revised {
                chapter,
                attempt,
                human_feedback,
            },
        );
        let (revised, _) = self.enforce_length(chapter, revised, target_words).await?;
        Ok(revised)
    }

    /// 门槛用尽：Intervene / Abandon 返回给循环，Escalate 变成错误
    async fn gate_exhausted(&self, chapter: u32, attempts: u32) -> Result<GateDecision, NovelError> {
        emit(&self.events, NovelEvent::GateExhausted { chapter, attempts });
        let decision = self.supervisor.on_gate_exhausted(chapter, attempts).await;
        match decision {
            GateDecision::Escalate => Err(NovelError::QualityGateExhausted { chapter, attempts }),
            GateDecision::Abandon => {
                emit(&self.events, NovelEvent::ChapterAbandoned { chapter });
                Ok(decision)
            }
            GateDecision::Intervene => Ok(decision),
        }
    }
}
