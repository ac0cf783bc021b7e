//! 三个模型角色：写手、审核、主编（节奏）
//!
//! 写手与主编走作者模型，审核与摘要走审核模型；全部经由 ModelSession，
//! 因此限流、重试与回退对这里透明。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::core::NovelError;
use crate::llm::{parse_json_as, DispatchError, GenerationRequest, ModelSession};
use crate::memory::{CompressionPlan, ContextBudgetController, Message};
use crate::novel::pacing::PacingStatus;
use crate::novel::prompts::{render, Prompts};
use crate::novel::revision::{
    ChapterDrafter, ChapterReviewer, Feedback, LengthAdjustment, ReviewResult,
};
use crate::store::views::string_or_list;
use crate::store::{ChapterRecord, EntityKind, EvolutionEvent, History, StateStore};

const AUTHOR_TEMPERATURE: f32 = 0.7;
const REVIEW_TEMPERATURE: f32 = 0.3;

/// 写一章所需的上下文
#[derive(Debug, Clone, Default)]
pub struct ChapterContext {
    pub settings_text: String,
    pub rolling_summary: String,
    pub recent_chapters: Vec<ChapterRecord>,
    pub brief: String,
    pub persona: String,
    pub target_words: usize,
}

impl ChapterContext {
    fn render_user(&self, chapter: u32) -> String {
        let recent = self
            .recent_chapters
            .iter()
            .map(|c| format!("{}：{}", c.title, c.summary))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "【设定】\n{}\n\n【前情提要】\n{}\n\n【最近章节】\n{}\n\n【创作简报】\n{}\n\n请写第 {} 章。",
            self.settings_text,
            if self.rolling_summary.is_empty() { "无" } else { self.rolling_summary.as_str() },
            if recent.is_empty() { "无".to_string() } else { recent },
            self.brief,
            chapter
        )
    }
}

pub struct WriterAgent {
    session: ModelSession,
    prompts: Arc<Prompts>,
}

impl WriterAgent {
    pub fn new(session: ModelSession, prompts: Arc<Prompts>) -> Self {
        Self { session, prompts }
    }

    pub async fn write_chapter(
        &self,
        chapter: u32,
        ctx: &ChapterContext,
    ) -> Result<String, DispatchError> {
        let target = ctx.target_words.to_string();
        let mut system = render(&self.prompts.chapter, &[("target_words", &target)]);
        if !ctx.persona.is_empty() {
            system.push_str("\n\n作者风格：");
            system.push_str(&ctx.persona);
        }
        let request = GenerationRequest::new(vec![
            Message::system(system),
            Message::user(ctx.render_user(chapter)),
        ])
        .with_temperature(AUTHOR_TEMPERATURE)
        .with_target_length(ctx.target_words)
        .with_stream(true)
        .with_task("write_chapter");
        self.session.chat_author(&request).await
    }
}

#[async_trait]
impl ChapterDrafter for WriterAgent {
    async fn adjust_length(
        &self,
        text: &str,
        target_words: usize,
        adjustment: LengthAdjustment,
    ) -> Result<String, DispatchError> {
        let (template, task) = match adjustment {
            LengthAdjustment::Expand => (&self.prompts.expand, "expand"),
            LengthAdjustment::Condense => (&self.prompts.condense, "condense"),
        };
        let target = target_words.to_string();
        let prompt = render(template, &[("content", text), ("target_words", &target)]);
        let request = GenerationRequest::new(vec![Message::user(prompt)])
            .with_temperature(AUTHOR_TEMPERATURE)
            .with_target_length(target_words)
            .with_stream(true)
            .with_task(task);
        self.session.chat_author(&request).await
    }
}

/// 章节索引（摘要模型的输出）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChapterSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub key_events: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub foreshadowing: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub items_acquired: Vec<String>,
    #[serde(default, deserialize_with = "crate::store::views::lenient_f64")]
    pub plot_progression_score: f64,
}

impl ChapterSummary {
    pub fn unparsed() -> Self {
        Self {
            summary: "解析失败".to_string(),
            key_events: Vec::new(),
            foreshadowing: Vec::new(),
            items_acquired: Vec::new(),
            plot_progression_score: 0.0,
        }
    }

    /// 转成历史记录；标题为「第 N 章 标题」
    pub fn into_record(self, chapter: u32, title: Option<&str>) -> ChapterRecord {
        let title = match title {
            Some(t) => format!("第 {} 章 {}", chapter, t),
            None => format!("第 {} 章", chapter),
        };
        let mut record = ChapterRecord::new(chapter, title);
        record.summary = self.summary;
        record.key_events = self.key_events;
        record.score = self.plot_progression_score;
        record
            .extra
            .insert("foreshadowing".into(), json!(self.foreshadowing));
        record
            .extra
            .insert("items_acquired".into(), json!(self.items_acquired));
        record
    }
}

pub struct ReviewAgent {
    session: ModelSession,
    prompts: Arc<Prompts>,
}

impl ReviewAgent {
    pub fn new(session: ModelSession, prompts: Arc<Prompts>) -> Self {
        Self { session, prompts }
    }

    pub async fn summarize(&self, chapter: u32, text: &str) -> Result<ChapterSummary, DispatchError> {
        let request = GenerationRequest::new(vec![
            Message::system(self.prompts.summary.clone()),
            Message::user(format!("第 {} 章正文：\n{}", chapter, text)),
        ])
        .with_temperature(REVIEW_TEMPERATURE)
        .with_task("summarize");
        let raw = self.session.chat_reviewer(&request).await?;
        Ok(parse_json_as(&raw).unwrap_or_else(|| {
            tracing::warn!("chapter {}: summary output is not valid JSON", chapter);
            ChapterSummary::unparsed()
        }))
    }
}

#[async_trait]
impl ChapterReviewer for ReviewAgent {
    async fn review(&self, chapter: u32, text: &str) -> Result<ReviewResult, DispatchError> {
        let request = GenerationRequest::new(vec![
            Message::system(self.prompts.review.clone()),
            Message::user(format!("第 {} 章正文：\n{}", chapter, text)),
        ])
        .with_temperature(REVIEW_TEMPERATURE)
        .with_task("review");
        let raw = self.session.chat_reviewer(&request).await?;
        Ok(parse_json_as(&raw).unwrap_or_else(|| {
            tracing::warn!("chapter {}: review output is not valid JSON", chapter);
            ReviewResult::unparsed()
        }))
    }

    /// 修改是写作，走作者模型
    async fn revise(
        &self,
        text: &str,
        feedback: &Feedback,
        target_words: usize,
    ) -> Result<String, DispatchError> {
        let request = GenerationRequest::new(vec![
            Message::system(self.prompts.revise.clone()),
            Message::user(format!(
                "原文：\n{}\n\n意见：\n{}\n\n目标字数：{}",
                text,
                feedback.render(),
                target_words
            )),
        ])
        .with_temperature(AUTHOR_TEMPERATURE)
        .with_target_length(target_words)
        .with_stream(true)
        .with_task("revise");
        self.session.chat_author(&request).await
    }
}

#[derive(Debug, Deserialize)]
struct LifeEventReply {
    #[serde(default)]
    event: String,
    #[serde(default)]
    effect: String,
}

/// 主编：简报、历史压缩、作者风格演化与生活事件
pub struct PacingAgent {
    session: ModelSession,
    prompts: Arc<Prompts>,
}

impl PacingAgent {
    pub fn new(session: ModelSession, prompts: Arc<Prompts>) -> Self {
        Self { session, prompts }
    }

    pub async fn brief(
        &self,
        chapter: u32,
        settings_text: &str,
        history: &History,
        status: &PacingStatus,
    ) -> Result<String, DispatchError> {
        let request = GenerationRequest::new(vec![
            Message::system(self.prompts.brief.clone()),
            Message::user(format!(
                "【设定】\n{}\n\n【前情提要】\n{}\n\n【最近章节】\n{}\n\n【节奏】\n{}\n\n请为第 {} 章写创作简报。",
                settings_text,
                history.rolling_summary,
                history.serialized_chapters(),
                status.describe(),
                chapter
            )),
        ])
        .with_temperature(AUTHOR_TEMPERATURE)
        .with_task("brief");
        self.session.chat_author(&request).await
    }

    /// 按预算压缩历史：移出的章节并入滚动摘要，活动窗口只留最近 keep_count 章
    pub async fn compress_history(
        &self,
        store: &StateStore,
        budget: &ContextBudgetController,
        settings_text: &str,
    ) -> Result<Option<CompressionPlan>, NovelError> {
        let history = store.history().await?;
        let Some(plan) = budget.plan(settings_text, &history) else {
            return Ok(None);
        };
        let evicted = serde_json::to_string(&plan.evicted).map_err(crate::core::StoreError::from)?;
        let request = GenerationRequest::new(vec![
            Message::system(self.prompts.compression.clone()),
            Message::user(format!(
                "【已有历史背景】\n{}\n\n【待压缩章节】\n{}",
                history.rolling_summary, evicted
            )),
        ])
        .with_temperature(REVIEW_TEMPERATURE)
        .with_task("compress_history");
        let summary = self.session.chat_author(&request).await?;
        let summary = if summary.trim().is_empty() {
            // 模型没给出内容时退回拼接，保证移出的章节不丢
            fold_summaries(&history.rolling_summary, &plan.evicted)
        } else {
            summary.trim().to_string()
        };
        store.replace_active_window(&summary, &plan.kept).await?;
        tracing::info!(
            "history compressed: {} chapters folded, {} kept (size {})",
            plan.evicted.len(),
            plan.kept.len(),
            plan.size_before
        );
        Ok(Some(plan))
    }

    /// 根据最近 3 章摘要更新作者风格描述，返回新的描述；还没有章节或模型没给出内容时不改动
    pub async fn evolve_author_style(&self, store: &StateStore) -> Result<Option<String>, NovelError> {
        let history = store.history().await?;
        if history.chapters.is_empty() {
            return Ok(None);
        }
        let author = store.author().await?;
        let recent = history
            .chapters
            .iter()
            .rev()
            .take(3)
            .rev()
            .map(|c| format!("{}：{}", c.title, c.summary))
            .collect::<Vec<_>>()
            .join("\n");
        let request = GenerationRequest::new(vec![
            Message::system(self.prompts.style.clone()),
            Message::user(format!(
                "【当前风格】\n{}\n\n【最近章节】\n{}",
                author.persona, recent
            )),
        ])
        .with_temperature(AUTHOR_TEMPERATURE)
        .with_task("evolve_style");
        let style = self.session.chat_author(&request).await?.trim().to_string();
        if style.is_empty() {
            tracing::warn!("style evolution returned nothing, keeping current persona");
            return Ok(None);
        }
        store
            .update(
                EntityKind::AuthorProfile,
                json!({"style_analysis": {"description_style": style}}),
            )
            .await?;
        Ok(Some(style))
    }

    /// 生活事件：开关打开且掷骰命中时生成并记入演化日志
    pub async fn check_life_event(
        &self,
        store: &StateStore,
        probability: f64,
    ) -> Result<Option<EvolutionEvent>, NovelError> {
        let author = store.author().await?;
        if !author.enable_life_events {
            return Ok(None);
        }
        let roll: f64 = rand::random();
        if roll >= probability {
            return Ok(None);
        }
        let request = GenerationRequest::new(vec![Message::user(self.prompts.life_event.clone())])
            .with_temperature(AUTHOR_TEMPERATURE)
            .with_task("life_event");
        let raw = self.session.chat_author(&request).await?;
        let Some(reply) = parse_json_as::<LifeEventReply>(&raw).filter(|r| !r.event.is_empty())
        else {
            tracing::warn!("life event output is not valid JSON, skipped");
            return Ok(None);
        };
        let event = EvolutionEvent {
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            event: reply.event,
            effect: reply.effect,
            extra: Default::default(),
        };
        store.append_evolution_event(&event).await?;
        Ok(Some(event))
    }
}

fn fold_summaries(previous: &str, evicted: &[ChapterRecord]) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !previous.trim().is_empty() {
        parts.push(previous.trim().to_string());
    }
    parts.extend(
        evicted
            .iter()
            .map(|c| format!("{}：{}", c.title, c.summary)),
    );
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::llm::{
        ActiveModels, FallbackChain, LlmClient, ModelDispatcher, ModelProfile, ModelRegistry,
        ScriptedLlmClient,
    };
    use crate::observability::Monitor;
    use crate::store::NoRepair;

    fn session_with(client: ScriptedLlmClient) -> ModelSession {
        let registry = ModelRegistry::new(
            [ModelProfile::new("m").with_min_interval(Duration::ZERO)],
            FallbackChain::new(["m"]),
        );
        let client: Arc<dyn LlmClient> = Arc::new(client);
        let dispatcher = ModelDispatcher::new(registry, Monitor::new()).with_client("m", client);
        ModelSession::new(Arc::new(dispatcher), ActiveModels::new("m", "m"))
    }

    fn prompts() -> Arc<Prompts> {
        Arc::new(Prompts::default())
    }

    #[tokio::test]
    async fn test_review_parses_fenced_json() {
        let client = ScriptedLlmClient::always(
            "```json\n{\"score\": 91, \"passed\": true, \"comments\": \"好\", \"suggestions\": []}\n```",
        );
        let agent = ReviewAgent::new(session_with(client.clone()), prompts());
        let r = agent.review(1, "正文").await.unwrap();
        assert_eq!(r.score, 91.0);
        assert!(r.passed);
        assert_eq!(client.requests()[0].task, "review");
    }

    #[tokio::test]
    async fn test_review_unparseable_defaults_to_failure() {
        let agent = ReviewAgent::new(session_with(ScriptedLlmClient::always("不错")), prompts());
        let r = agent.review(1, "正文").await.unwrap();
        assert_eq!(r, ReviewResult::unparsed());
    }

    #[tokio::test]
    async fn test_summary_into_record() {
        let client = ScriptedLlmClient::always(
            r#"{"summary": "主角入门", "key_events": "拜师", "foreshadowing": ["玉佩"], "plot_progression_score": 7}"#,
        );
        let agent = ReviewAgent::new(session_with(client), prompts());
        let record = agent
            .summarize(3, "正文")
            .await
            .unwrap()
            .into_record(3, Some("拜师"));
        assert_eq!(record.title, "第 3 章 拜师");
        assert_eq!(record.key_events, vec!["拜师".to_string()]);
        assert_eq!(record.score, 7.0);
        assert_eq!(record.extra["foreshadowing"], json!(["玉佩"]));
    }

    #[tokio::test]
    async fn test_adjust_length_renders_content() {
        let client = ScriptedLlmClient::always("扩写后");
        let agent = WriterAgent::new(session_with(client.clone()), prompts());
        agent
            .adjust_length("短文", 2000, LengthAdjustment::Expand)
            .await
            .unwrap();
        let req = &client.requests()[0];
        assert_eq!(req.task, "expand");
        assert!(req.messages[0].content.contains("短文"));
        assert!(req.messages[0].content.contains("2000"));
    }

    #[tokio::test]
    async fn test_compress_history_keeps_tail() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), Arc::new(NoRepair));
        for n in 1..=6 {
            let mut c = ChapterRecord::new(n, format!("第 {} 章", n));
            c.summary = format!("摘要{}", n);
            store.append_chapter(&c).await.unwrap();
        }
        let client = ScriptedLlmClient::always("合并后的梗概");
        let agent = PacingAgent::new(session_with(client), prompts());
        let budget = ContextBudgetController {
            max_active_chapters: 6,
            ..Default::default()
        };
        let plan = agent
            .compress_history(&store, &budget, "设定")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(plan.evicted.len(), 1);
        let history = store.history().await.unwrap();
        assert_eq!(history.rolling_summary, "合并后的梗概");
        assert_eq!(
            history.chapters.iter().map(|c| c.chapter).collect::<Vec<_>>(),
            vec![2, 3, 4, 5, 6]
        );
    }

    #[tokio::test]
    async fn test_compress_history_folds_when_model_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), Arc::new(NoRepair));
        for n in 1..=3 {
            let mut c = ChapterRecord::new(n, format!("第 {} 章", n));
            c.summary = format!("摘要{}", n);
            store.append_chapter(&c).await.unwrap();
        }
        let agent = PacingAgent::new(session_with(ScriptedLlmClient::always("  ")), prompts());
        let budget = ContextBudgetController {
            max_active_chapters: 3,
            default_keep: 1,
            ..Default::default()
        };
        agent
            .compress_history(&store, &budget, "")
            .await
            .unwrap()
            .unwrap();
        let history = store.history().await.unwrap();
        assert_eq!(history.chapters.len(), 1);
        assert!(history.rolling_summary.contains("摘要1"));
        assert!(history.rolling_summary.contains("摘要2"));
    }

    #[tokio::test]
    async fn test_no_compression_under_budget() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), Arc::new(NoRepair));
        store.append_chapter(&ChapterRecord::new(1, "第 1 章")).await.unwrap();
        let client = ScriptedLlmClient::always("x");
        let agent = PacingAgent::new(session_with(client.clone()), prompts());
        let plan = agent
            .compress_history(&store, &ContextBudgetController::default(), "设定")
            .await
            .unwrap();
        assert!(plan.is_none());
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_evolve_style_updates_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), Arc::new(NoRepair));
        store.append_chapter(&ChapterRecord::new(1, "第 1 章")).await.unwrap();
        let agent = PacingAgent::new(session_with(ScriptedLlmClient::always("冷峻克制")), prompts());
        let style = agent.evolve_author_style(&store).await.unwrap();
        assert_eq!(style.as_deref(), Some("冷峻克制"));
        assert_eq!(store.author().await.unwrap().persona, "冷峻克制");
    }

    #[tokio::test]
    async fn test_evolve_style_skips_without_chapters() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), Arc::new(NoRepair));
        let client = ScriptedLlmClient::always("冷峻克制");
        let agent = PacingAgent::new(session_with(client.clone()), prompts());
        assert_eq!(agent.evolve_author_style(&store).await.unwrap(), None);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_evolve_style_keeps_persona_on_blank_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), Arc::new(NoRepair));
        store.append_chapter(&ChapterRecord::new(1, "第 1 章")).await.unwrap();
        store
            .update(
                EntityKind::AuthorProfile,
                json!({"style_analysis": {"description_style": "白描"}}),
            )
            .await
            .unwrap();
        let agent = PacingAgent::new(session_with(ScriptedLlmClient::always(" \n ")), prompts());
        assert_eq!(agent.evolve_author_style(&store).await.unwrap(), None);
        assert_eq!(store.author().await.unwrap().persona, "白描");
    }

    #[tokio::test]
    async fn test_life_event_respects_toggle_and_probability() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path(), Arc::new(NoRepair));
        let client = ScriptedLlmClient::always(r#"{"event": "搬家", "effect": "更新变慢"}"#);
        let agent = PacingAgent::new(session_with(client.clone()), prompts());

        // 默认关闭
        assert!(agent.check_life_event(&store, 1.0).await.unwrap().is_none());
        store
            .update(EntityKind::AuthorProfile, json!({"config": {"enable_life_events": true}}))
            .await
            .unwrap();
        assert!(agent.check_life_event(&store, 0.0).await.unwrap().is_none());
        assert_eq!(client.call_count(), 0);

        let event = agent.check_life_event(&store, 1.0).await.unwrap().unwrap();
        assert_eq!(event.event, "搬家");
        assert_eq!(store.author().await.unwrap().evolution.len(), 1);
    }
}
