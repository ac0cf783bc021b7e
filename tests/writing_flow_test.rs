//! 写作流程集成测试：脚本化模型 + 临时项目目录

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use inkstone::llm::{
    ActiveModels, FallbackChain, LlmClient, LlmError, ModelDispatcher, ModelProfile,
    ModelRegistry, ModelSession, ScriptedLlmClient,
};
use inkstone::novel::{
    AutoSupervisor, NovelEvent, Prompts, RunMode, ScriptedSupervisor, Supervisor, WritingSession,
};
use inkstone::observability::Monitor;
use inkstone::store::{DispatcherRepairOracle, EntityKind, NoRepair, StateStore};

fn models(writer: ScriptedLlmClient, critic: ScriptedLlmClient) -> ModelSession {
    let registry = ModelRegistry::new(
        ["writer", "critic"]
            .into_iter()
            .map(|k| ModelProfile::new(k).with_min_interval(Duration::ZERO)),
        FallbackChain::new(["writer", "critic"]),
    );
    let writer: Arc<dyn LlmClient> = Arc::new(writer);
    let critic: Arc<dyn LlmClient> = Arc::new(critic);
    let dispatcher = ModelDispatcher::new(registry, Monitor::new())
        .with_client("writer", writer)
        .with_client("critic", critic);
    ModelSession::new(Arc::new(dispatcher), ActiveModels::new("writer", "critic"))
}

/// 约 100 字的一章
fn chapter_text(n: u32, title: &str) -> String {
    format!("第{}章 {}\n{}", n, title, "山".repeat(90))
}

fn project(dir: &std::path::Path) -> Arc<StateStore> {
    std::fs::write(
        dir.join("setting.json"),
        serde_json::to_string(&json!({
            "meta": {"title": "青云志"},
            "chapter_words": 100,
            "world_setting": {"power_system": "修真九境"}
        }))
        .unwrap(),
    )
    .unwrap();
    Arc::new(StateStore::new(dir, Arc::new(NoRepair)))
}

fn ok(text: impl Into<String>) -> Result<String, LlmError> {
    Ok(text.into())
}

const PASSING_REVIEW: &str = r#"{"score": 90, "passed": true, "comments": "节奏紧凑", "suggestions": []}"#;

fn summary(text: &str) -> String {
    json!({"summary": text, "key_events": [text], "plot_progression_score": 6}).to_string()
}

#[tokio::test]
async fn test_count_mode_writes_and_persists_chapters() {
    let dir = tempfile::tempdir().unwrap();
    let store = project(dir.path());
    let writer = ScriptedLlmClient::new([
        ok("简报一"),
        ok(chapter_text(1, "初入青云")),
        ok("文风清冷"),
        ok("简报二"),
        ok(chapter_text(2, "拜师")),
        ok("文风渐暖"),
    ]);
    let critic = ScriptedLlmClient::new([
        ok(PASSING_REVIEW),
        ok(summary("少年上山")),
        ok(PASSING_REVIEW),
        ok(summary("拜入门下")),
    ]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = WritingSession::new(
        models(writer.clone(), critic.clone()),
        store.clone(),
        Arc::new(AutoSupervisor::default()),
        Prompts::default(),
    )
    .with_events(tx);

    let report = session.run(RunMode::Count(2)).await.unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(writer.call_count(), 6);
    assert_eq!(critic.call_count(), 4);

    assert!(dir.path().join("chapters/第1章_初入青云.txt").exists());
    assert!(dir.path().join("chapters/第2章_拜师.txt").exists());

    let history = store.history().await.unwrap();
    let titles: Vec<_> = history.chapters.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["第 1 章 初入青云", "第 2 章 拜师"]);
    assert_eq!(history.chapters[1].summary, "拜入门下");

    let reviews = store.reviews().await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert!(reviews.iter().all(|r| r.passed && r.score == 90.0));

    assert_eq!(store.author().await.unwrap().persona, "文风渐暖");

    drop(session);
    let mut accepted = 0;
    let mut last = None;
    while let Some(ev) = rx.recv().await {
        if matches!(ev, NovelEvent::ChapterAccepted { .. }) {
            accepted += 1;
        }
        last = Some(ev);
    }
    assert_eq!(accepted, 2);
    assert!(matches!(last, Some(NovelEvent::Finished { written: 2, .. })));
}

#[tokio::test]
async fn test_abandoned_chapter_keeps_reviews_but_not_text() {
    let dir = tempfile::tempdir().unwrap();
    let store = project(dir.path());
    let writer = ScriptedLlmClient::always(chapter_text(1, "残稿"));
    let critic = ScriptedLlmClient::always(r#"{"score": 50, "passed": false, "suggestions": ["重写"]}"#);
    let session = WritingSession::new(
        models(writer.clone(), critic.clone()),
        store.clone(),
        Arc::new(AutoSupervisor::default()),
        Prompts::default(),
    );

    let report = session.run(RunMode::Complete).await.unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(report.reason, "chapter 1 abandoned");
    // 简报 + 初稿 + 两次自动精修
    assert_eq!(writer.call_count(), 4);
    assert_eq!(critic.call_count(), 3);

    assert!(!dir.path().join("chapters/第1章_残稿.txt").exists());
    assert!(store.history().await.unwrap().chapters.is_empty());
    let reviews = store.reviews().await.unwrap();
    assert_eq!(reviews.iter().map(|r| r.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(reviews.iter().all(|r| r.chapter == 1 && !r.passed));
}

#[tokio::test]
async fn test_summary_failure_still_records_accepted_chapter() {
    let dir = tempfile::tempdir().unwrap();
    let store = project(dir.path());
    // 审核之后两个模型都不可用
    let writer = ScriptedLlmClient::new([ok("简报"), ok(chapter_text(1, "夜雨"))]);
    let critic = ScriptedLlmClient::new([ok(PASSING_REVIEW)]);
    let session = WritingSession::new(
        models(writer, critic),
        store.clone(),
        Arc::new(AutoSupervisor::default()),
        Prompts::default(),
    );

    let report = session.run(RunMode::Count(1)).await.unwrap();
    assert_eq!(report.written, 1);
    assert!(dir.path().join("chapters/第1章_夜雨.txt").exists());

    let history = store.history().await.unwrap();
    assert_eq!(history.chapters.len(), 1);
    assert_eq!(history.chapters[0].chapter, 1);
    assert_eq!(history.chapters[0].title, "第 1 章 夜雨");
    assert_eq!(history.chapters[0].summary, "解析失败");
    assert_eq!(history.last_chapter_number(), 1);
    assert_eq!(store.reviews().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failing_author_model_falls_back_for_whole_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = project(dir.path());
    let writer = ScriptedLlmClient::failing(LlmError::Transient("connection reset".into()));
    let critic = ScriptedLlmClient::new([
        ok("简报"),
        ok(chapter_text(1, "夜行")),
        ok(PASSING_REVIEW),
        ok(summary("夜里赶路")),
        ok("文风冷硬"),
    ]);
    let models = models(writer.clone(), critic.clone());
    let session = WritingSession::new(
        models.clone(),
        store.clone(),
        Arc::new(AutoSupervisor::default()),
        Prompts::default(),
    );

    let report = session.run(RunMode::Count(1)).await.unwrap();
    assert_eq!(report.written, 1);
    // 只在第一次请求时试过 writer，之后作者角色已切到 critic
    assert_eq!(writer.call_count(), 1);
    assert_eq!(models.active().author(), "critic");
    let switches = models.dispatcher().monitor().switches();
    assert_eq!(switches.len(), 1);
    assert_eq!((switches[0].0.as_str(), switches[0].1.as_str()), ("writer", "critic"));
}

#[tokio::test]
async fn test_manual_mode_accepts_confirmed_chapter_without_revision() {
    let dir = tempfile::tempdir().unwrap();
    let store = project(dir.path());
    let writer = ScriptedLlmClient::new([ok("简报"), ok(chapter_text(1, "雪夜")), ok("文风")]);
    let critic = ScriptedLlmClient::new([
        ok(r#"{"score": 92, "passed": true, "comments": "好"}"#),
        ok(summary("雪夜相逢")),
    ]);
    let supervisor = Arc::new(ScriptedSupervisor::new().with_confirms([true, false]));
    let session = WritingSession::new(
        models(writer.clone(), critic),
        store.clone(),
        supervisor.clone() as Arc<dyn Supervisor>,
        Prompts::default(),
    );

    let report = session.run(RunMode::Manual).await.unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(report.reason, "stopped by user");
    // 没有修改请求：简报、初稿、风格各一次
    assert_eq!(writer.call_count(), 3);
    assert!(writer.requests().iter().all(|r| r.task != "revise"));
    assert_eq!(supervisor.prompts().len(), 2);

    let reviews = store.reviews().await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].auto_mode.as_deref(), Some("manual"));
}

#[tokio::test]
async fn test_missing_setting_is_created_once_by_model_skeleton() {
    let dir = tempfile::tempdir().unwrap();
    let client = ScriptedLlmClient::always(
        "```json\n{\"meta\": {\"title\": \"星海\"}, \"chapter_words\": 3000}\n```",
    );
    let models = models(client.clone(), ScriptedLlmClient::always("{}"));
    let store = StateStore::new(dir.path(), Arc::new(DispatcherRepairOracle::new(models)));

    let first = store.get(EntityKind::Setting).await.unwrap();
    assert_eq!(first["meta"]["title"], "星海");
    assert_eq!(first["chapter_words"], 3000);
    assert!(first.get("characters").is_some());
    assert!(dir.path().join("setting.json").exists());

    let second = store.get(EntityKind::Setting).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(client.call_count(), 1);
    assert_eq!(store.setting().await.unwrap().chapter_words, 3000);
}
