//! Inkstone 无头写作器
//!
//! 用法：inkstone <novel_dir> [--chapters N | --complete | --volume] [--config path]
//!
//! 不带模式参数时为人工模式：每章审核后在终端确认或输入修改意见。
//! novel_dir 只写项目名时放在配置的 [app] novels_root 下。
//! 模型 Key 通过配置里的 api_key_env 指向的环境变量提供（如 DEEPSEEK_API_KEY）。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};

use inkstone::config::load_config;
use inkstone::llm::{ActiveModels, ModelDispatcher, ModelRegistry, ModelSession, RetryPolicy};
use inkstone::novel::{
    AutoSupervisor, GateDecision, NovelEvent, Prompts, RunMode, Supervisor, WritingSession,
};
use inkstone::observability::{self, Monitor};
use inkstone::store::{DispatcherRepairOracle, StateStore};

struct CliArgs {
    novel_dir: PathBuf,
    mode: RunMode,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = std::env::args().skip(1);
    let mut novel_dir = None;
    let mut mode = RunMode::Manual;
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--chapters" => {
                let n = args.next().context("--chapters needs a number")?;
                mode = RunMode::Count(n.parse().context("--chapters needs a number")?);
            }
            "--complete" => mode = RunMode::Complete,
            "--volume" => mode = RunMode::Volume,
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            other if other.starts_with("--") => bail!("unknown option {}", other),
            other => novel_dir = Some(PathBuf::from(other)),
        }
    }
    let novel_dir = novel_dir.context(
        "usage: inkstone <novel_dir> [--chapters N | --complete | --volume] [--config path]",
    )?;
    Ok(CliArgs {
        novel_dir,
        mode,
        config,
    })
}

/// 终端监督者：从 stdin 读取 y/n 与修改意见
struct StdinSupervisor {
    lines: Mutex<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
}

impl StdinSupervisor {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn ask(&self, prompt: &str) -> String {
        print!("{} ", prompt);
        let _ = std::io::stdout().flush();
        match self.lines.lock().await.next_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            _ => String::new(),
        }
    }
}

#[async_trait]
impl Supervisor for StdinSupervisor {
    async fn confirm(&self, prompt: &str) -> bool {
        let answer = self.ask(&format!("{} [Y/n]", prompt)).await.to_lowercase();
        answer.is_empty() || answer == "y" || answer == "yes"
    }

    async fn feedback(&self, prompt: &str) -> Option<String> {
        Some(self.ask(prompt).await).filter(|s| !s.is_empty())
    }

    async fn on_gate_exhausted(&self, chapter: u32, attempts: u32) -> GateDecision {
        let prompt = format!(
            "第 {} 章审核 {} 次仍未达标：继续人工修改(i) / 放弃本章(a) / 终止运行(e)？",
            chapter, attempts
        );
        match self.ask(&prompt).await.to_lowercase().as_str() {
            "i" => GateDecision::Intervene,
            "e" => GateDecision::Escalate,
            _ => GateDecision::Abandon,
        }
    }
}

fn render_event(event: &NovelEvent) {
    match event {
        NovelEvent::ChapterStarted {
            chapter,
            total,
            stage,
            progress,
        } => println!(
            "== 第 {}/{} 章 · {} · {:.0}% ==",
            chapter,
            total,
            stage,
            progress * 100.0
        ),
        NovelEvent::Reviewed {
            attempt,
            score,
            passed,
            comments,
            ..
        } => println!("审核 #{}: {:.0} 分 {} {}", attempt, score, if *passed { "通过" } else { "未通过" }, comments),
        NovelEvent::ChapterAccepted { chapter, title, chars, .. } => {
            println!("第 {} 章《{}》已保存（{} 字）", chapter, title, chars)
        }
        NovelEvent::Finished { written, reason } => println!("完成：共写 {} 章（{}）", written, reason),
        NovelEvent::Error { text } => eprintln!("错误：{}", text),
        other => tracing::debug!(?other, "event"),
    }
}

/// 启动时探测作者与审核模型；不通时只告警，运行中由回退链兜底
async fn check_connections(dispatcher: &ModelDispatcher, author: &str, reviewer: &str) {
    let mut keys = vec![author];
    if reviewer != author {
        keys.push(reviewer);
    }
    for key in keys {
        match dispatcher.test_connection(key).await {
            Ok(()) => tracing::info!("model {} is reachable", key),
            Err(e) => tracing::warn!("model {} failed connectivity check: {}", key, e),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;
    cfg.llm.validate()?;
    let novel_dir = cfg.app.novel_dir(&args.novel_dir);
    std::fs::create_dir_all(&novel_dir)
        .with_context(|| format!("Failed to create {}", novel_dir.display()))?;

    let dispatcher = ModelDispatcher::from_registry(
        ModelRegistry::from_config(&cfg.llm),
        RetryPolicy::from_config(&cfg.retry),
        Monitor::new(),
        cfg.llm.show_thinking,
    );
    check_connections(&dispatcher, &cfg.llm.author_model_key, &cfg.llm.reviewer_model_key).await;
    let models = ModelSession::new(
        Arc::new(dispatcher),
        ActiveModels::new(&cfg.llm.author_model_key, &cfg.llm.reviewer_model_key),
    );
    let store = Arc::new(StateStore::from_config(
        &novel_dir,
        &cfg.store,
        Arc::new(DispatcherRepairOracle::new(models.clone())),
    ));

    let supervisor: Arc<dyn Supervisor> = if args.mode.is_manual() {
        Arc::new(StdinSupervisor::new())
    } else {
        Arc::new(AutoSupervisor::default())
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            render_event(&event);
        }
    });

    let session = WritingSession::new(models, store, supervisor, Prompts::load())
        .with_config(&cfg)
        .with_events(tx);
    let result = session.run(args.mode).await;
    drop(session);
    let _ = printer.await;

    let report = result.context("Writing session failed")?;
    tracing::info!("done: {} chapters ({})", report.written, report.reason);
    Ok(())
}
