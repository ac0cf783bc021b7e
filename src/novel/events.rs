//! 写作过程事件：交给外部展示层（终端、Web）渲染，核心本身不输出任何界面

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NovelEvent {
    /// 状态文本
    Status { text: String },
    /// 开始一章
    ChapterStarted {
        chapter: u32,
        total: usize,
        stage: String,
        progress: f64,
    },
    /// 初稿完成
    Drafted { chapter: u32, chars: usize, target: usize },
    /// 字数调整（扩写或精简）一轮
    LengthAdjusted {
        chapter: u32,
        retry: u32,
        expand: bool,
        before: usize,
        after: usize,
    },
    /// 一次审核结果
    Reviewed {
        chapter: u32,
        attempt: u32,
        score: f64,
        passed: bool,
        comments: String,
    },
    /// 按意见修改一轮
    Revised {
        chapter: u32,
        attempt: u32,
        human_feedback: bool,
    },
    /// 审核尝试次数用尽仍未达标
    GateExhausted { chapter: u32, attempts: u32 },
    ChapterAccepted {
        chapter: u32,
        title: String,
        score: f64,
        chars: usize,
    },
    /// 本章放弃，不落盘
    ChapterAbandoned { chapter: u32 },
    /// 历史压缩
    HistoryCompressed { evicted: usize, kept: usize },
    /// 作者风格更新（预览）
    StyleEvolved { preview: String },
    LifeEvent { event: String, effect: String },
    /// 本次运行结束
    Finished { written: u32, reason: String },
    Error { text: String },
}

pub type EventSender = mpsc::UnboundedSender<NovelEvent>;

/// 发送事件；没有订阅者或接收端已关闭时静默丢弃
pub(crate) fn emit(events: &Option<EventSender>, event: NovelEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}
