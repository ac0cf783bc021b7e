//! 连载写作流程：角色、修订闸门、节奏、会话与对外事件

pub mod agents;
pub mod events;
pub mod pacing;
pub mod prompts;
pub mod revision;
pub mod session;
pub mod supervisor;

pub use agents::{ChapterContext, ChapterSummary, PacingAgent, ReviewAgent, WriterAgent};
pub use events::{EventSender, NovelEvent};
pub use pacing::{is_volume_end, PacingStatus, RunMode, Stage};
pub use prompts::Prompts;
pub use revision::{
    ChapterDrafter, ChapterOutcome, ChapterReviewer, Feedback, GateMode, LengthAdjustment,
    ReviewResult, RevisionController, RevisionOutcome, RevisionPolicy,
};
pub use session::{extract_title, ChapterStep, RunReport, WritingSession};
pub use supervisor::{AutoSupervisor, GateDecision, ScriptedSupervisor, Supervisor};
