//! 项目状态：设定、作者画像、历史、审核记录四个持久化实体

pub mod digest;
pub mod document;
pub mod entity;
pub mod repair;
pub mod state_store;
pub mod views;

pub use digest::render_setting_digest;
pub use document::{deep_merge, lookup_path};
pub use entity::EntityKind;
pub use repair::{DispatcherRepairOracle, NoRepair, RepairOracle, RepairOutcome, RepairPath, RepairRequest};
pub use state_store::StateStore;
pub use views::{
    AuthorProfile, ChapterRecord, EvolutionEvent, History, PacingGuide, ReviewRecord, SettingView,
    StructureEntry,
};
