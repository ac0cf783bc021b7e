//! 记忆层：消息、上下文预算

pub mod context_budget;
pub mod conversation;

pub use context_budget::{CompressionPlan, ContextBudgetController};
pub use conversation::{char_len, total_chars, Message, Role};
