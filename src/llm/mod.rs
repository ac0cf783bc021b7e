//! LLM 层：客户端抽象、模型注册表、限速、调度与回退

pub mod dispatcher;
pub mod json;
pub mod mock;
pub mod openai;
pub mod rate_limit;
pub mod registry;
pub mod traits;

pub use dispatcher::{ActiveModels, DispatchError, ModelDispatcher, ModelRole, ModelSession, RetryPolicy};
pub use json::{extract_json, parse_json_as, parse_json_lenient};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{strip_thinking, OpenAiClient, TokenUsage};
pub use rate_limit::RateLimiter;
pub use registry::{FallbackChain, ModelProfile, ModelRegistry};
pub use traits::{GenerationRequest, LlmClient, LlmError};
