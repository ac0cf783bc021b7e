//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INKSTONE__*` 覆盖（双下划线表示嵌套，如 `INKSTONE__LLM__AUTHOR_MODEL_KEY=deepseek`）。
//! 内核只消费解析后的 ModelProfile / FallbackChain（见 llm::registry），不依赖这里的原始格式。

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::core::NovelError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub retry: RetrySection,
    pub context: ContextSection,
    pub revision: RevisionSection,
    pub store: StoreSection,
}

/// [app] 段：小说根目录
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    /// 小说项目根目录，未设置时用 ./novel
    pub novels_root: Option<PathBuf>,
}

impl AppSection {
    pub fn novels_root(&self) -> PathBuf {
        self.novels_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("novel"))
    }

    /// 只给项目名（如 `青云志`）时放在 novels_root 下，带路径时原样使用
    pub fn novel_dir(&self, arg: &Path) -> PathBuf {
        let mut components = arg.components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => self.novels_root().join(arg),
            _ => arg.to_path_buf(),
        }
    }
}

/// [llm] 段：模型端点、作者/审核模型、回退顺序
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model_key")]
    pub author_model_key: String,
    #[serde(default = "default_model_key")]
    pub reviewer_model_key: String,
    /// 是否在进度事件中展示思考过程长度
    #[serde(default = "default_show_thinking")]
    pub show_thinking: bool,
    /// 回退顺序；为空时按模型 key 字典序
    #[serde(default)]
    pub fallback_order: Vec<String>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            author_model_key: default_model_key(),
            reviewer_model_key: default_model_key(),
            show_thinking: default_show_thinking(),
            fallback_order: Vec::new(),
            models: BTreeMap::new(),
        }
    }
}

impl LlmSection {
    /// 作者与审核模型都必须在 [llm.models] 中有端点
    pub fn validate(&self) -> Result<(), NovelError> {
        if self.models.is_empty() {
            return Err(config_error("no models configured under [llm.models]".to_string()));
        }
        for key in [&self.author_model_key, &self.reviewer_model_key] {
            if !self.models.contains_key(key) {
                return Err(config_error(format!(
                    "model '{}' is not configured under [llm.models]",
                    key
                )));
            }
        }
        Ok(())
    }
}

fn config_error(message: String) -> NovelError {
    NovelError::Config(config::ConfigError::Message(message))
}

fn default_model_key() -> String {
    "deepseek".to_string()
}

fn default_show_thinking() -> bool {
    true
}

/// [llm.models.<key>] 段：单个模型端点
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelEntry {
    pub base_url: Option<String>,
    /// 明文 Key（不推荐）；优先使用 api_key_env
    pub api_key: Option<String>,
    /// 存放 Key 的环境变量名，如 DEEPSEEK_API_KEY
    pub api_key_env: Option<String>,
    pub model_name: Option<String>,
    pub display_name: Option<String>,
    /// 两次请求之间的最小间隔（秒）
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: f64,
    #[serde(default)]
    pub supports_thinking: bool,
}

fn default_min_interval_secs() -> f64 {
    1.0
}

/// [retry] 段：限流重试与指数退避
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// 同一模型遇到限流时的最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 退避时间单位（毫秒），第 n 次失败后等待 2^n 个单位
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// 退避上限（秒）
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_backoff_cap_secs() -> u64 {
    60
}

/// [context] 段：上下文预算（按字符估算）
#[derive(Debug, Clone, Deserialize)]
pub struct ContextSection {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_trigger_ratio")]
    pub trigger_ratio: f64,
    #[serde(default = "default_keep")]
    pub default_keep: usize,
    /// 活跃章节数达到此值时无论大小都触发压缩
    #[serde(default = "default_max_active_chapters")]
    pub max_active_chapters: usize,
}

impl Default for ContextSection {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            trigger_ratio: default_trigger_ratio(),
            default_keep: default_keep(),
            max_active_chapters: default_max_active_chapters(),
        }
    }
}

fn default_max_chars() -> usize {
    50_000
}

fn default_trigger_ratio() -> f64 {
    0.8
}

fn default_keep() -> usize {
    5
}

fn default_max_active_chapters() -> usize {
    15
}

/// [revision] 段：字数校正与审核闸门
#[derive(Debug, Clone, Deserialize)]
pub struct RevisionSection {
    #[serde(default = "default_max_length_retries")]
    pub max_length_retries: usize,
    #[serde(default = "default_max_review_attempts")]
    pub max_review_attempts: usize,
    /// 自动模式下允许的自动精修次数
    #[serde(default = "default_auto_revisions")]
    pub auto_revisions: usize,
    #[serde(default = "default_auto_threshold")]
    pub auto_threshold: f64,
    #[serde(default = "default_manual_threshold")]
    pub manual_threshold: f64,
    #[serde(default = "default_lower_ratio")]
    pub lower_ratio: f64,
    #[serde(default = "default_upper_ratio")]
    pub upper_ratio: f64,
}

impl Default for RevisionSection {
    fn default() -> Self {
        Self {
            max_length_retries: default_max_length_retries(),
            max_review_attempts: default_max_review_attempts(),
            auto_revisions: default_auto_revisions(),
            auto_threshold: default_auto_threshold(),
            manual_threshold: default_manual_threshold(),
            lower_ratio: default_lower_ratio(),
            upper_ratio: default_upper_ratio(),
        }
    }
}

fn default_max_length_retries() -> usize {
    2
}

fn default_max_review_attempts() -> usize {
    3
}

fn default_auto_revisions() -> usize {
    2
}

fn default_auto_threshold() -> f64 {
    85.0
}

fn default_manual_threshold() -> f64 {
    90.0
}

fn default_lower_ratio() -> f64 {
    0.8
}

fn default_upper_ratio() -> f64 {
    1.2
}

/// [store] 段：四个持久化文档的自动修复
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_auto_repair")]
    pub auto_repair: bool,
    /// 损坏文件送去修复时截取的最大字符数
    #[serde(default = "default_repair_excerpt_chars")]
    pub repair_excerpt_chars: usize,
    /// 作者现实生活事件的触发概率
    #[serde(default = "default_life_event_probability")]
    pub life_event_probability: f64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            auto_repair: default_auto_repair(),
            repair_excerpt_chars: default_repair_excerpt_chars(),
            life_event_probability: default_life_event_probability(),
        }
    }
}

fn default_auto_repair() -> bool {
    true
}

fn default_repair_excerpt_chars() -> usize {
    2000
}

fn default_life_event_probability() -> f64 {
    0.05
}

/// 从 config 目录加载配置，环境变量 INKSTONE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 INKSTONE__*（双下划线表示嵌套键，fallback_order 以逗号分隔）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("INKSTONE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("llm.fallback_order")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.backoff_cap_secs, 60);
        assert_eq!(cfg.context.max_chars, 50_000);
        assert_eq!(cfg.context.default_keep, 5);
        assert_eq!(cfg.revision.max_length_retries, 2);
        assert_eq!(cfg.revision.max_review_attempts, 3);
        assert!(cfg.store.auto_repair);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inkstone.toml");
        std::fs::write(
            &path,
            r#"
[llm]
author_model_key = "qwen"
fallback_order = ["qwen", "deepseek"]

[llm.models.qwen]
base_url = "https://example.invalid/v1"
model_name = "qwen-max"
min_interval_secs = 2.5

[context]
max_chars = 1000
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.author_model_key, "qwen");
        assert_eq!(cfg.llm.reviewer_model_key, "deepseek");
        assert_eq!(cfg.llm.fallback_order, vec!["qwen", "deepseek"]);
        assert_eq!(cfg.llm.models["qwen"].min_interval_secs, 2.5);
        assert_eq!(cfg.context.max_chars, 1000);
        assert_eq!(cfg.context.trigger_ratio, 0.8);
    }

    #[test]
    fn test_novel_dir_resolves_bare_names_under_root() {
        let app = AppSection {
            novels_root: Some(PathBuf::from("/data/novels")),
        };
        assert_eq!(app.novel_dir(Path::new("青云志")), PathBuf::from("/data/novels/青云志"));
        assert_eq!(app.novel_dir(Path::new("./青云志")), PathBuf::from("./青云志"));
        assert_eq!(app.novel_dir(Path::new("/tmp/book")), PathBuf::from("/tmp/book"));
        assert_eq!(
            AppSection::default().novel_dir(Path::new("book")),
            PathBuf::from("novel/book")
        );
    }

    #[test]
    fn test_validate_requires_configured_role_models() {
        let mut llm = LlmSection::default();
        assert!(matches!(llm.validate(), Err(NovelError::Config(_))));

        llm.models.insert("deepseek".into(), ModelEntry::default());
        llm.validate().unwrap();

        llm.reviewer_model_key = "qwen".into();
        let err = llm.validate().unwrap_err();
        assert!(err.to_string().contains("qwen"));
    }
}
