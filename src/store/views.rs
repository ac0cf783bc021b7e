//! 类型化视图：加载时一次性完成旧字段名兼容与默认值解析
//!
//! 文档本身保持原样（外部可能手工编辑、也可能有模型补出来的额外字段），
//! 业务逻辑只读这些视图，不再到处写「取 A，没有再取 B」。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::store::document::lookup_path;

pub const DEFAULT_CHAPTER_WORDS: usize = 2000;
pub const DEFAULT_TOTAL_WORDS_WAN: f64 = 20.0;

/// 数字或数字字符串 → usize
fn as_usize(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as usize)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 字符串或字符串列表都接受
pub(crate) fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    })
}

pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(as_f64(&value).unwrap_or(0.0))
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(as_usize(&value).map(|n| n as u32).unwrap_or(0))
}

/// 分卷/分章结构中的一项
#[derive(Debug, Clone, PartialEq)]
pub struct StructureEntry {
    pub name: Option<String>,
    pub chapter_start: Option<usize>,
    pub chapter_end: Option<usize>,
    pub chapter_id: Option<usize>,
}

impl StructureEntry {
    fn from_value(v: &Value) -> Self {
        let field = |k: &str| v.get(k).and_then(as_usize);
        Self {
            name: ["name", "title", "volume"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            chapter_start: field("chapter_start"),
            chapter_end: field("chapter_end"),
            chapter_id: field("chapter_id"),
        }
    }
}

/// 节奏大纲：对象形式（可带 total_chapters）或直接是结构列表
#[derive(Debug, Clone, PartialEq)]
pub enum PacingGuide {
    Structured {
        total_chapters: Option<usize>,
        structure: Vec<StructureEntry>,
    },
    Flat(Vec<StructureEntry>),
}

impl PacingGuide {
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Array(items) => Some(PacingGuide::Flat(
                items.iter().filter(|i| i.is_object()).map(StructureEntry::from_value).collect(),
            )),
            Value::Object(map) => Some(PacingGuide::Structured {
                total_chapters: map.get("total_chapters").and_then(as_usize).filter(|n| *n > 0),
                structure: map
                    .get("structure")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter(|i| i.is_object())
                            .map(StructureEntry::from_value)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            _ => None,
        }
    }

    pub fn structure(&self) -> &[StructureEntry] {
        match self {
            PacingGuide::Structured { structure, .. } => structure,
            PacingGuide::Flat(structure) => structure,
        }
    }

    pub fn total_chapters(&self) -> Option<usize> {
        match self {
            PacingGuide::Structured { total_chapters, .. } => *total_chapters,
            PacingGuide::Flat(_) => None,
        }
    }
}

/// 设定视图
#[derive(Debug, Clone, PartialEq)]
pub struct SettingView {
    pub title: String,
    /// 每章目标字数：config.chapter_words → chapter_words → 2000
    pub chapter_words: usize,
    /// 全书目标字数（万）：config.total_words_wan → 20
    pub total_words_wan: f64,
    /// 显式章节上限：config.chapter_limit
    pub chapter_limit: Option<usize>,
    /// world_view 或 world_setting
    pub world: Value,
    pub characters: Value,
    pub pacing: Option<PacingGuide>,
}

impl SettingView {
    pub fn from_document(doc: &Value) -> Self {
        let chapter_words = lookup_path(doc, "config.chapter_words")
            .and_then(as_usize)
            .or_else(|| doc.get("chapter_words").and_then(as_usize))
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CHAPTER_WORDS);
        Self {
            title: lookup_path(doc, "meta.title")
                .and_then(Value::as_str)
                .unwrap_or("未命名小说")
                .to_string(),
            chapter_words,
            total_words_wan: lookup_path(doc, "config.total_words_wan")
                .and_then(as_f64)
                .filter(|w| *w > 0.0)
                .unwrap_or(DEFAULT_TOTAL_WORDS_WAN),
            chapter_limit: lookup_path(doc, "config.chapter_limit")
                .and_then(as_usize)
                .filter(|n| *n > 0),
            world: doc
                .get("world_view")
                .or_else(|| doc.get("world_setting"))
                .cloned()
                .unwrap_or(Value::Object(Map::new())),
            characters: doc
                .get("characters")
                .cloned()
                .unwrap_or(Value::Object(Map::new())),
            pacing: doc.get("pacing_guide").and_then(PacingGuide::from_value),
        }
    }
}

/// 作者演化日志中的一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionEvent {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub timestamp: f64,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub effect: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 作者画像视图
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthorProfile {
    /// style_analysis.description_style 或旧字段 style_description
    pub persona: String,
    pub evolution: Vec<EvolutionEvent>,
    pub enable_instability: bool,
    pub enable_life_events: bool,
}

impl AuthorProfile {
    pub fn from_document(doc: &Value) -> Self {
        let persona = lookup_path(doc, "style_analysis.description_style")
            .and_then(Value::as_str)
            .or_else(|| doc.get("style_description").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();
        let evolution = doc
            .get("evolution")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| serde_json::from_value(i.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        let flag = |k: &str| {
            lookup_path(doc, &format!("config.{}", k))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };
        Self {
            persona,
            evolution,
            enable_instability: flag("enable_instability"),
            enable_life_events: flag("enable_life_events"),
        }
    }
}

/// 单章摘要记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub chapter: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub key_events: Vec<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChapterRecord {
    pub fn new(chapter: u32, title: impl Into<String>) -> Self {
        Self {
            chapter,
            title: title.into(),
            summary: String::new(),
            key_events: Vec::new(),
            score: 0.0,
            extra: Map::new(),
        }
    }
}

/// 历史视图
#[derive(Debug, Clone, PartialEq, Default)]
pub struct History {
    pub rolling_summary: String,
    pub chapters: Vec<ChapterRecord>,
}

impl History {
    pub fn from_document(doc: &Value) -> Self {
        let chapters = doc
            .get("chapters")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| match serde_json::from_value(i.clone()) {
                        Ok(c) => Some(c),
                        Err(e) => {
                            tracing::warn!("skipping malformed chapter record: {}", e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            rolling_summary: doc
                .get("rolling_summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            chapters,
        }
    }

    /// 最后一条记录的章节号；无记录为 0
    pub fn last_chapter_number(&self) -> u32 {
        self.chapters.iter().map(|c| c.chapter).max().unwrap_or(0)
    }

    /// 活动章节的序列化文本（用于上下文规模估算与压缩输入）
    pub fn serialized_chapters(&self) -> String {
        serde_json::to_string(&self.chapters).unwrap_or_default()
    }
}

/// 审核记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(default, deserialize_with = "lenient_u32")]
    pub chapter: u32,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub attempt: u32,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: f64,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub comments: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_mode: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn reviews_from_document(doc: &Value) -> Vec<ReviewRecord> {
    doc.get("reviews")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|i| serde_json::from_value(i.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
