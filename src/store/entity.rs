//! 四类持久化实体及其默认骨架

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Setting,
    AuthorProfile,
    History,
    ReviewLog,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Setting,
        EntityKind::AuthorProfile,
        EntityKind::History,
        EntityKind::ReviewLog,
    ];

    /// 点路径查找时使用的首段名称，同时是文件名主干
    pub fn key(self) -> &'static str {
        match self {
            EntityKind::Setting => "setting",
            EntityKind::AuthorProfile => "author",
            EntityKind::History => "history",
            EntityKind::ReviewLog => "review",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.key() == key)
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.key())
    }

    /// 静态默认骨架：缺失文件时写入，也是首次加载前的内存初值
    pub fn skeleton(self, project_name: &str) -> Value {
        match self {
            EntityKind::Setting => json!({
                "meta": {"title": project_name, "tags": [], "total_words_target": "20万"},
                "chapter_words": 2000,
                "world_setting": {},
                "characters": {"protagonist": {}, "antagonist": {}, "supporting": []}
            }),
            EntityKind::AuthorProfile => json!({
                "traits": {},
                "style_analysis": {},
                "evolution": [],
                "config": {"enable_instability": false, "enable_life_events": false}
            }),
            EntityKind::History => json!({"chapters": [], "rolling_summary": ""}),
            EntityKind::ReviewLog => json!({"reviews": []}),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(EntityKind::from_key("chapters"), None);
        assert_eq!(EntityKind::ReviewLog.file_name(), "review.json");
    }

    #[test]
    fn test_setting_skeleton_has_title_and_words() {
        let s = EntityKind::Setting.skeleton("长夜行");
        assert_eq!(s["meta"]["title"], "长夜行");
        assert_eq!(s["chapter_words"], 2000);
    }
}
