//! 把设定文档渲染为 Markdown 摘要（写进提示词，也用于上下文规模估算）

use std::fmt::Write as _;

use serde_json::Value;

/// 取第一个存在且非空的字段，渲染为文本
fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
}

fn text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(text).collect::<Vec<_>>().join("; "),
        other => other.to_string(),
    }
}

fn text_or(obj: &Value, keys: &[&str], fallback: &str) -> String {
    field(obj, keys).map(text).unwrap_or_else(|| fallback.to_string())
}

pub fn render_setting_digest(setting: &Value) -> String {
    if setting.as_object().map_or(true, |m| m.is_empty()) {
        return "暂无设定".to_string();
    }
    let empty = Value::Null;
    let meta = setting.get("meta").unwrap_or(&empty);
    let world = field(setting, &["world_view", "world_setting"]).unwrap_or(&empty);
    let chars = setting.get("characters").unwrap_or(&empty);

    let mut md = String::new();
    let _ = writeln!(md, "# {}\n", text_or(meta, &["title"], "未命名小说"));

    let _ = writeln!(md, "## 1. 基础信息");
    let _ = writeln!(md, "* **核心卖点**: {}", text_or(meta, &["core_hook"], "无"));
    let _ = writeln!(md, "* **主题**: {}", text_or(meta, &["theme"], "无"));
    let _ = writeln!(
        md,
        "* **预期字数**: {}",
        text_or(meta, &["estimated_word_count", "total_words_target"], "未设置")
    );
    let tags = meta.get("tags").map(|t| match t {
        Value::Array(items) => items.iter().map(text).collect::<Vec<_>>().join(", "),
        other => text(other),
    });
    let _ = writeln!(md, "* **标签**: {}\n", tags.unwrap_or_default());

    let _ = writeln!(md, "## 2. 世界观");
    let _ = writeln!(md, "* **背景**: {}", text_or(world, &["background"], "无"));
    let _ = writeln!(md, "* **地理/场景**: {}", text_or(world, &["geography", "locations"], "无"));
    let _ = writeln!(md, "* **世界规则**: {}", text_or(world, &["world_rules", "rules"], "无"));
    let _ = writeln!(md, "* **力量体系**: {}", text_or(world, &["power_system"], ""));
    match world.get("factions") {
        Some(Value::Array(factions)) if !factions.is_empty() => {
            let _ = writeln!(md, "* **势力**:");
            for f in factions {
                if f.is_object() {
                    let _ = writeln!(
                        md,
                        "  - {}: {}",
                        text_or(f, &["name"], "?"),
                        text_or(f, &["description"], "")
                    );
                } else {
                    let _ = writeln!(md, "  - {}", text(f));
                }
            }
        }
        Some(other) if !other.is_null() && other.as_str() != Some("") => {
            let _ = writeln!(md, "* **势力**:\n  - {}", text(other));
        }
        _ => {}
    }
    md.push('\n');

    let _ = writeln!(md, "## 3. 角色");
    let p = chars.get("protagonist").unwrap_or(&empty);
    let _ = writeln!(md, "### 主角: {}", text_or(p, &["name"], "未命名"));
    let _ = writeln!(md, "* **年龄**: {}", text_or(p, &["age"], "未知"));
    let _ = writeln!(md, "* **外貌**: {}", text_or(p, &["appearance"], "暂无描述"));
    let _ = writeln!(
        md,
        "* **性格特征**: {}",
        text_or(p, &["personality", "personality_traits"], "暂无")
    );
    let _ = writeln!(md, "* **技能/金手指**: {}", text_or(p, &["gold_finger", "skills"], "无"));
    let _ = writeln!(md, "* **当前目标**: {}", text_or(p, &["goal"], "无"));

    if let Some(rels) = field(chars, &["relationships"]) {
        let _ = writeln!(md, "* **人际关系网**: {}", text(rels));
    } else if let Some(Value::Array(rels)) = p.get("relationships") {
        let _ = writeln!(md, "* **人际关系**:");
        for rel in rels {
            let _ = writeln!(
                md,
                "  - {} ({}): {}",
                text_or(rel, &["name"], "?"),
                text_or(rel, &["relation"], "?"),
                text_or(rel, &["attitude"], "?")
            );
        }
    }

    let a = chars.get("antagonist").unwrap_or(&empty);
    if a.as_object().map_or(false, |m| !m.is_empty()) {
        let _ = writeln!(md, "\n### 反派: {}", text_or(a, &["name"], "未命名"));
        let _ = writeln!(md, "* **头衔**: {}", text_or(a, &["title"], ""));
        let _ = writeln!(md, "* **动机**: {}", text_or(a, &["motivation"], "未知"));
        let _ = writeln!(md, "* **背景**: {}", text_or(a, &["background"], ""));
    }

    if let Some(Value::Array(supporting)) = chars.get("supporting") {
        if !supporting.is_empty() {
            let _ = writeln!(md, "\n### 配角:");
            for s in supporting {
                let _ = writeln!(
                    md,
                    "* **{}** ({}): {}",
                    text_or(s, &["name"], "未命名"),
                    text_or(s, &["role"], "路人"),
                    text_or(s, &["trait"], "")
                );
            }
        }
    }
    md
}
