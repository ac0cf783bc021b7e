//! 嵌套 JSON 文档操作：深度合并与点路径查找

use serde_json::{Map, Value};

/// 深度合并：patch 中的 key 覆盖或递归合并进 base，base 中 patch 没有的 key 原样保留。
///
/// 仅当两侧同名值都是对象时递归；列表与标量整体替换。
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(target), Value::Object(updates)) => merge_maps(target, updates),
        (base, patch) => *base = patch.clone(),
    }
}

fn merge_maps(target: &mut Map<String, Value>, updates: &Map<String, Value>) {
    for (key, value) in updates {
        match target.get_mut(key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                deep_merge(existing, value)
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// 按 `a.b.c` 逐层查找；任一段缺失或中间值不是对象时返回 None。空路径返回文档本身。
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(doc);
    }
    path.split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}
