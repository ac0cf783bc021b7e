//! 项目状态存储：四个 JSON 文件，带热重载、深度合并更新与自动修复
//!
//! 每次 get / update / lookup 之前比较磁盘 mtime 与上次记录：变化则重新读取，
//! 否则直接返回缓存。文件缺失时生成骨架并落盘；解析失败时请修复能力修正语法，
//! 修复失败则返回 CorruptState，缓存冻结在最后一次有效状态，且不写盘。
//!
//! 假定同一项目目录同一时刻只有一个写入进程；外部编辑只在两次操作之间被感知。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;

use crate::config::StoreSection;
use crate::core::StoreError;
use crate::store::digest::render_setting_digest;
use crate::store::document::{deep_merge, lookup_path};
use crate::store::repair::{RepairOracle, RepairOutcome, RepairPath, RepairRequest};
use crate::store::views::{
    reviews_from_document, AuthorProfile, ChapterRecord, EvolutionEvent, History, ReviewRecord,
    SettingView,
};
use crate::store::EntityKind;

/// 单个实体的缓存槽
#[derive(Debug)]
struct Slot {
    path: PathBuf,
    doc: Value,
    mtime: Option<SystemTime>,
    loaded: bool,
    /// 修复失败时磁盘内容的 mtime 与原因；mtime 不变则不再重复修复
    frozen: Option<(Option<SystemTime>, String)>,
    disk_reads: usize,
}

impl Slot {
    fn new(path: PathBuf, doc: Value) -> Self {
        Self {
            path,
            doc,
            mtime: None,
            loaded: false,
            frozen: None,
            disk_reads: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    slots: HashMap<EntityKind, Slot>,
    repairs: Vec<RepairOutcome>,
}

pub struct StateStore {
    root: PathBuf,
    project_name: String,
    auto_repair: bool,
    excerpt_chars: usize,
    oracle: Arc<dyn RepairOracle>,
    inner: Mutex<Inner>,
}

impl StateStore {
    pub fn new(root: impl AsRef<Path>, oracle: Arc<dyn RepairOracle>) -> Self {
        let root = root.as_ref().to_path_buf();
        let project_name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "未命名小说".to_string());
        Self {
            root,
            project_name,
            auto_repair: true,
            excerpt_chars: 2000,
            oracle,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn from_config(
        root: impl AsRef<Path>,
        section: &StoreSection,
        oracle: Arc<dyn RepairOracle>,
    ) -> Self {
        Self::new(root, oracle)
            .with_auto_repair(section.auto_repair)
            .with_excerpt_chars(section.repair_excerpt_chars)
    }

    pub fn with_auto_repair(mut self, enabled: bool) -> Self {
        self.auto_repair = enabled;
        self
    }

    pub fn with_excerpt_chars(mut self, chars: usize) -> Self {
        self.excerpt_chars = chars;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn entity_path(&self, kind: EntityKind) -> PathBuf {
        self.root.join(kind.file_name())
    }

    /// 热重载检查后返回文档
    pub async fn get(&self, kind: EntityKind) -> Result<Value, StoreError> {
        let mut guard = self.inner.lock().await;
        let slot = self.refresh(&mut guard, kind).await?;
        Ok(slot.doc.clone())
    }

    /// 当前缓存（不触发热重载）
    pub async fn cached(&self, kind: EntityKind) -> Value {
        let mut guard = self.inner.lock().await;
        self.slot_mut(&mut guard.slots, kind).doc.clone()
    }

    /// 深度合并后立即落盘。落盘失败返回 Persist，但内存中的合并结果保留
    pub async fn update(&self, kind: EntityKind, patch: Value) -> Result<(), StoreError> {
        if !patch.is_object() {
            return Err(StoreError::Rejected {
                entity: kind,
                reason: "update payload must be a mapping".to_string(),
            });
        }
        self.modify(kind, |doc| {
            deep_merge(doc, &patch);
            Ok(())
        })
        .await
    }

    /// 将当前缓存写盘；文件处于损坏冻结状态时拒绝覆盖
    pub async fn save(&self, kind: EntityKind) -> Result<(), StoreError> {
        self.modify(kind, |_| Ok(())).await
    }

    /// 点路径查找，如 `setting.config.chapter_words`；首段为实体名，任一段缺失返回 default
    pub async fn lookup(&self, path: &str, default: Value) -> Result<Value, StoreError> {
        let (head, rest) = path.split_once('.').unwrap_or((path, ""));
        let Some(kind) = EntityKind::from_key(head) else {
            return Ok(default);
        };
        let mut guard = self.inner.lock().await;
        let slot = self.refresh(&mut guard, kind).await?;
        Ok(lookup_path(&slot.doc, rest)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or(default))
    }

    pub async fn setting(&self) -> Result<SettingView, StoreError> {
        Ok(SettingView::from_document(&self.get(EntityKind::Setting).await?))
    }

    pub async fn author(&self) -> Result<AuthorProfile, StoreError> {
        Ok(AuthorProfile::from_document(&self.get(EntityKind::AuthorProfile).await?))
    }

    pub async fn history(&self) -> Result<History, StoreError> {
        Ok(History::from_document(&self.get(EntityKind::History).await?))
    }

    pub async fn reviews(&self) -> Result<Vec<ReviewRecord>, StoreError> {
        Ok(reviews_from_document(&self.get(EntityKind::ReviewLog).await?))
    }

    pub async fn setting_digest(&self) -> Result<String, StoreError> {
        Ok(render_setting_digest(&self.get(EntityKind::Setting).await?))
    }

    /// 追加一章摘要记录（History.chapters 只追加）
    pub async fn append_chapter(&self, record: &ChapterRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.modify(EntityKind::History, |doc| push_to_list(doc, "chapters", value))
            .await
    }

    pub async fn append_review(&self, record: &ReviewRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        self.modify(EntityKind::ReviewLog, |doc| push_to_list(doc, "reviews", value))
            .await
    }

    pub async fn append_evolution_event(&self, event: &EvolutionEvent) -> Result<(), StoreError> {
        let value = serde_json::to_value(event)?;
        self.modify(EntityKind::AuthorProfile, |doc| {
            push_to_list(doc, "evolution", value)
        })
        .await
    }

    /// 压缩后替换活动章节窗口与滚动摘要；唯一允许缩短 chapters 的操作
    pub async fn replace_active_window(
        &self,
        rolling_summary: &str,
        tail: &[ChapterRecord],
    ) -> Result<(), StoreError> {
        let tail = serde_json::to_value(tail)?;
        let summary = rolling_summary.to_string();
        self.modify(EntityKind::History, move |doc| {
            let existing = doc
                .get("chapters")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let kept = tail.as_array().map_or(0, Vec::len);
            if existing > 0 && kept == 0 {
                return Err("active window must keep at least one chapter".to_string());
            }
            if kept < existing && summary.trim().is_empty() {
                return Err("evicted chapters must be folded into a non-empty rolling summary".to_string());
            }
            deep_merge(
                doc,
                &serde_json::json!({"rolling_summary": summary, "chapters": tail}),
            );
            Ok(())
        })
        .await
    }

    /// 章节正文：`chapters/第{n}章_{标题}.txt`，无标题时 `Chapter_{n}.txt`
    pub async fn save_chapter_text(
        &self,
        chapter: u32,
        content: &str,
        title: Option<&str>,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.root.join("chapters");
        fs::create_dir_all(&dir).await.map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        let safe_title: Option<String> = title
            .map(|t| {
                t.chars()
                    .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
                    .collect::<String>()
                    .trim()
                    .to_string()
            })
            .filter(|t| !t.is_empty());
        let file_name = match safe_title {
            Some(t) => format!("第{}章_{}.txt", chapter, t),
            None => format!("Chapter_{}.txt", chapter),
        };
        let path = dir.join(file_name);
        fs::write(&path, content)
            .await
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::info!("saved chapter {} to {}", chapter, path.display());
        Ok(path)
    }

    /// 修复记录（按发生顺序）
    pub async fn repairs(&self) -> Vec<RepairOutcome> {
        self.inner.lock().await.repairs.clone()
    }

    /// 某实体实际从磁盘读取的次数
    pub async fn disk_reads(&self, kind: EntityKind) -> usize {
        let mut guard = self.inner.lock().await;
        self.slot_mut(&mut guard.slots, kind).disk_reads
    }

    /// 热重载 → 原地修改 → 落盘。修改被拒绝时不写盘
    async fn modify<F>(&self, kind: EntityKind, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Value) -> Result<(), String>,
    {
        let mut guard = self.inner.lock().await;
        let slot = self.refresh(&mut guard, kind).await?;
        let mut next = slot.doc.clone();
        f(&mut next).map_err(|reason| StoreError::Rejected { entity: kind, reason })?;
        slot.doc = next;
        Self::persist(kind, slot).await
    }

    fn slot_mut<'a>(&self, slots: &'a mut HashMap<EntityKind, Slot>, kind: EntityKind) -> &'a mut Slot {
        slots
            .entry(kind)
            .or_insert_with(|| Slot::new(self.entity_path(kind), kind.skeleton(&self.project_name)))
    }

    /// 热重载检查；返回刷新后的槽
    async fn refresh<'a>(&self, inner: &'a mut Inner, kind: EntityKind) -> Result<&'a mut Slot, StoreError> {
        let Inner { slots, repairs } = inner;
        let slot = self.slot_mut(slots, kind);

        let meta = match fs::metadata(&slot.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.handle_missing(kind, slot, repairs).await;
                return Ok(slot);
            }
            Err(source) => {
                if slot.loaded {
                    tracing::warn!("cannot stat {}: {}; serving cached {}", slot.path.display(), source, kind);
                    return Ok(slot);
                }
                return Err(StoreError::Io {
                    path: slot.path.clone(),
                    source,
                });
            }
        };
        let mtime = meta.modified().ok();

        if slot.loaded && mtime.is_some() && slot.mtime == mtime {
            return Ok(slot);
        }
        if let Some((frozen_mtime, reason)) = &slot.frozen {
            if *frozen_mtime == mtime {
                return Err(StoreError::CorruptState {
                    entity: kind,
                    path: slot.path.clone(),
                    reason: reason.clone(),
                });
            }
        }

        let raw = fs::read_to_string(&slot.path)
            .await
            .map_err(|source| StoreError::Io {
                path: slot.path.clone(),
                source,
            })?;
        slot.disk_reads += 1;

        let parse_error = match serde_json::from_str::<Value>(&raw) {
            Ok(doc) if doc.is_object() => {
                if slot.loaded {
                    tracing::debug!("{} changed on disk, reloaded", kind);
                }
                slot.doc = doc;
                slot.mtime = mtime;
                slot.loaded = true;
                slot.frozen = None;
                return Ok(slot);
            }
            Ok(_) => "top-level value is not a mapping".to_string(),
            Err(e) => e.to_string(),
        };

        tracing::error!("failed to parse {}: {}", slot.path.display(), parse_error);
        self.repair_corrupt(kind, slot, repairs, &raw, mtime, parse_error)
            .await?;
        Ok(slot)
    }

    async fn handle_missing(&self, kind: EntityKind, slot: &mut Slot, repairs: &mut Vec<RepairOutcome>) {
        if !self.auto_repair {
            if !slot.loaded {
                tracing::warn!("{} not found and auto repair disabled, using defaults", slot.path.display());
                slot.loaded = true;
            }
            return;
        }
        if slot.loaded {
            // 加载后被外部删除：用缓存内容重建
            tracing::warn!("{} disappeared, restoring cached {}", slot.path.display(), kind);
            if let Err(e) = Self::persist(kind, slot).await {
                tracing::error!("{}", e);
            }
            return;
        }

        tracing::info!("{} missing, creating skeleton", slot.path.display());
        let mut doc = kind.skeleton(&self.project_name);
        let mut path = RepairPath::StaticDefault;
        if kind == EntityKind::Setting {
            let request = RepairRequest::Skeleton {
                entity: kind,
                project_name: self.project_name.clone(),
            };
            match self.oracle.attempt(&request).await {
                Some(generated) => {
                    deep_merge(&mut doc, &generated);
                    path = RepairPath::OracleSkeleton;
                }
                None => tracing::warn!("skeleton generation failed, using static default for {}", kind),
            }
        }
        slot.doc = doc;
        slot.loaded = true;
        repairs.push(RepairOutcome {
            entity: kind,
            path,
            at: Utc::now(),
        });
        if let Err(e) = Self::persist(kind, slot).await {
            tracing::error!("{}", e);
        }
    }

    async fn repair_corrupt(
        &self,
        kind: EntityKind,
        slot: &mut Slot,
        repairs: &mut Vec<RepairOutcome>,
        raw: &str,
        mtime: Option<SystemTime>,
        parse_error: String,
    ) -> Result<(), StoreError> {
        let fixed = if self.auto_repair {
            let request = RepairRequest::FixSyntax {
                entity: kind,
                excerpt: raw.chars().take(self.excerpt_chars).collect(),
                parse_error: parse_error.clone(),
            };
            self.oracle.attempt(&request).await.filter(Value::is_object)
        } else {
            None
        };

        match fixed {
            Some(doc) => {
                tracing::info!("repaired {}", slot.path.display());
                slot.doc = doc;
                slot.loaded = true;
                slot.frozen = None;
                repairs.push(RepairOutcome {
                    entity: kind,
                    path: RepairPath::OracleFixed,
                    at: Utc::now(),
                });
                if let Err(e) = Self::persist(kind, slot).await {
                    tracing::error!("{}", e);
                }
                Ok(())
            }
            None => {
                repairs.push(RepairOutcome {
                    entity: kind,
                    path: RepairPath::Failed,
                    at: Utc::now(),
                });
                slot.frozen = Some((mtime, parse_error.clone()));
                Err(StoreError::CorruptState {
                    entity: kind,
                    path: slot.path.clone(),
                    reason: parse_error,
                })
            }
        }
    }

    /// 先写临时文件再 rename，避免写到一半留下无法解析的文件
    async fn persist(kind: EntityKind, slot: &mut Slot) -> Result<(), StoreError> {
        let body = serde_json::to_string_pretty(&slot.doc)?;
        let to_err = |source| StoreError::Persist {
            entity: kind,
            path: slot.path.clone(),
            source,
        };
        if let Some(parent) = slot.path.parent() {
            fs::create_dir_all(parent).await.map_err(to_err)?;
        }
        let tmp = slot.path.with_extension("json.tmp");
        fs::write(&tmp, body).await.map_err(to_err)?;
        fs::rename(&tmp, &slot.path).await.map_err(to_err)?;
        slot.mtime = fs::metadata(&slot.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok());
        slot.frozen = None;
        Ok(())
    }
}

fn push_to_list(doc: &mut Value, key: &str, value: Value) -> Result<(), String> {
    let map = doc
        .as_object_mut()
        .ok_or_else(|| "document is not a mapping".to_string())?;
    let list = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(Vec::new());
    }
    if let Value::Array(items) = list {
        items.push(value);
    }
    Ok(())
}
