use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::detection::{DetectionResult, Label};
use crate::notice::{Notice, Notices};
use crate::storage::{Storage, HISTORY_KEY};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_secs(5);

// ==========================================
// 1. 数据模型
// ==========================================

/// 被分析内容的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Video,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Video => "video",
        }
    }
}

/// 历史记录条目：检测结果 + 身份与展示信息。
///
/// 身份只看 `id`，集合内不允许重复。条目创建后不会被原地修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(flatten)]
    pub result: DetectionResult,
    pub id: String,
    /// 毫秒级 Unix 时间戳
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub preview: String,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history item '{0}' already exists")]
    DuplicateId(String),

    #[error("No items to export")]
    NothingToExport,

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV export failed: {0}")]
    Export(String),
}

// ==========================================
// 2. ID 生成
// ==========================================

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// 生成历史条目 ID: `{毫秒时间戳}-{进程内单调计数}-{9 位 base36 随机串}`。
///
/// 同一进程内靠计数器保证唯一，跨进程靠时间戳 + 随机后缀。
pub fn generate_id() -> String {
    let seq = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}-{}-{}", Utc::now().timestamp_millis(), seq, suffix)
}

/// 按 id 去重，保留第一次出现的条目。返回 (去重后集合, 被移除的数量)。
pub fn dedupe_by_id(items: Vec<HistoryItem>) -> (Vec<HistoryItem>, usize) {
    let original_len = items.len();
    let mut seen = HashSet::with_capacity(original_len);
    let unique: Vec<HistoryItem> = items
        .into_iter()
        .filter(|item| {
            if seen.insert(item.id.clone()) {
                true
            } else {
                warn!("Removing duplicate history item: {}", item.id);
                false
            }
        })
        .collect();
    let removed = original_len - unique.len();
    (unique, removed)
}

// ==========================================
// 3. 撤销 (Undo)
// ==========================================

/// `delete` 返回的撤销凭据。只对最近一次删除有效。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoHandle {
    token: u64,
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOutcome {
    /// 已放回集合首位
    Restored,
    /// 集合里已有同 id 条目，放弃恢复
    AlreadyPresent,
    /// 宽限期已过
    Expired,
    /// 没有与该凭据对应的待撤销删除 (已被新删除顶替、被清空、或已撤销过)
    NotPending,
}

struct PendingUndo {
    token: u64,
    item: HistoryItem,
    deadline: Instant,
}

/// 汇总统计
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStats {
    pub total: usize,
    pub ai: usize,
    pub real: usize,
    pub average_confidence: Option<f64>,
}

// ==========================================
// 4. 历史仓库 (History Store)
// ==========================================

/// 历史记录仓库
///
/// **职责**: 维护内存中的历史集合 (最新在前) 及其在客户端存储里的镜像。
///
/// - 内存集合是本次会话的权威数据；持久化失败只会产生一条错误提示，不会回滚内存。
/// - 同一时刻最多只有一个待撤销的删除，新的删除或清空会直接作废旧的。
/// - 所有变更都经过 `&mut self`，天然串行。
pub struct HistoryStore {
    storage: Arc<dyn Storage>,
    items: Vec<HistoryItem>,
    current_page: usize,
    page_size: usize,
    undo_window: Duration,
    pending: Option<PendingUndo>,
    next_token: u64,
    notices: Notices,
}

impl HistoryStore {
    /// 从存储加载历史。
    ///
    /// 解析失败视为空集合并删除损坏的记录；发现重复 id 时去重并回写清理后的集合。
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let mut store = Self {
            storage,
            items: Vec::new(),
            current_page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            undo_window: DEFAULT_UNDO_WINDOW,
            pending: None,
            next_token: 0,
            notices: Notices::default(),
        };
        store.items = store.read_persisted();
        info!("Loaded {} history items", store.items.len());
        store
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_undo_window(mut self, window: Duration) -> Self {
        self.undo_window = window;
        self
    }

    fn read_persisted(&mut self) -> Vec<HistoryItem> {
        let raw = match self.storage.get(HISTORY_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!("Error loading history from storage: {}", e);
                self.notices.push(Notice::error("Failed to load history"));
                return Vec::new();
            }
        };

        let parsed: Vec<HistoryItem> = match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                error!("Error parsing stored history, discarding it: {}", e);
                if let Err(e) = self.storage.remove(HISTORY_KEY) {
                    warn!("Failed to remove corrupt history record: {}", e);
                }
                return Vec::new();
            }
        };

        let (unique, removed) = dedupe_by_id(parsed);
        if removed > 0 {
            warn!("Removed {} duplicate history items", removed);
            self.write(&unique);
        }
        unique
    }

    fn write(&mut self, items: &[HistoryItem]) -> bool {
        let result = serde_json::to_string(items)
            .map_err(|e| e.to_string())
            .and_then(|json| self.storage.set(HISTORY_KEY, &json).map_err(|e| e.to_string()));
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Error saving history to storage: {}", e);
                self.notices.push(Notice::error("Failed to save history"));
                false
            }
        }
    }

    fn persist(&mut self) -> bool {
        let items = std::mem::take(&mut self.items);
        let ok = self.write(&items);
        self.items = items;
        ok
    }

    // ---------- 读取 ----------

    pub fn items(&self) -> &[HistoryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&HistoryItem> {
        self.items.iter().find(|item| item.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// 取走待展示的提示。
    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain()
    }

    // ---------- 写入 ----------

    /// 新条目放到最前面并持久化。
    pub fn add(&mut self, item: HistoryItem) -> Result<(), HistoryError> {
        if self.contains(&item.id) {
            return Err(HistoryError::DuplicateId(item.id));
        }
        debug!("Adding history item {}", item.id);
        self.items.insert(0, item);
        self.persist();
        Ok(())
    }

    /// 软删除：立即从集合移除并持久化，条目在宽限期内暂存以便撤销。
    ///
    /// 找不到 id 时返回 `None`，集合不变。
    pub fn delete(&mut self, id: &str) -> Option<UndoHandle> {
        let pos = self.items.iter().position(|item| item.id == id)?;
        let item = self.items.remove(pos);
        self.persist();

        if let Some(previous) = self.pending.take() {
            debug!("Pending undo for {} superseded", previous.item.id);
        }

        self.next_token += 1;
        let handle = UndoHandle { token: self.next_token, id: item.id.clone() };
        self.pending = Some(PendingUndo {
            token: self.next_token,
            item,
            deadline: Instant::now() + self.undo_window,
        });
        self.notices.push(Notice::success("Item deleted"));
        info!("Deleted history item {}", handle.id);

        // 删掉最后一页唯一的条目时，页码往前退
        let total = self.total_pages();
        if self.current_page > total {
            self.current_page = total.max(1);
        }

        Some(handle)
    }

    /// 撤销删除。
    ///
    /// 待撤销槽位在第一次调用时就被取走，同一动作重复触发只会恢复一次。
    pub fn undo(&mut self, handle: &UndoHandle) -> UndoOutcome {
        let pending = match self.pending.take() {
            Some(pending) if pending.token == handle.token => pending,
            other => {
                self.pending = other;
                return UndoOutcome::NotPending;
            }
        };

        if Instant::now() >= pending.deadline {
            debug!("Undo window for {} already elapsed", pending.item.id);
            return UndoOutcome::Expired;
        }

        if self.contains(&pending.item.id) {
            self.notices.push(Notice::error("Item already exists in history"));
            return UndoOutcome::AlreadyPresent;
        }

        info!("Restored history item {}", pending.item.id);
        self.items.insert(0, pending.item);
        self.persist();
        self.current_page = 1;
        self.notices.push(Notice::success("Item restored"));
        UndoOutcome::Restored
    }

    /// 当前仍可撤销的删除 (宽限期内)。
    pub fn pending_undo(&self) -> Option<UndoHandle> {
        self.pending
            .as_ref()
            .filter(|pending| Instant::now() < pending.deadline)
            .map(|pending| UndoHandle { token: pending.token, id: pending.item.id.clone() })
    }

    /// 宽限期结束后丢弃暂存条目。返回是否有条目被永久删除。
    pub fn expire_pending(&mut self) -> bool {
        match &self.pending {
            Some(pending) if Instant::now() >= pending.deadline => {
                debug!("Permanently dropping {}", pending.item.id);
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// 清空全部历史，同时作废待撤销的删除。
    pub fn clear(&mut self) {
        self.items.clear();
        self.pending = None;
        self.current_page = 1;
        match self.storage.remove(HISTORY_KEY) {
            Ok(()) => {
                info!("History cleared");
                self.notices.push(Notice::success("History cleared successfully"));
            }
            Err(e) => {
                error!("Error clearing history: {}", e);
                self.notices.push(Notice::error("Failed to clear history"));
            }
        }
    }

    // ---------- 分页 ----------

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_pages(&self) -> usize {
        self.items.len().div_ceil(self.page_size)
    }

    /// 跳到第 `page` 页，超出范围时夹到 `[1, max(1, total_pages)]`。
    pub fn set_page(&mut self, page: usize) {
        self.current_page = page.clamp(1, self.total_pages().max(1));
    }

    pub fn next_page(&mut self) {
        self.set_page(self.current_page + 1);
    }

    pub fn prev_page(&mut self) {
        self.set_page(self.current_page.saturating_sub(1));
    }

    /// 当前页的条目：`[(p-1)*size, p*size)`
    pub fn current_items(&self) -> &[HistoryItem] {
        let start = ((self.current_page - 1) * self.page_size).min(self.items.len());
        let end = (start + self.page_size).min(self.items.len());
        &self.items[start..end]
    }

    // ---------- 查询与导出 ----------

    /// 大小写不敏感地匹配预览、类型和标签。空查询返回全部。
    pub fn search(&self, query: &str) -> Vec<&HistoryItem> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.items.iter().collect();
        }
        self.items
            .iter()
            .filter(|item| {
                item.preview.to_lowercase().contains(&query)
                    || item.kind.as_str().contains(&query)
                    || item.result.label.as_str().to_lowercase().contains(&query)
            })
            .collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let ai = self.items.iter().filter(|item| item.result.label == Label::Ai).count();
        let average_confidence = if self.items.is_empty() {
            None
        } else {
            let sum: f64 = self.items.iter().map(|item| item.result.confidence).sum();
            Some(sum / self.items.len() as f64)
        };
        HistoryStats {
            total: self.items.len(),
            ai,
            real: self.items.len() - ai,
            average_confidence,
        }
    }
}

/// 导出 CSV: `ID,Type,Result,Confidence,Date,Preview`
pub fn export_csv<'a, I>(items: I) -> Result<String, HistoryError>
where
    I: IntoIterator<Item = &'a HistoryItem>,
{
    let mut items = items.into_iter().peekable();
    if items.peek().is_none() {
        return Err(HistoryError::NothingToExport);
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["ID", "Type", "Result", "Confidence", "Date", "Preview"])?;
    for item in items {
        let date = DateTime::<Utc>::from_timestamp_millis(item.timestamp)
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let confidence = format!("{:.1}%", item.result.confidence);
        writer.write_record([
            item.id.as_str(),
            item.kind.as_str(),
            item.result.label.as_str(),
            confidence.as_str(),
            date.as_str(),
            item.preview.as_str(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| HistoryError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| HistoryError::Export(e.to_string()))
}

/// 导出文件名，形如 `authenticity_history_2026-10-19.csv`
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("authenticity_history_{}.csv", now.format("%Y-%m-%d"))
}
