//! 剪贴板历史门面
//!
//! # 设计思路
//!
//! `ClipboardHistory` 把检测器产出的变化直接写入 `HistoryStore`，
//! 并向 UI / CLI 暴露查询、收藏、删除、清空、还原、导出与运行时配置。
//!
//! ```text
//! 轮询任务 ──read──▶ ChangeDetector ──DetectedChange──▶ HistoryStore.insert
//!                                                           │ 提交后
//!                                                           ▼
//!                                              broadcast: HistoryEvent::NewItem
//! ```
//!
//! # 实现思路
//!
//! - 通知通过 `tokio::sync::broadcast` 发送，只在写入事务提交之后发送 `NewItem`。
//! - 存储失败不终止轮询：记录日志、广播 `StorageError`，本次捕获的内容丢弃。
//! - 监控类型与保留策略的修改立即生效并写回 `settings` 表；轮询间隔在下次启动时生效。

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::clipboard::monitor::{
    self, normalize_read_timeout_ms, SharedSource, READ_TIMEOUT_DEFAULT_MS,
};
use crate::clipboard::{
    ChangeDetector, ClipContent, ClipboardSink, ClipboardSnapshot, ClipboardSource, ContentKind,
    DetectedChange, MonitorHandle, MonitoredKinds, SystemClipboard,
};
use crate::db::{
    normalize_timestamp, HistoryFilter, HistoryItem, HistoryStats, HistoryStore, RetentionPolicy,
    Tag,
};
use crate::error::AppError;
use crate::export::{self, ExportFormat};
use crate::settings::{normalize_poll_interval_ms, Settings};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 推送给 UI 的历史事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    /// 新条目已提交
    NewItem {
        id: i64,
        kind: ContentKind,
        payload: Vec<u8>,
        captured_at: DateTime<Utc>,
    },
    /// 历史暂时不可用，新内容未被保存
    StorageError { message: String },
    MonitoringStarted,
    MonitoringStopped,
}

struct Shared {
    store: HistoryStore,
    detector: Mutex<ChangeDetector>,
    source: SharedSource,
    sink: Mutex<Box<dyn ClipboardSink>>,
    settings: RwLock<Settings>,
    events: broadcast::Sender<HistoryEvent>,
    read_timeout_ms: AtomicU64,
}

impl Shared {
    fn detector(&self) -> MutexGuard<'_, ChangeDetector> {
        match self.detector.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("检测器锁中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    fn settings(&self) -> Settings {
        match self.settings.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update_settings(&self, update: impl FnOnce(&mut Settings)) -> Settings {
        let mut guard = match self.settings.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut guard);
        *guard
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.load(Ordering::Relaxed))
    }

    fn emit(&self, event: HistoryEvent) {
        // 没有订阅者时发送失败，属于正常情况
        let _ = self.events.send(event);
    }

    fn handle_snapshot(&self, snapshot: ClipboardSnapshot, now: DateTime<Utc>) -> Option<i64> {
        let change = self.detector().observe(snapshot, now)?;
        self.record(change)
    }

    fn record(&self, change: DetectedChange) -> Option<i64> {
        let kind = change.content.kind();
        let payload = match change.content.encode() {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("编码 {} 内容失败，跳过: {}", kind, e);
                return None;
            }
        };
        let captured_at = normalize_timestamp(change.captured_at);

        match self.store.insert(kind, &payload, captured_at) {
            Ok(id) => {
                log::info!("📋 已记录 {} 条目 id={}: {}", kind, id, change.content.summary());
                self.emit(HistoryEvent::NewItem {
                    id,
                    kind,
                    payload,
                    captured_at,
                });
                Some(id)
            }
            Err(e) => {
                log::error!("保存剪贴板内容失败，历史暂不可用: {}", e);
                self.emit(HistoryEvent::StorageError {
                    message: e.to_string(),
                });
                None
            }
        }
    }
}

/// 剪贴板历史门面
pub struct ClipboardHistory {
    shared: Arc<Shared>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl ClipboardHistory {
    /// 打开数据库并使用系统剪贴板
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        let store = HistoryStore::open(db_path)?;
        Self::with_parts(store, SystemClipboard::new(), SystemClipboard::new())
    }

    /// 使用指定的存储与剪贴板读写实现（测试中传入内存假实现）
    ///
    /// 从 `settings` 表恢复运行时设置，并按保存的保留策略清理一次。
    pub fn with_parts(
        store: HistoryStore,
        source: impl ClipboardSource + 'static,
        sink: impl ClipboardSink + 'static,
    ) -> Result<Self, AppError> {
        let settings = Settings::load(&store)?;
        let evicted = store.set_retention_policy(settings.retention)?;
        if evicted > 0 {
            log::info!("启动时按保留策略清理 {} 条", evicted);
        }

        let source: Box<dyn ClipboardSource> = Box::new(source);
        let sink: Box<dyn ClipboardSink> = Box::new(sink);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                detector: Mutex::new(ChangeDetector::new(settings.monitored)),
                source: Arc::new(Mutex::new(source)),
                sink: Mutex::new(sink),
                settings: RwLock::new(settings),
                events,
                read_timeout_ms: AtomicU64::new(READ_TIMEOUT_DEFAULT_MS),
            }),
            monitor: Mutex::new(None),
        })
    }

    pub fn store(&self) -> &HistoryStore {
        &self.shared.store
    }

    pub fn settings(&self) -> Settings {
        self.shared.settings()
    }

    /// 订阅历史事件
    pub fn subscribe(&self) -> broadcast::Receiver<HistoryEvent> {
        self.shared.events.subscribe()
    }

    // ------------------------------------------------------------------------
    // 查询与修改
    // ------------------------------------------------------------------------

    pub fn query(
        &self,
        filter: &HistoryFilter,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<HistoryItem>, AppError> {
        self.shared.store.query(filter, limit, offset)
    }

    pub fn get(&self, id: i64) -> Result<HistoryItem, AppError> {
        self.shared.store.get(id)
    }

    pub fn toggle_favorite(&self, id: i64) -> Result<bool, AppError> {
        self.shared.store.toggle_favorite(id)
    }

    pub fn delete(&self, id: i64) -> Result<bool, AppError> {
        self.shared.store.delete(id)
    }

    pub fn clear(&self, keep_favorites: bool) -> Result<usize, AppError> {
        self.shared.store.clear(keep_favorites)
    }

    pub fn stats(&self) -> Result<HistoryStats, AppError> {
        self.shared.store.stats()
    }

    pub fn all_tags(&self) -> Result<Vec<Tag>, AppError> {
        self.shared.store.all_tags()
    }

    /// 按名称为条目打标签，标签不存在时自动创建
    pub fn tag_item(&self, item_id: i64, tag_name: &str) -> Result<Tag, AppError> {
        let tag = self.shared.store.create_tag(tag_name)?;
        self.shared.store.tag_item(item_id, tag.id)?;
        Ok(tag)
    }

    /// 按名称移除条目标签；标签不存在时返回 `false`
    pub fn untag_item(&self, item_id: i64, tag_name: &str) -> Result<bool, AppError> {
        match self.shared.store.find_tag(tag_name)? {
            Some(tag) => {
                self.shared.store.untag_item(item_id, tag.id)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn item_tags(&self, item_id: i64) -> Result<Vec<Tag>, AppError> {
        self.shared.store.item_tags(item_id)
    }

    /// 把条目写回系统剪贴板
    ///
    /// 写入期间持有检测器锁，并把写入的内容填入检测器槽位，还原操作不会被再次捕获。
    /// 文件列表以换行连接的文本写回。
    pub fn restore(&self, id: i64) -> Result<(), AppError> {
        let item = self.shared.store.get(id)?;
        let content = item.content()?;
        let expected = match &content {
            ClipContent::FileList(files) => ClipContent::Text(files.join("\n")),
            other => other.clone(),
        };

        let mut detector = self.shared.detector();
        {
            let mut sink = self
                .shared
                .sink
                .lock()
                .map_err(|e| AppError::Clipboard(format!("获取剪贴板写入锁失败: {}", e)))?;
            sink.write(&content)?;
        }
        detector.prime(expected);
        log::info!("已还原条目 {} 到剪贴板: {}", id, content.summary());
        Ok(())
    }

    pub fn export<W: Write>(
        &self,
        filter: &HistoryFilter,
        format: ExportFormat,
        writer: W,
    ) -> Result<usize, AppError> {
        let items = self.shared.store.query(filter, None, 0)?;
        export::write_items(&items, format, writer)?;
        log::info!("已导出 {} 条历史（{}）", items.len(), format);
        Ok(items.len())
    }

    // ------------------------------------------------------------------------
    // 运行时配置
    // ------------------------------------------------------------------------

    /// 修改监控的内容类型，立即对下一次轮询生效
    pub fn set_monitored_kinds(&self, monitored: MonitoredKinds) -> Result<(), AppError> {
        self.shared.detector().set_monitored(monitored);
        let settings = self.shared.update_settings(|s| s.monitored = monitored);
        settings.save(&self.shared.store)
    }

    /// 修改保留策略并立即清理，返回清理的条目数
    pub fn set_retention_policy(
        &self,
        max_items: usize,
        auto_cleanup_days: i64,
    ) -> Result<usize, AppError> {
        let policy = RetentionPolicy::new(max_items, auto_cleanup_days);
        let evicted = self.shared.store.set_retention_policy(policy)?;
        let settings = self.shared.update_settings(|s| s.retention = policy);
        settings.save(&self.shared.store)?;
        Ok(evicted)
    }

    /// 修改轮询间隔，下次启动监控时生效
    pub fn set_poll_interval_ms(&self, interval_ms: u64) -> Result<u64, AppError> {
        let interval_ms = normalize_poll_interval_ms(interval_ms);
        let settings = self.shared.update_settings(|s| s.poll_interval_ms = interval_ms);
        settings.save(&self.shared.store)?;
        Ok(interval_ms)
    }

    /// 修改单次读取的超时，对运行中的轮询立即生效；不写入设置表
    pub fn set_read_timeout_ms(&self, timeout_ms: u64) -> u64 {
        let timeout_ms = normalize_read_timeout_ms(timeout_ms);
        self.shared.read_timeout_ms.store(timeout_ms, Ordering::Relaxed);
        timeout_ms
    }

    /// 一次性整体替换设置
    pub fn apply_settings(&self, settings: Settings) -> Result<usize, AppError> {
        self.set_monitored_kinds(settings.monitored)?;
        self.set_poll_interval_ms(settings.poll_interval_ms)?;
        self.set_retention_policy(settings.retention.max_items, settings.retention.auto_cleanup_days)
    }

    // ------------------------------------------------------------------------
    // 监控
    // ------------------------------------------------------------------------

    /// 同步执行一次检测，返回新写入的条目 ID
    pub fn poll_now(&self) -> Option<i64> {
        let snapshot = monitor::read_from(&self.shared.source);
        self.shared.handle_snapshot(snapshot, Utc::now())
    }

    pub fn is_monitoring(&self) -> bool {
        match self.monitor.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_finished()),
            Err(poisoned) => poisoned.into_inner().as_ref().is_some_and(|h| !h.is_finished()),
        }
    }

    /// 启动轮询；已在运行时不做任何事
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn start_monitoring(&self) -> Result<(), AppError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AppError::Config("启动监控需要 tokio 运行时".to_string()));
        }

        let mut slot = self
            .monitor
            .lock()
            .map_err(|e| AppError::Config(format!("获取监控状态锁失败: {}", e)))?;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            log::debug!("剪贴板监控已在运行");
            return Ok(());
        }

        self.shared.emit(HistoryEvent::MonitoringStarted);
        let period = self.shared.settings().poll_interval();
        let shared = Arc::clone(&self.shared);
        let handle = MonitorHandle::spawn(period, move || {
            let shared = Arc::clone(&shared);
            async move {
                let snapshot =
                    monitor::read_with_timeout(Arc::clone(&shared.source), shared.read_timeout())
                        .await;
                let now = Utc::now();
                let result = tokio::task::spawn_blocking(move || {
                    shared.handle_snapshot(snapshot, now);
                })
                .await;
                if let Err(e) = result {
                    log::error!("处理剪贴板快照的任务异常退出: {}", e);
                }
            }
        });

        *slot = Some(handle);
        Ok(())
    }

    /// 停止轮询并等待任务退出；返回后不会再有新的轮询
    pub async fn stop_monitoring(&self) {
        let handle = match self.monitor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.stop().await;
            self.shared.emit(HistoryEvent::MonitoringStopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::Utc;

    use super::{ClipboardHistory, HistoryEvent};
    use crate::clipboard::{ClipContent, ClipboardSink, ClipboardSnapshot, ClipboardSource};
    use crate::db::{HistoryFilter, HistoryStore};
    use crate::error::AppError;

    #[derive(Clone, Default)]
    struct FakeClipboard(Arc<Mutex<Option<ClipContent>>>);

    impl ClipboardSource for FakeClipboard {
        fn read(&mut self) -> ClipboardSnapshot {
            match self.0.lock().expect("fake clipboard lock").clone() {
                Some(content) => ClipboardSnapshot::Content(content),
                None => ClipboardSnapshot::Unknown,
            }
        }
    }

    impl ClipboardSink for FakeClipboard {
        fn write(&mut self, content: &ClipContent) -> Result<(), AppError> {
            *self.0.lock().expect("fake clipboard lock") = Some(content.clone());
            Ok(())
        }
    }

    #[test]
    fn storage_failure_is_broadcast_and_polling_continues() {
        let clipboard = FakeClipboard::default();
        let store = HistoryStore::open_in_memory().expect("open store");
        let history = ClipboardHistory::with_parts(store, clipboard.clone(), clipboard.clone())
            .expect("build history");
        let mut events = history.subscribe();

        history
            .store()
            .lock()
            .expect("lock")
            .execute_batch("DROP TABLE item_tags; DROP TABLE clipboard_items;")
            .expect("break storage");

        clipboard.clone().write(&ClipContent::Text("lost".to_string())).expect("write");
        assert_eq!(history.poll_now(), None);
        clipboard.clone().write(&ClipContent::Text("also lost".to_string())).expect("write");
        assert_eq!(history.poll_now(), None);

        for _ in 0..2 {
            match events.try_recv().expect("event") {
                HistoryEvent::StorageError { message } => assert!(!message.is_empty()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn new_item_event_follows_commit() {
        let clipboard = FakeClipboard::default();
        let store = HistoryStore::open_in_memory().expect("open store");
        let history = ClipboardHistory::with_parts(store, clipboard.clone(), clipboard.clone())
            .expect("build history");
        let mut events = history.subscribe();

        clipboard.clone().write(&ClipContent::Text("hello".to_string())).expect("write");
        let before = Utc::now();
        let id = history.poll_now().expect("captured");

        match events.try_recv().expect("event") {
            HistoryEvent::NewItem { id: event_id, payload, captured_at, .. } => {
                assert_eq!(event_id, id);
                assert_eq!(payload, b"hello".to_vec());
                let stored = history.get(id).expect("row visible when event is received");
                assert_eq!(stored.created_at, captured_at);
                assert!(captured_at <= Utc::now() && captured_at >= before - chrono::Duration::seconds(1));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(history.query(&HistoryFilter::default(), None, 0).expect("query").len(), 1);
    }
}
