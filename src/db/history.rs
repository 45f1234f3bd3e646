//! 历史条目子模块
//!
//! ## 职责
//! - 插入条目，并在同一事务内执行保留策略
//! - 分页 / 过滤 / 搜索查询（按 `created_at` 倒序）
//! - 收藏切换、单条删除、批量清空、统计
//!
//! ## 时间戳
//! - 以 RFC 3339 UTC 文本存储，固定微秒精度（`2026-01-01T00:00:00.000000Z`），
//!   字典序即时间序，可直接用于 `ORDER BY` 与范围比较
//!
//! ## 错误语义
//! - SQLite 失败统一映射为 `AppError::StorageUnavailable`
//! - 切换收藏时条目不存在返回 `AppError::NotFound`
//! - 删除不存在的条目不是错误，返回 `false`

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction};

use crate::clipboard::ContentKind;
use crate::error::AppError;

use super::retention::{self, RetentionPolicy};
use super::{HistoryItem, HistoryStats, HistoryStore, CONTAINS_CI_FN};

/// 查询过滤条件，各条件之间为 AND 关系
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    pub kind: Option<ContentKind>,
    pub favorite_only: bool,
    /// 大小写不敏感子串，只作用于文本条目
    pub text_contains: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub tag_id: Option<i64>,
}

impl HistoryFilter {
    pub fn kind(mut self, kind: ContentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn favorites(mut self) -> Self {
        self.favorite_only = true;
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.text_contains = Some(text.into());
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn tag(mut self, tag_id: i64) -> Self {
        self.tag_id = Some(tag_id);
        self
    }

    fn search_text(&self) -> Option<&str> {
        self.text_contains.as_deref().filter(|s| !s.is_empty())
    }

    /// 文本搜索与非文本类型过滤互斥，组合后必然为空
    fn is_unsatisfiable(&self) -> bool {
        self.search_text().is_some() && matches!(self.kind, Some(k) if k != ContentKind::Text)
    }
}

// ============================================================================
// 时间戳编解码
// ============================================================================

/// 截断到存储精度，保证写入值与读回值一致
pub fn normalize_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    // 兼容不带时区的本地时间（ISO-8601 `T` 或空格分隔）
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            if let Some(local) = naive.and_local_timezone(Local).earliest() {
                return local.with_timezone(&Utc);
            }
        }
    }
    log::warn!("无法解析时间戳 '{}'，按 UNIX 纪元处理", raw);
    DateTime::<Utc>::UNIX_EPOCH
}

fn map_item(row: &Row<'_>) -> rusqlite::Result<HistoryItem> {
    let timestamp: String = row.get(1)?;
    let data_type: String = row.get(2)?;
    let payload = match row.get_ref(3)? {
        ValueRef::Blob(b) | ValueRef::Text(b) => b.to_vec(),
        _ => Vec::new(),
    };
    Ok(HistoryItem {
        id: row.get(0)?,
        kind: ContentKind::from_db(&data_type),
        payload,
        created_at: parse_timestamp(&timestamp),
        favorite: row.get(4)?,
    })
}

// ============================================================================
// SQL 操作
// ============================================================================

fn run_retention(tx: &mut Transaction<'_>, policy: &RetentionPolicy, now: DateTime<Utc>) {
    let savepoint = match tx.savepoint() {
        Ok(sp) => sp,
        Err(e) => {
            log::warn!("创建保留策略保存点失败，本次跳过清理: {}", e);
            return;
        }
    };

    match retention::enforce(&savepoint, policy, now) {
        Ok(_) => {
            if let Err(e) = savepoint.commit() {
                log::warn!("提交保留策略清理失败，历史暂时超出上限: {}", e);
            }
        }
        // 保存点随 drop 回滚，新插入的条目保留
        Err(e) => log::warn!("保留策略清理失败，历史暂时超出上限: {}", e),
    }
}

fn insert_item(
    conn: &Connection,
    kind: ContentKind,
    payload: &[u8],
    captured_at: DateTime<Utc>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<i64, AppError> {
    let mut tx = conn
        .unchecked_transaction()
        .map_err(|e| AppError::StorageUnavailable(format!("开始事务失败: {}", e)))?;

    tx.execute(
        "INSERT INTO clipboard_items (timestamp, data_type, content, favorite) VALUES (?1, ?2, ?3, 0)",
        params![format_timestamp(captured_at), kind.as_str(), payload],
    )
    .map_err(|e| AppError::StorageUnavailable(format!("插入记录失败: {}", e)))?;
    let id = tx.last_insert_rowid();

    run_retention(&mut tx, policy, now);

    tx.commit()
        .map_err(|e| AppError::StorageUnavailable(format!("提交事务失败: {}", e)))?;
    Ok(id)
}

fn query_items(
    conn: &Connection,
    filter: &HistoryFilter,
    limit: Option<usize>,
    offset: usize,
) -> Result<Vec<HistoryItem>, AppError> {
    if filter.is_unsatisfiable() {
        return Ok(Vec::new());
    }

    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(kind) = filter.kind {
        clauses.push("data_type = ?".to_string());
        args.push(Value::Text(kind.as_str().to_string()));
    }
    if filter.favorite_only {
        clauses.push("favorite = 1".to_string());
    }
    if let Some(text) = filter.search_text() {
        clauses.push(format!("(data_type = 'text' AND {}(content, ?))", CONTAINS_CI_FN));
        args.push(Value::Text(text.to_string()));
    }
    if let Some(after) = filter.created_after {
        clauses.push("timestamp > ?".to_string());
        args.push(Value::Text(format_timestamp(after)));
    }
    if let Some(tag_id) = filter.tag_id {
        clauses.push("id IN (SELECT item_id FROM item_tags WHERE tag_id = ?)".to_string());
        args.push(Value::Integer(tag_id));
    }

    let mut sql =
        String::from("SELECT id, timestamp, data_type, content, favorite FROM clipboard_items");
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?");
    args.push(Value::Integer(limit.map(|l| l as i64).unwrap_or(-1)));
    args.push(Value::Integer(offset as i64));

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| AppError::StorageUnavailable(format!("准备查询失败: {}", e)))?;

    let items = stmt
        .query_map(params_from_iter(args.iter()), map_item)
        .map_err(|e| AppError::StorageUnavailable(format!("查询历史失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::StorageUnavailable(format!("读取行失败: {}", e)))?;

    Ok(items)
}

fn get_item(conn: &Connection, id: i64) -> Result<HistoryItem, AppError> {
    conn.query_row(
        "SELECT id, timestamp, data_type, content, favorite FROM clipboard_items WHERE id = ?1",
        params![id],
        map_item,
    )
    .optional()
    .map_err(|e| AppError::StorageUnavailable(format!("查询条目失败: {}", e)))?
    .ok_or(AppError::NotFound(id))
}

fn toggle_favorite(conn: &Connection, id: i64) -> Result<bool, AppError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| AppError::StorageUnavailable(format!("开始事务失败: {}", e)))?;

    let current: bool = tx
        .query_row(
            "SELECT favorite FROM clipboard_items WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| AppError::StorageUnavailable(format!("查询收藏状态失败: {}", e)))?
        .ok_or(AppError::NotFound(id))?;

    let new_val = !current;
    tx.execute(
        "UPDATE clipboard_items SET favorite = ?1 WHERE id = ?2",
        params![new_val, id],
    )
    .map_err(|e| AppError::StorageUnavailable(format!("切换收藏失败: {}", e)))?;

    tx.commit()
        .map_err(|e| AppError::StorageUnavailable(format!("提交事务失败: {}", e)))?;
    Ok(new_val)
}

fn delete_item(conn: &Connection, id: i64) -> Result<bool, AppError> {
    let changed = conn
        .execute("DELETE FROM clipboard_items WHERE id = ?1", params![id])
        .map_err(|e| AppError::StorageUnavailable(format!("删除记录失败: {}", e)))?;
    Ok(changed > 0)
}

fn clear_items(conn: &Connection, keep_favorites: bool) -> Result<usize, AppError> {
    let sql = if keep_favorites {
        "DELETE FROM clipboard_items WHERE favorite = 0"
    } else {
        "DELETE FROM clipboard_items"
    };
    conn.execute(sql, [])
        .map_err(|e| AppError::StorageUnavailable(format!("清空历史失败: {}", e)))
}

fn count(conn: &Connection, sql: &str, args: &[Value], what: &str) -> Result<i64, AppError> {
    conn.query_row(sql, params_from_iter(args.iter()), |row| row.get(0))
        .map_err(|e| AppError::StorageUnavailable(format!("查询{}失败: {}", what, e)))
}

fn get_stats(conn: &Connection) -> Result<HistoryStats, AppError> {
    let start_of_day = {
        let now = Local::now();
        now.date_naive()
            .and_time(NaiveTime::MIN)
            .and_local_timezone(Local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now.with_timezone(&Utc) - chrono::Duration::days(1))
    };

    let by_kind = |kind: ContentKind| {
        count(
            conn,
            "SELECT COUNT(*) FROM clipboard_items WHERE data_type = ?1",
            &[Value::Text(kind.as_str().to_string())],
            "分类数",
        )
    };

    Ok(HistoryStats {
        total: count(conn, "SELECT COUNT(*) FROM clipboard_items", &[], "总数")?,
        today: count(
            conn,
            "SELECT COUNT(*) FROM clipboard_items WHERE timestamp >= ?1",
            &[Value::Text(format_timestamp(start_of_day))],
            "今日数",
        )?,
        favorites: count(
            conn,
            "SELECT COUNT(*) FROM clipboard_items WHERE favorite = 1",
            &[],
            "收藏数",
        )?,
        text: by_kind(ContentKind::Text)?,
        images: by_kind(ContentKind::Image)?,
        files: by_kind(ContentKind::FileList)?,
    })
}

// ============================================================================
// 对外接口
// ============================================================================

impl HistoryStore {
    /// 插入一条新记录并同步执行保留策略，返回新条目 ID
    ///
    /// 返回时历史已满足当前策略；清理失败只记录日志，不影响新条目。
    /// `captured_at` 早于按时间清理的截止点时，新条目会在同一次插入中被淘汰。
    pub fn insert(
        &self,
        kind: ContentKind,
        payload: &[u8],
        captured_at: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        let policy = self.retention_policy();
        let id = self.with_conn(|conn| {
            insert_item(conn, kind, payload, captured_at, &policy, Utc::now())
        })?;
        log::debug!("已写入 {} 条目 id={}", kind, id);
        Ok(id)
    }

    /// 按过滤条件查询，`created_at` 倒序；`limit` 为 `None` 时不限数量
    pub fn query(
        &self,
        filter: &HistoryFilter,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<HistoryItem>, AppError> {
        self.with_conn(|conn| query_items(conn, filter, limit, offset))
    }

    pub fn get(&self, id: i64) -> Result<HistoryItem, AppError> {
        self.with_conn(|conn| get_item(conn, id))
    }

    /// 翻转收藏状态并返回新值
    pub fn toggle_favorite(&self, id: i64) -> Result<bool, AppError> {
        let favorite = self.with_conn(|conn| toggle_favorite(conn, id))?;
        log::info!("条目 {} 收藏状态已切换为 {}", id, favorite);
        Ok(favorite)
    }

    /// 删除单条记录；条目不存在时返回 `Ok(false)`
    pub fn delete(&self, id: i64) -> Result<bool, AppError> {
        self.with_conn(|conn| delete_item(conn, id))
    }

    /// 清空历史，返回删除数量
    pub fn clear(&self, keep_favorites: bool) -> Result<usize, AppError> {
        let removed = self.with_conn(|conn| clear_items(conn, keep_favorites))?;
        log::info!("已清空历史 {} 条（保留收藏: {}）", removed, keep_favorites);
        Ok(removed)
    }

    pub fn stats(&self) -> Result<HistoryStats, AppError> {
        self.with_conn(get_stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{format_timestamp, normalize_timestamp, parse_timestamp, HistoryFilter};
    use crate::clipboard::ContentKind;
    use crate::db::{HistoryStore, RetentionPolicy};
    use crate::error::AppError;

    fn recent(offset_secs: i64) -> DateTime<Utc> {
        normalize_timestamp(Utc::now() - Duration::minutes(10) + Duration::seconds(offset_secs))
    }

    fn texts(items: &[crate::db::HistoryItem]) -> Vec<String> {
        items.iter().filter_map(|i| i.text()).collect()
    }

    #[test]
    fn timestamp_text_roundtrips_and_sorts_lexicographically() {
        let a = Utc.with_ymd_and_hms(2026, 3, 9, 8, 0, 0).single().expect("date");
        let b = a + Duration::milliseconds(1500);
        assert_eq!(parse_timestamp(&format_timestamp(a)), a);
        assert!(format_timestamp(a) < format_timestamp(b));
        assert_eq!(format_timestamp(a), "2026-03-09T08:00:00.000000Z");
    }

    #[test]
    fn unparseable_timestamp_falls_back_to_epoch() {
        assert_eq!(parse_timestamp("yesterday"), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn query_orders_newest_first_and_filters_by_kind_and_search() {
        let store = HistoryStore::open_in_memory().expect("open store");
        store.insert(ContentKind::Text, b"alpha", recent(0)).expect("insert alpha");
        store.insert(ContentKind::Text, b"beta", recent(1)).expect("insert beta");
        store
            .insert(ContentKind::Image, &[0xFF, 0xD8, 0xFF, 0xE0], recent(2))
            .expect("insert image");

        let text_only = store
            .query(&HistoryFilter::default().kind(ContentKind::Text), None, 0)
            .expect("query text");
        assert_eq!(texts(&text_only), vec!["beta", "alpha"]);

        let searched = store
            .query(&HistoryFilter::default().search("ALP"), None, 0)
            .expect("search");
        assert_eq!(texts(&searched), vec!["alpha"]);

        let all = store.query(&HistoryFilter::default(), None, 0).expect("query all");
        assert_eq!(all[0].kind, ContentKind::Image);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn search_combined_with_non_text_kind_is_empty() {
        let store = HistoryStore::open_in_memory().expect("open store");
        store.insert(ContentKind::Image, b"x-image", recent(0)).expect("insert");
        store.insert(ContentKind::FileList, b"C:\\x.txt", recent(1)).expect("insert");

        let image = store
            .query(&HistoryFilter::default().kind(ContentKind::Image).search("x"), None, 0)
            .expect("query");
        assert!(image.is_empty());

        let untyped = store.query(&HistoryFilter::default().search("x"), None, 0).expect("query");
        assert!(untyped.is_empty(), "search only applies to text rows");
    }

    #[test]
    fn limit_offset_and_created_after_compose() {
        let store = HistoryStore::open_in_memory().expect("open store");
        for i in 0..5 {
            store
                .insert(ContentKind::Text, format!("item-{i}").as_bytes(), recent(i))
                .expect("insert");
        }

        let page = store.query(&HistoryFilter::default(), Some(2), 1).expect("page");
        assert_eq!(texts(&page), vec!["item-3", "item-2"]);

        let after = store
            .query(&HistoryFilter::default().created_after(recent(2)), None, 0)
            .expect("after");
        assert_eq!(texts(&after), vec!["item-4", "item-3"]);
    }

    #[test]
    fn toggle_favorite_alternates_and_reports_missing_ids() {
        let store = HistoryStore::open_in_memory().expect("open store");
        let id = store.insert(ContentKind::Text, b"fav", recent(0)).expect("insert");

        assert!(store.toggle_favorite(id).expect("first toggle"));
        assert!(!store.toggle_favorite(id).expect("second toggle"));
        assert!(!store.get(id).expect("get").favorite);

        assert!(matches!(store.toggle_favorite(id + 100), Err(AppError::NotFound(_))));
    }

    #[test]
    fn delete_is_idempotent() {
        let store = HistoryStore::open_in_memory().expect("open store");
        let id = store.insert(ContentKind::Text, b"bye", recent(0)).expect("insert");
        assert!(store.delete(id).expect("delete"));
        assert!(!store.delete(id).expect("delete again"));
        assert!(matches!(store.get(id), Err(AppError::NotFound(_))));
    }

    #[test]
    fn clear_keeps_favorites_when_requested() {
        let store = HistoryStore::open_in_memory().expect("open store");
        let fav = store.insert(ContentKind::Text, b"keep", recent(0)).expect("insert");
        store.insert(ContentKind::Text, b"drop", recent(1)).expect("insert");
        store.toggle_favorite(fav).expect("favorite");

        assert_eq!(store.clear(true).expect("clear"), 1);
        assert_eq!(store.get(fav).expect("favorite survives").id, fav);
        assert_eq!(store.clear(false).expect("clear all"), 1);
        assert!(store.query(&HistoryFilter::default(), None, 0).expect("query").is_empty());
    }

    #[test]
    fn insert_enforces_count_cap_before_returning() {
        let store = HistoryStore::open_in_memory().expect("open store");
        store.set_retention_policy(RetentionPolicy::new(2, 0)).expect("set policy");

        for (i, name) in ["A", "B", "C"].iter().enumerate() {
            store
                .insert(ContentKind::Text, name.as_bytes(), recent(i as i64))
                .expect("insert");
        }

        let all = store.query(&HistoryFilter::default(), None, 0).expect("query");
        assert_eq!(texts(&all), vec!["C", "B"]);
    }

    #[test]
    fn ids_are_never_reused() {
        let store = HistoryStore::open_in_memory().expect("open store");
        let first = store.insert(ContentKind::Text, b"one", recent(0)).expect("insert");
        store.delete(first).expect("delete");
        let second = store.insert(ContentKind::Text, b"two", recent(1)).expect("insert");
        assert!(second > first);
    }

    #[test]
    fn stats_count_by_kind_and_favorite() {
        let store = HistoryStore::open_in_memory().expect("open store");
        let id = store.insert(ContentKind::Text, b"t", Utc::now()).expect("insert");
        store.insert(ContentKind::Image, b"i", Utc::now()).expect("insert");
        store.insert(ContentKind::FileList, b"f", Utc::now()).expect("insert");
        store.toggle_favorite(id).expect("favorite");

        let stats = store.stats().expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.favorites, 1);
        assert_eq!((stats.text, stats.images, stats.files), (1, 1, 1));
        assert_eq!(stats.today, 3);
    }
}
