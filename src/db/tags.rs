//! 标签管理子模块
//!
//! ## 职责
//! - 提供标签的增删查能力
//! - 管理历史条目与标签的关联关系（`item_tags`）
//!
//! ## 输入/输出
//! - 输入：标签名、条目/标签 ID
//! - 输出：`Tag`、`Vec<Tag>` 或 `Result<(), AppError>`
//!
//! ## 错误语义
//! - 标签查询与写入失败统一映射为 `AppError::StorageUnavailable`
//! - 关联不存在的条目返回 `AppError::NotFound`

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppError;

use super::{HistoryStore, Tag};

fn get_tags(conn: &Connection) -> Result<Vec<Tag>, AppError> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM tags ORDER BY name ASC")
        .map_err(|e| AppError::StorageUnavailable(format!("准备查询失败: {}", e)))?;

    let tags = stmt
        .query_map([], |row| Ok(Tag { id: row.get(0)?, name: row.get(1)? }))
        .map_err(|e| AppError::StorageUnavailable(format!("查询标签失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::StorageUnavailable(format!("读取行失败: {}", e)))?;

    Ok(tags)
}

fn find_tag(conn: &Connection, name: &str) -> Result<Option<Tag>, AppError> {
    conn.query_row(
        "SELECT id, name FROM tags WHERE name = ?1",
        params![name],
        |row| Ok(Tag { id: row.get(0)?, name: row.get(1)? }),
    )
    .optional()
    .map_err(|e| AppError::StorageUnavailable(format!("查询标签失败: {}", e)))
}

/// 同名标签已存在时直接返回已有标签
fn create_tag(conn: &Connection, name: &str) -> Result<Tag, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Config("标签名不能为空".to_string()));
    }
    if let Some(existing) = find_tag(conn, name)? {
        return Ok(existing);
    }

    conn.execute("INSERT INTO tags (name) VALUES (?1)", params![name])
        .map_err(|e| AppError::StorageUnavailable(format!("创建标签失败: {}", e)))?;

    Ok(Tag { id: conn.last_insert_rowid(), name: name.to_string() })
}

fn delete_tag(conn: &Connection, id: i64) -> Result<bool, AppError> {
    let changed = conn
        .execute("DELETE FROM tags WHERE id = ?1", params![id])
        .map_err(|e| AppError::StorageUnavailable(format!("删除标签失败: {}", e)))?;
    Ok(changed > 0)
}

fn add_tag_to_item(conn: &Connection, item_id: i64, tag_id: i64) -> Result<(), AppError> {
    let exists: Option<i64> = conn
        .query_row("SELECT id FROM clipboard_items WHERE id = ?1", params![item_id], |row| row.get(0))
        .optional()
        .map_err(|e| AppError::StorageUnavailable(format!("查询条目失败: {}", e)))?;
    if exists.is_none() {
        return Err(AppError::NotFound(item_id));
    }

    conn.execute(
        "INSERT OR IGNORE INTO item_tags (item_id, tag_id) VALUES (?1, ?2)",
        params![item_id, tag_id],
    ).map_err(|e| AppError::StorageUnavailable(format!("添加标签到条目失败: {}", e)))?;
    Ok(())
}

fn remove_tag_from_item(conn: &Connection, item_id: i64, tag_id: i64) -> Result<(), AppError> {
    conn.execute(
        "DELETE FROM item_tags WHERE item_id = ?1 AND tag_id = ?2",
        params![item_id, tag_id],
    ).map_err(|e| AppError::StorageUnavailable(format!("从条目移除标签失败: {}", e)))?;
    Ok(())
}

fn get_item_tags(conn: &Connection, item_id: i64) -> Result<Vec<Tag>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.name FROM tags t
             JOIN item_tags it ON t.id = it.tag_id
             WHERE it.item_id = ?1
             ORDER BY t.name ASC",
        )
        .map_err(|e| AppError::StorageUnavailable(format!("准备查询失败: {}", e)))?;

    let tags = stmt
        .query_map(params![item_id], |row| Ok(Tag { id: row.get(0)?, name: row.get(1)? }))
        .map_err(|e| AppError::StorageUnavailable(format!("查询条目标签失败: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::StorageUnavailable(format!("读取行失败: {}", e)))?;

    Ok(tags)
}

impl HistoryStore {
    pub fn all_tags(&self) -> Result<Vec<Tag>, AppError> {
        self.with_conn(get_tags)
    }

    pub fn find_tag(&self, name: &str) -> Result<Option<Tag>, AppError> {
        self.with_conn(|conn| find_tag(conn, name.trim()))
    }

    pub fn create_tag(&self, name: &str) -> Result<Tag, AppError> {
        self.with_conn(|conn| create_tag(conn, name))
    }

    pub fn delete_tag(&self, id: i64) -> Result<bool, AppError> {
        self.with_conn(|conn| delete_tag(conn, id))
    }

    /// 为条目打标签（幂等）
    pub fn tag_item(&self, item_id: i64, tag_id: i64) -> Result<(), AppError> {
        self.with_conn(|conn| add_tag_to_item(conn, item_id, tag_id))
    }

    pub fn untag_item(&self, item_id: i64, tag_id: i64) -> Result<(), AppError> {
        self.with_conn(|conn| remove_tag_from_item(conn, item_id, tag_id))
    }

    pub fn item_tags(&self, item_id: i64) -> Result<Vec<Tag>, AppError> {
        self.with_conn(|conn| get_item_tags(conn, item_id))
    }
}
