//! Schema 初始化子模块
//!
//! ## 职责
//! - 创建/迁移数据库表结构与索引
//! - 设置 SQLite 运行参数（WAL、外键）
//!
//! ## 版本
//! - v1：`clipboard_items` + `settings`
//! - v2：`tags` / `item_tags` 多对多表
//! - v3：时间 / 收藏 / 类型索引
//! - v4：旧版不带时区的本地时间戳统一改写为 RFC 3339 UTC（排序与范围过滤按文本比较）
//!
//! ## 错误语义
//! - DDL 失败统一映射为 `AppError::StorageUnavailable`

use rusqlite::Connection;

use crate::error::AppError;

use super::history::{format_timestamp, normalize_timestamp, parse_timestamp};

const SCHEMA_VERSION: i64 = 4;

fn get_user_version(conn: &Connection) -> Result<i64, AppError> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| AppError::StorageUnavailable(format!("读取数据库版本失败: {}", e)))
}

fn set_user_version(conn: &Connection, version: i64) -> Result<(), AppError> {
    conn.execute_batch(&format!("PRAGMA user_version = {version};"))
        .map_err(|e| AppError::StorageUnavailable(format!("写入数据库版本失败: {}", e)))
}

fn create_base_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS clipboard_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            data_type TEXT NOT NULL,
            content BLOB NOT NULL,
            favorite INTEGER NOT NULL DEFAULT 0 CHECK (favorite IN (0, 1))
        );
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );"
    ).map_err(|e| AppError::StorageUnavailable(format!("创建基础表失败: {}", e)))
}

fn create_tag_tables(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS item_tags (
            item_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (item_id, tag_id),
            FOREIGN KEY (item_id) REFERENCES clipboard_items(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        );"
    ).map_err(|e| AppError::StorageUnavailable(format!("创建标签表失败: {}", e)))
}

fn create_indexes(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_clipboard_items_timestamp ON clipboard_items(timestamp DESC, id DESC);
         CREATE INDEX IF NOT EXISTS idx_clipboard_items_favorite_timestamp ON clipboard_items(favorite, timestamp);
         CREATE INDEX IF NOT EXISTS idx_clipboard_items_type_timestamp ON clipboard_items(data_type, timestamp DESC);
         CREATE INDEX IF NOT EXISTS idx_item_tags_tag_id ON item_tags(tag_id);"
    ).map_err(|e| AppError::StorageUnavailable(format!("创建索引失败: {}", e)))
}

/// 把所有非规范格式的时间戳改写为 `format_timestamp` 的输出，返回改写行数
fn normalize_legacy_timestamps(conn: &Connection) -> Result<usize, AppError> {
    let map_err = |e: rusqlite::Error| AppError::StorageUnavailable(format!("迁移时间戳失败: {}", e));

    let tx = conn.unchecked_transaction().map_err(map_err)?;
    let rows: Vec<(i64, String)> = {
        let mut stmt = tx
            .prepare("SELECT id, CAST(timestamp AS TEXT) FROM clipboard_items")
            .map_err(map_err)?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(map_err)?
            .collect::<Result<_, _>>()
            .map_err(map_err)?
    };

    let mut rewritten = 0;
    {
        let mut update = tx
            .prepare("UPDATE clipboard_items SET timestamp = ?1 WHERE id = ?2")
            .map_err(map_err)?;
        for (id, raw) in rows {
            let canonical = format_timestamp(normalize_timestamp(parse_timestamp(&raw)));
            if canonical != raw {
                update.execute((&canonical, id)).map_err(map_err)?;
                rewritten += 1;
            }
        }
    }
    tx.commit().map_err(map_err)?;

    if rewritten > 0 {
        log::info!("已将 {} 条旧版时间戳改写为 UTC", rewritten);
    }
    Ok(rewritten)
}

pub(super) fn initialize_schema(conn: &Connection) -> Result<(), AppError> {
    // 内存数据库不支持 WAL，失败时沿用默认日志模式
    conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
    conn.execute_batch("PRAGMA foreign_keys=ON;")
        .map_err(|e| AppError::StorageUnavailable(format!("开启外键检查失败: {}", e)))?;

    let mut version = get_user_version(conn)?;

    if version < 1 {
        create_base_tables(conn)?;
        set_user_version(conn, 1)?;
        version = 1;
    }

    if version < 2 {
        create_tag_tables(conn)?;
        set_user_version(conn, 2)?;
        version = 2;
    }

    if version < 3 {
        create_indexes(conn)?;
        set_user_version(conn, 3)?;
        version = 3;
    }

    if version < 4 {
        normalize_legacy_timestamps(conn)?;
        set_user_version(conn, 4)?;
        version = 4;
    }

    if version != SCHEMA_VERSION {
        return Err(AppError::StorageUnavailable(format!(
            "数据库版本不匹配: current={}, expected={}",
            version, SCHEMA_VERSION
        )));
    }

    Ok(())
}
