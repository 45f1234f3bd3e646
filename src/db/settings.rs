//! 设置键值表子模块
//!
//! `settings(key, value)` 只存字符串，类型解析由上层 `crate::settings` 负责。

use std::collections::HashMap;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppError;

use super::HistoryStore;

fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    conn.query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
        .optional()
        .map_err(|e| AppError::StorageUnavailable(format!("读取设置 '{}' 失败: {}", key, e)))
}

fn set_settings(conn: &Connection, entries: &[(&str, String)]) -> Result<(), AppError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| AppError::StorageUnavailable(format!("开始事务失败: {}", e)))?;
    for (key, value) in entries {
        tx.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| AppError::StorageUnavailable(format!("写入设置 '{}' 失败: {}", key, e)))?;
    }
    tx.commit()
        .map_err(|e| AppError::StorageUnavailable(format!("提交事务失败: {}", e)))
}

fn all_settings(conn: &Connection) -> Result<HashMap<String, String>, AppError> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM settings")
        .map_err(|e| AppError::StorageUnavailable(format!("准备设置查询失败: {}", e)))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| AppError::StorageUnavailable(format!("查询设置失败: {}", e)))?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(|e| AppError::StorageUnavailable(format!("读取设置失败: {}", e)))?;
    Ok(rows)
}

impl HistoryStore {
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        self.with_conn(|conn| get_setting(conn, key))
    }

    pub fn set_setting(&self, key: &str, value: impl Into<String>) -> Result<(), AppError> {
        let value = value.into();
        self.with_conn(|conn| set_settings(conn, &[(key, value)]))
    }

    /// 在一个事务内写入多项设置
    pub fn set_settings(&self, entries: &[(&str, String)]) -> Result<(), AppError> {
        self.with_conn(|conn| set_settings(conn, entries))
    }

    pub fn all_settings(&self) -> Result<HashMap<String, String>, AppError> {
        self.with_conn(all_settings)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::HistoryStore;

    #[test]
    fn settings_upsert_and_read_back() {
        let store = HistoryStore::open_in_memory().expect("open store");
        assert_eq!(store.get_setting("max_history_items").expect("get"), None);

        store.set_setting("max_history_items", "50").expect("set");
        store.set_setting("max_history_items", "75").expect("overwrite");
        store
            .set_settings(&[("monitor_text", "false".to_string()), ("auto_cleanup_days", "7".to_string())])
            .expect("set many");

        assert_eq!(store.get_setting("max_history_items").expect("get").as_deref(), Some("75"));
        let all = store.all_settings().expect("all");
        assert_eq!(all.len(), 3);
        assert_eq!(all.get("monitor_text").map(String::as_str), Some("false"));
    }
}
