//! 数据库模块
//!
//! # 设计思路
//!
//! 剪贴板历史的唯一持久化位置。`HistoryStore` 独占 `clipboard_items` 表，
//! 监控写入方与 UI 读取方共享同一个连接，由互斥锁串行化。
//!
//! # 优势
//!
//! - **一致性**：插入与保留策略清理在同一事务内完成，读取方看不到"半清理"状态
//! - **类型安全**：Rust struct + serde，编译期保证数据结构正确
//! - **可维护性**：SQL 逻辑集中在 `db/` 子模块

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::functions::FunctionFlags;
use serde::{Deserialize, Serialize};

use crate::clipboard::{ClipContent, ContentKind};
use crate::error::AppError;

pub mod config;
mod history;
pub mod retention;
mod schema;
mod settings;
mod tags;

pub use history::{normalize_timestamp, HistoryFilter};
pub use retention::RetentionPolicy;

// ============================================================================
// 数据模型
// ============================================================================

/// 标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// 剪贴板历史条目
///
/// `payload` 为不透明的编码负载，解释方式由 `kind` 决定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: i64,
    pub kind: ContentKind,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub favorite: bool,
}

impl HistoryItem {
    /// 文本条目的原文；非文本条目返回 `None`
    pub fn text(&self) -> Option<String> {
        match self.kind {
            ContentKind::Text => Some(String::from_utf8_lossy(&self.payload).into_owned()),
            _ => None,
        }
    }

    pub fn content(&self) -> Result<ClipContent, AppError> {
        ClipContent::decode(self.kind, &self.payload)
    }
}

/// 历史统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total: i64,
    pub today: i64,
    pub favorites: i64,
    pub text: i64,
    pub images: i64,
    pub files: i64,
}

// ============================================================================
// 存储句柄
// ============================================================================

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// 大小写不敏感子串匹配，供 SQL 使用：`contains_ci(content, needle)`
pub(crate) const CONTAINS_CI_FN: &str = "contains_ci";

/// 剪贴板历史存储
pub struct HistoryStore {
    conn: Mutex<Connection>,
    policy: RwLock<RetentionPolicy>,
}

impl HistoryStore {
    /// 打开（必要时创建）数据库文件并初始化 Schema
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::StorageUnavailable(format!("创建数据库目录失败: {}", e))
                })?;
            }
        }
        log::info!("数据库路径: {}", db_path.display());

        let conn = Connection::open(db_path).map_err(|e| {
            AppError::StorageUnavailable(format!("打开数据库失败: {}", e))
        })?;
        Self::from_connection(conn)
    }

    /// 内存数据库，用于测试与临时会话
    pub fn open_in_memory() -> Result<Self, AppError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            AppError::StorageUnavailable(format!("打开内存数据库失败: {}", e))
        })?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, AppError> {
        conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| {
            AppError::StorageUnavailable(format!("设置忙等待超时失败: {}", e))
        })?;
        register_functions(&conn)?;
        schema::initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            policy: RwLock::new(RetentionPolicy::default()),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn.lock().map_err(|e| {
            AppError::StorageUnavailable(format!("获取数据库锁失败: {}", e))
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let conn = self.lock()?;
        op(&conn)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        match self.policy.read() {
            Ok(policy) => *policy,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// 替换保留策略，并立即按新策略清理一次
    pub fn set_retention_policy(&self, policy: RetentionPolicy) -> Result<usize, AppError> {
        match self.policy.write() {
            Ok(mut guard) => *guard = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
        self.with_conn(|conn| retention::enforce(conn, &policy, Utc::now()))
    }
}

fn register_functions(conn: &Connection) -> Result<(), AppError> {
    conn.create_scalar_function(
        CONTAINS_CI_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let haystack = match ctx.get_raw(0) {
                rusqlite::types::ValueRef::Blob(b) | rusqlite::types::ValueRef::Text(b) => {
                    String::from_utf8_lossy(b).to_lowercase()
                }
                _ => return Ok(false),
            };
            let needle: String = ctx.get(1)?;
            Ok(haystack.contains(&needle.to_lowercase()))
        },
    )
    .map_err(|e| AppError::StorageUnavailable(format!("注册 SQL 函数失败: {}", e)))
}
