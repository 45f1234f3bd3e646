//! 保留策略子模块
//!
//! ## 职责
//! - 纯逻辑：给定全部非收藏条目，决定哪些需要淘汰（`select_evictions`）
//! - 执行：读取候选、批量删除（`enforce`）
//!
//! ## 规则
//! - 数量上限：非收藏条目超过 `max_items` 时，按 `created_at` 升序删除最旧的超出部分
//! - 时间上限：`auto_cleanup_days > 0` 时，删除早于 `now - days` 的非收藏条目
//! - 收藏条目永远不在候选集中
//! - 两条规则相互独立，结果取并集，与执行顺序无关
//!
//! ## 错误语义
//! - 查询与删除失败统一映射为 `AppError::StorageUnavailable`

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

use super::history::parse_timestamp;

pub const DEFAULT_MAX_ITEMS: usize = 1000;
pub const DEFAULT_AUTO_CLEANUP_DAYS: i64 = 30;

/// 单条 DELETE 语句中 `IN (...)` 的最大参数数量
const DELETE_CHUNK: usize = 500;

/// 历史保留策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// 非收藏条目数量上限（至少为 1）
    pub max_items: usize,
    /// 自动清理天数，`<= 0` 表示关闭按时间清理
    pub auto_cleanup_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            auto_cleanup_days: DEFAULT_AUTO_CLEANUP_DAYS,
        }
    }
}

/// 淘汰候选：一条非收藏条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionCandidate {
    pub id: i64,
    pub created_at: DateTime<Utc>,
}

impl RetentionPolicy {
    pub fn new(max_items: usize, auto_cleanup_days: i64) -> Self {
        Self {
            max_items: max_items.max(1),
            auto_cleanup_days,
        }
    }

    /// 按时间清理的截止时间；关闭时返回 `None`
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.auto_cleanup_days <= 0 {
            return None;
        }
        Duration::try_days(self.auto_cleanup_days).and_then(|d| now.checked_sub_signed(d))
    }

    /// 选出需要淘汰的条目 ID（按 `created_at`、`id` 升序）
    pub fn select_evictions(&self, candidates: &[RetentionCandidate], now: DateTime<Utc>) -> Vec<i64> {
        let mut ordered: Vec<RetentionCandidate> = candidates.to_vec();
        ordered.sort_by_key(|c| (c.created_at, c.id));

        let excess = ordered.len().saturating_sub(self.max_items);
        let mut chosen: HashSet<i64> = ordered.iter().take(excess).map(|c| c.id).collect();

        if let Some(cutoff) = self.cutoff(now) {
            chosen.extend(ordered.iter().filter(|c| c.created_at < cutoff).map(|c| c.id));
        }

        ordered
            .into_iter()
            .map(|c| c.id)
            .filter(|id| chosen.contains(id))
            .collect()
    }
}

fn load_candidates(conn: &Connection) -> Result<Vec<RetentionCandidate>, AppError> {
    let mut stmt = conn
        .prepare("SELECT id, timestamp FROM clipboard_items WHERE favorite = 0")
        .map_err(|e| AppError::StorageUnavailable(format!("准备清理候选查询失败: {}", e)))?;

    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| AppError::StorageUnavailable(format!("查询清理候选失败: {}", e)))?;

    let mut candidates = Vec::new();
    for row in rows {
        let (id, timestamp) =
            row.map_err(|e| AppError::StorageUnavailable(format!("读取清理候选失败: {}", e)))?;
        candidates.push(RetentionCandidate {
            id,
            created_at: parse_timestamp(&timestamp),
        });
    }
    Ok(candidates)
}

pub(crate) fn delete_ids(conn: &Connection, ids: &[i64]) -> Result<usize, AppError> {
    let mut removed = 0;
    for chunk in ids.chunks(DELETE_CHUNK) {
        let placeholders: Vec<&str> = chunk.iter().map(|_| "?").collect();
        let sql = format!(
            "DELETE FROM clipboard_items WHERE favorite = 0 AND id IN ({})",
            placeholders.join(",")
        );
        removed += conn
            .execute(&sql, params_from_iter(chunk.iter()))
            .map_err(|e| AppError::StorageUnavailable(format!("批量淘汰失败: {}", e)))?;
    }
    Ok(removed)
}

/// 按策略清理一次，返回删除的条目数
pub(crate) fn enforce(
    conn: &Connection,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<usize, AppError> {
    let candidates = load_candidates(conn)?;
    let evictions = policy.select_evictions(&candidates, now);
    if evictions.is_empty() {
        return Ok(0);
    }

    let removed = delete_ids(conn, &evictions)?;
    log::info!(
        "🧹 保留策略清理 {} 条（上限 {} 条，{} 天）",
        removed,
        policy.max_items,
        policy.auto_cleanup_days
    );
    Ok(removed)
}
