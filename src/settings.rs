//! 运行时设置
//!
//! 设置以字符串形式保存在数据库 `settings` 表中，进程重启后恢复。
//! 读取时逐项解析，单项解析失败只记录警告并回退默认值，不影响其他项。

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clipboard::MonitoredKinds;
use crate::db::retention::{DEFAULT_AUTO_CLEANUP_DAYS, DEFAULT_MAX_ITEMS};
use crate::db::{HistoryStore, RetentionPolicy};
use crate::error::AppError;

pub const KEY_POLL_INTERVAL_MS: &str = "poll_interval_ms";
pub const KEY_MONITOR_TEXT: &str = "monitor_text";
pub const KEY_MONITOR_IMAGES: &str = "monitor_images";
pub const KEY_MONITOR_FILES: &str = "monitor_files";
pub const KEY_MAX_HISTORY_ITEMS: &str = "max_history_items";
pub const KEY_AUTO_CLEANUP_DAYS: &str = "auto_cleanup_days";

pub const POLL_INTERVAL_DEFAULT_MS: u64 = 1_000;
const POLL_INTERVAL_MIN_MS: u64 = 100;
const POLL_INTERVAL_MAX_MS: u64 = 60_000;

pub fn normalize_poll_interval_ms(value_ms: u64) -> u64 {
    value_ms.clamp(POLL_INTERVAL_MIN_MS, POLL_INTERVAL_MAX_MS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub poll_interval_ms: u64,
    pub monitored: MonitoredKinds,
    pub retention: RetentionPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_DEFAULT_MS,
            monitored: MonitoredKinds::default(),
            retention: RetentionPolicy::new(DEFAULT_MAX_ITEMS, DEFAULT_AUTO_CLEANUP_DAYS),
        }
    }
}

fn parse_or<T: FromStr>(values: &HashMap<String, String>, key: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match values.get(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(e) => {
                log::warn!("设置项 {}='{}' 无效，使用默认值: {}", key, raw, e);
                default
            }
        },
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 从键值表解析；缺失或无效的项使用默认值
    pub fn from_map(values: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let poll_interval_ms = normalize_poll_interval_ms(parse_or(
            values,
            KEY_POLL_INTERVAL_MS,
            defaults.poll_interval_ms,
        ));
        let monitored = MonitoredKinds {
            text: parse_or(values, KEY_MONITOR_TEXT, defaults.monitored.text),
            images: parse_or(values, KEY_MONITOR_IMAGES, defaults.monitored.images),
            files: parse_or(values, KEY_MONITOR_FILES, defaults.monitored.files),
        };
        let retention = RetentionPolicy::new(
            parse_or(values, KEY_MAX_HISTORY_ITEMS, defaults.retention.max_items),
            parse_or(values, KEY_AUTO_CLEANUP_DAYS, defaults.retention.auto_cleanup_days),
        );
        Self {
            poll_interval_ms,
            monitored,
            retention,
        }
    }

    pub fn to_entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_POLL_INTERVAL_MS, self.poll_interval_ms.to_string()),
            (KEY_MONITOR_TEXT, self.monitored.text.to_string()),
            (KEY_MONITOR_IMAGES, self.monitored.images.to_string()),
            (KEY_MONITOR_FILES, self.monitored.files.to_string()),
            (KEY_MAX_HISTORY_ITEMS, self.retention.max_items.to_string()),
            (KEY_AUTO_CLEANUP_DAYS, self.retention.auto_cleanup_days.to_string()),
        ]
    }

    pub fn load(store: &HistoryStore) -> Result<Self, AppError> {
        let values = store.all_settings()?;
        Ok(Self::from_map(&values))
    }

    pub fn save(&self, store: &HistoryStore) -> Result<(), AppError> {
        store.set_settings(&self.to_entries())?;
        log::debug!("设置已保存: {:?}", self);
        Ok(())
    }

    /// 按键名修改单项（CLI `settings set` 使用），返回规范化后的值
    pub fn apply(&mut self, key: &str, value: &str) -> Result<String, AppError> {
        let value = value.trim();
        let invalid = |e: &dyn std::fmt::Display| {
            AppError::Config(format!("设置项 {} 的值 '{}' 无效: {}", key, value, e))
        };
        match key {
            KEY_POLL_INTERVAL_MS => {
                let ms: u64 = value.parse().map_err(|e| invalid(&e))?;
                self.poll_interval_ms = normalize_poll_interval_ms(ms);
                Ok(self.poll_interval_ms.to_string())
            }
            KEY_MONITOR_TEXT => {
                self.monitored.text = value.parse().map_err(|e| invalid(&e))?;
                Ok(self.monitored.text.to_string())
            }
            KEY_MONITOR_IMAGES => {
                self.monitored.images = value.parse().map_err(|e| invalid(&e))?;
                Ok(self.monitored.images.to_string())
            }
            KEY_MONITOR_FILES => {
                self.monitored.files = value.parse().map_err(|e| invalid(&e))?;
                Ok(self.monitored.files.to_string())
            }
            KEY_MAX_HISTORY_ITEMS => {
                let max: usize = value.parse().map_err(|e| invalid(&e))?;
                self.retention = RetentionPolicy::new(max, self.retention.auto_cleanup_days);
                Ok(self.retention.max_items.to_string())
            }
            KEY_AUTO_CLEANUP_DAYS => {
                let days: i64 = value.parse().map_err(|e| invalid(&e))?;
                self.retention = RetentionPolicy::new(self.retention.max_items, days);
                Ok(self.retention.auto_cleanup_days.to_string())
            }
            other => Err(AppError::Config(format!("未知设置项: {}", other))),
        }
    }
}
