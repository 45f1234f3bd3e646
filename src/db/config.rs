//! 数据库位置配置
//!
//! 应用数据目录下的 `config.json` 记录自定义数据库目录：`{ "db_dir": "..." }`。
//! 文件缺失或损坏时回退到应用数据目录。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const APP_DIR_NAME: &str = "clipkeeper";
pub const DB_FILE_NAME: &str = "clipboard_history.db";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub db_dir: Option<String>,
}

/// 应用数据目录（`<data_dir>/clipkeeper`）
pub fn app_data_dir() -> Result<PathBuf, AppError> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| AppError::Config("无法确定应用数据目录".to_string()))
}

fn load_db_config_from_path(config_path: &Path) -> DbConfig {
    if config_path.exists() {
        if let Ok(content) = fs::read_to_string(config_path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => log::warn!("解析 {} 失败，使用默认配置: {}", config_path.display(), e),
            }
        }
    }
    DbConfig::default()
}

fn save_db_config_to_path(config_path: &Path, db_dir: Option<String>) -> Result<(), AppError> {
    let config = DbConfig { db_dir };
    let content = serde_json::to_string_pretty(&config)
        .map_err(|e| AppError::Config(format!("序列化配置失败: {}", e)))?;
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(config_path, content)?;
    Ok(())
}

fn resolve_db_path_from_config(app_data_dir: &Path, config: &DbConfig) -> PathBuf {
    match config.db_dir.as_deref() {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(DB_FILE_NAME),
        _ => app_data_dir.join(DB_FILE_NAME),
    }
}

/// 持久化自定义数据库目录；`None` 恢复默认位置
pub fn save_db_config(db_dir: Option<String>) -> Result<(), AppError> {
    let config_path = app_data_dir()?.join(CONFIG_FILE_NAME);
    save_db_config_to_path(&config_path, db_dir)
}

/// 解析数据库文件路径：显式路径 > `config.json` > 应用数据目录
pub fn resolve_db_path(explicit: Option<&Path>) -> Result<PathBuf, AppError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let app_data_dir = app_data_dir()?;
    let config = load_db_config_from_path(&app_data_dir.join(CONFIG_FILE_NAME));
    Ok(resolve_db_path_from_config(&app_data_dir, &config))
}
