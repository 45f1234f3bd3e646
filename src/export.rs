//! 历史导出
//!
//! 只读导出，不能再导回存储。图片等二进制负载以占位文本代替，不嵌入文件。
//!
//! - JSON：格式化数组，每项 `{id, timestamp, data_type, favorite, content}`，
//!   文件列表导出为路径数组
//! - CSV：表头 `ID,Timestamp,Type,Favorite,Content`，收藏为 `Yes` / `No`，
//!   文件列表以 `", "` 连接

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use chrono::SecondsFormat;
use serde::Serialize;

use crate::clipboard::content::decode_file_list;
use crate::clipboard::ContentKind;
use crate::db::HistoryItem;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => f.write_str("json"),
            ExportFormat::Csv => f.write_str("csv"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(AppError::Config(format!("不支持的导出格式: {}", other))),
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum ExportContent {
    Text(String),
    Files(Vec<String>),
}

#[derive(Serialize)]
struct ExportRecord {
    id: i64,
    timestamp: String,
    data_type: &'static str,
    favorite: bool,
    content: ExportContent,
}

fn placeholder(kind: ContentKind) -> String {
    format!("[{} data]", kind.as_str())
}

fn timestamp(item: &HistoryItem) -> String {
    item.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_record(item: &HistoryItem) -> ExportRecord {
    let content = match item.kind {
        ContentKind::Text => ExportContent::Text(String::from_utf8_lossy(&item.payload).into_owned()),
        ContentKind::FileList => ExportContent::Files(decode_file_list(&item.payload)),
        kind => ExportContent::Text(placeholder(kind)),
    };
    ExportRecord {
        id: item.id,
        timestamp: timestamp(item),
        data_type: item.kind.as_str(),
        favorite: item.favorite,
        content,
    }
}

/// 按格式写出条目
pub fn write_items<W: Write>(
    items: &[HistoryItem],
    format: ExportFormat,
    writer: W,
) -> Result<(), AppError> {
    match format {
        ExportFormat::Json => export_json(items, writer),
        ExportFormat::Csv => export_csv(items, writer),
    }
}

pub fn export_json<W: Write>(items: &[HistoryItem], mut writer: W) -> Result<(), AppError> {
    let records: Vec<ExportRecord> = items.iter().map(to_record).collect();
    serde_json::to_writer_pretty(&mut writer, &records)
        .map_err(|e| AppError::Export(format!("序列化 JSON 失败: {}", e)))?;
    writer.flush()?;
    Ok(())
}

pub fn export_csv<W: Write>(items: &[HistoryItem], writer: W) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_writer(writer);
    let csv_err = |e: csv::Error| AppError::Export(format!("写入 CSV 失败: {}", e));

    wtr.write_record(["ID", "Timestamp", "Type", "Favorite", "Content"])
        .map_err(csv_err)?;

    for item in items {
        let content = match item.kind {
            ContentKind::Text => String::from_utf8_lossy(&item.payload).into_owned(),
            ContentKind::FileList => decode_file_list(&item.payload).join(", "),
            kind => placeholder(kind),
        };
        wtr.write_record([
            item.id.to_string().as_str(),
            timestamp(item).as_str(),
            item.kind.as_str(),
            if item.favorite { "Yes" } else { "No" },
            content.as_str(),
        ])
        .map_err(csv_err)?;
    }

    wtr.flush()?;
    Ok(())
}
