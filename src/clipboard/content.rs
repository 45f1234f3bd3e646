//! 剪贴板内容模型与负载编解码
//!
//! # 设计思路
//!
//! - `ClipContent` 是带标签的联合体：文本 / 图片 / 文件列表，替代多态继承。
//! - `ClipboardSnapshot` 是每次轮询的瞬时结果，只用于比较，不直接持久化。
//! - 持久化时由 `ContentKind` 作判别字段，负载统一编码为不透明字节；
//!   存储层只负责按 `kind` 原样存取，不解释字节内容。
//!
//! # 编码约定
//!
//! | 类型 | 数据库 `data_type` | 负载字节 |
//! |------|--------------------|----------|
//! | 文本 | `text`  | UTF-8 原文 |
//! | 图片 | `image` | RGBA 缓冲区的 PNG 编码 |
//! | 文件列表 | `files` | 以 `\n` 连接的路径（保持顺序） |

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// 持久化条目的内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
    #[serde(rename = "files")]
    FileList,
    Unknown,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::FileList => "files",
            ContentKind::Unknown => "unknown",
        }
    }

    /// 从数据库列值解析；无法识别的值归为 `Unknown`，不报错
    pub fn from_db(value: &str) -> Self {
        match value {
            "text" => ContentKind::Text,
            "image" => ContentKind::Image,
            "files" => ContentKind::FileList,
            _ => ContentKind::Unknown,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = AppError;

    /// 解析用户输入（CLI 参数）；与 `from_db` 不同，未知值视为错误
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ContentKind::Text),
            "image" | "images" => Ok(ContentKind::Image),
            "files" | "file" | "filelist" => Ok(ContentKind::FileList),
            "unknown" => Ok(ContentKind::Unknown),
            other => Err(AppError::Config(format!("未知的内容类型: {}", other))),
        }
    }
}

/// 原始 RGBA 图像缓冲区
///
/// 相等性按像素缓冲区逐字节比较：渲染结果相同但字节不同的两张图视为不同。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: usize,
    pub height: usize,
    pub bytes: Vec<u8>,
}

/// 剪贴板中的一份可保存内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipContent {
    Text(String),
    Image(RawImage),
    FileList(Vec<String>),
}

impl ClipContent {
    pub fn kind(&self) -> ContentKind {
        match self {
            ClipContent::Text(_) => ContentKind::Text,
            ClipContent::Image(_) => ContentKind::Image,
            ClipContent::FileList(_) => ContentKind::FileList,
        }
    }

    /// 空内容不参与变化检测，也不会入库
    ///
    /// 只含空白的文本不算空，照常记录。
    pub fn is_empty(&self) -> bool {
        match self {
            ClipContent::Text(text) => text.is_empty(),
            ClipContent::Image(image) => {
                image.width == 0 || image.height == 0 || image.bytes.is_empty()
            }
            ClipContent::FileList(files) => files.iter().all(String::is_empty),
        }
    }

    /// 编码为持久化负载
    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        match self {
            ClipContent::Text(text) => Ok(text.as_bytes().to_vec()),
            ClipContent::FileList(files) => Ok(files.join("\n").into_bytes()),
            ClipContent::Image(image) => encode_png(image),
        }
    }

    /// 按 `kind` 解码持久化负载
    pub fn decode(kind: ContentKind, payload: &[u8]) -> Result<Self, AppError> {
        match kind {
            ContentKind::Text => Ok(ClipContent::Text(String::from_utf8_lossy(payload).into_owned())),
            ContentKind::FileList => Ok(ClipContent::FileList(decode_file_list(payload))),
            ContentKind::Image => decode_png(payload).map(ClipContent::Image),
            ContentKind::Unknown => Err(AppError::Clipboard(
                "未知类型的条目无法还原".to_string(),
            )),
        }
    }

    /// 日志用的简短描述，避免把整段文本或图片字节写进日志
    pub fn summary(&self) -> String {
        match self {
            ClipContent::Text(text) => {
                let head: String = text.chars().take(60).collect();
                if text.chars().count() > 60 {
                    format!("\"{}…\"", head)
                } else {
                    format!("\"{}\"", head)
                }
            }
            ClipContent::Image(image) => format!("{}x{} 图片", image.width, image.height),
            ClipContent::FileList(files) => format!("{} 个文件", files.len()),
        }
    }
}

pub(crate) fn decode_file_list(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .split('\n')
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn encode_png(image: &RawImage) -> Result<Vec<u8>, AppError> {
    let buffer = RgbaImage::from_raw(image.width as u32, image.height as u32, image.bytes.clone())
        .ok_or_else(|| AppError::Clipboard("创建图像缓冲区失败".to_string()))?;

    let mut out = Cursor::new(Vec::new());
    buffer
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| AppError::Clipboard(format!("PNG 编码失败: {}", e)))?;
    Ok(out.into_inner())
}

fn decode_png(payload: &[u8]) -> Result<RawImage, AppError> {
    let decoded = image::load_from_memory(payload)
        .map_err(|e| AppError::Clipboard(format!("图片解码失败: {}", e)))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(RawImage {
        width: width as usize,
        height: height as usize,
        bytes: rgba.into_raw(),
    })
}

/// 单次读取剪贴板的结果
///
/// `Unknown` 表示剪贴板中没有受支持的格式；`Error` 表示平台接口失败。
/// 两者在检测器中都按"无变化"处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardSnapshot {
    Content(ClipContent),
    Unknown,
    Error(String),
}

impl ClipboardSnapshot {
    pub fn kind(&self) -> Option<ContentKind> {
        match self {
            ClipboardSnapshot::Content(content) => Some(content.kind()),
            ClipboardSnapshot::Unknown => Some(ContentKind::Unknown),
            ClipboardSnapshot::Error(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClipContent, ContentKind, RawImage};

    fn tiny_image() -> RawImage {
        RawImage {
            width: 2,
            height: 1,
            bytes: vec![255, 0, 0, 255, 0, 0, 255, 255],
        }
    }

    #[test]
    fn kind_db_names_match_storage_layout() {
        assert_eq!(ContentKind::Text.as_str(), "text");
        assert_eq!(ContentKind::Image.as_str(), "image");
        assert_eq!(ContentKind::FileList.as_str(), "files");
        assert_eq!(ContentKind::from_db("files"), ContentKind::FileList);
        assert_eq!(ContentKind::from_db("bitmap"), ContentKind::Unknown);
    }

    #[test]
    fn kind_from_str_rejects_unknown_names() {
        assert_eq!("Images".parse::<ContentKind>().expect("parse"), ContentKind::Image);
        assert!("audio".parse::<ContentKind>().is_err());
    }

    #[test]
    fn only_zero_length_content_is_empty() {
        assert!(ClipContent::Text(String::new()).is_empty());
        assert!(!ClipContent::Text("  \n\t".to_string()).is_empty());
        assert!(ClipContent::FileList(Vec::new()).is_empty());
        assert!(!ClipContent::Text("x".to_string()).is_empty());
        assert!(!ClipContent::Image(tiny_image()).is_empty());
    }

    #[test]
    fn file_list_payload_keeps_order() {
        let files = ClipContent::FileList(vec!["C:\\b.txt".to_string(), "C:\\a.txt".to_string()]);
        let payload = files.encode().expect("encode files");
        assert_eq!(payload, b"C:\\b.txt\nC:\\a.txt".to_vec());
        assert_eq!(ClipContent::decode(ContentKind::FileList, &payload).expect("decode"), files);
    }

    #[test]
    fn image_payload_is_png_and_decodes_to_same_pixels() {
        let image = ClipContent::Image(tiny_image());
        let payload = image.encode().expect("encode png");
        assert_eq!(&payload[1..4], b"PNG");
        assert_eq!(ClipContent::decode(ContentKind::Image, &payload).expect("decode png"), image);
    }

    #[test]
    fn image_equality_is_by_raw_buffer() {
        let a = tiny_image();
        let mut b = tiny_image();
        assert_eq!(a, b);
        b.bytes[3] = 254;
        assert_ne!(a, b);
    }

    #[test]
    fn summary_truncates_long_text() {
        let long = ClipContent::Text("a".repeat(100));
        assert!(long.summary().ends_with("…\""));
        assert_eq!(ClipContent::FileList(vec!["x".into()]).summary(), "1 个文件");
    }
}
