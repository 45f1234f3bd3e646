//! 系统剪贴板读写
//!
//! # 设计思路
//!
//! 每次读取都按固定优先级尝试：**文件列表 > 图片 > 文本**。
//! 资源管理器复制文件时会同时放入位图与路径列表，路径列表才是正确的解释。
//!
//! # 实现思路
//!
//! - 优先级判定在 `snapshot_from` 中完成，只依赖 `FormatReader` trait，
//!   平台读取与判定顺序分离。
//! - 文件列表通过 Win32 `CF_HDROP` 读取（仅 Windows），其余平台视为无文件。
//! - 图片与文本委托 `arboard`；每次读取新建 `arboard::Clipboard`，
//!   读取结束即释放，不跨调用持有系统剪贴板。
//! - 任何平台错误都折叠为 `ClipboardSnapshot::Error`，绝不向上抛出。
//! - 写入同样每次新建实例，写完即释放。

use std::borrow::Cow;

use crate::error::AppError;

use super::content::{ClipContent, ClipboardSnapshot, RawImage};
use super::{ClipboardSink, ClipboardSource};

/// 单一格式的读取结果：`Ok(None)` 表示剪贴板上没有这种格式
pub type FormatResult<T> = Result<Option<T>, AppError>;

/// 按格式读取剪贴板的底层接口
pub trait FormatReader {
    fn files(&mut self) -> FormatResult<Vec<String>>;
    fn image(&mut self) -> FormatResult<RawImage>;
    fn text(&mut self) -> FormatResult<String>;
}

/// 按"文件列表 > 图片 > 文本"的优先级产出一次快照
///
/// 某种格式缺失时继续尝试下一种；任何一步出错立即返回 `Error` 快照。
pub fn snapshot_from(reader: &mut impl FormatReader) -> ClipboardSnapshot {
    match reader.files() {
        Ok(Some(files)) => return ClipboardSnapshot::Content(ClipContent::FileList(files)),
        Ok(None) => {}
        Err(e) => return ClipboardSnapshot::Error(e.to_string()),
    }
    match reader.image() {
        Ok(Some(image)) => return ClipboardSnapshot::Content(ClipContent::Image(image)),
        Ok(None) => {}
        Err(e) => return ClipboardSnapshot::Error(e.to_string()),
    }
    match reader.text() {
        Ok(Some(text)) => ClipboardSnapshot::Content(ClipContent::Text(text)),
        Ok(None) => ClipboardSnapshot::Unknown,
        Err(e) => ClipboardSnapshot::Error(e.to_string()),
    }
}

/// 基于操作系统剪贴板的读写实现
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

/// `ContentNotAvailable` / `ConversionFailure` 表示"不是这种格式"，继续尝试下一种
fn is_format_miss(err: &arboard::Error) -> bool {
    matches!(
        err,
        arboard::Error::ContentNotAvailable | arboard::Error::ConversionFailure
    )
}

/// 单次读取会话：`arboard` 实例在第一次需要时打开，随会话一起释放
#[derive(Default)]
struct OsFormats {
    clipboard: Option<arboard::Clipboard>,
}

impl OsFormats {
    fn clipboard(&mut self) -> Result<&mut arboard::Clipboard, AppError> {
        if self.clipboard.is_none() {
            let opened = arboard::Clipboard::new()
                .map_err(|e| AppError::Clipboard(format!("打开剪贴板失败: {}", e)))?;
            self.clipboard = Some(opened);
        }
        self.clipboard
            .as_mut()
            .ok_or_else(|| AppError::Clipboard("剪贴板实例不可用".to_string()))
    }
}

impl FormatReader for OsFormats {
    fn files(&mut self) -> FormatResult<Vec<String>> {
        Ok(drop_files::read()?.map(|list| list.0))
    }

    fn image(&mut self) -> FormatResult<RawImage> {
        match self.clipboard()?.get_image() {
            Ok(data) => Ok(Some(RawImage {
                width: data.width,
                height: data.height,
                bytes: data.bytes.into_owned(),
            })),
            Err(e) if is_format_miss(&e) => Ok(None),
            Err(e) => Err(AppError::Clipboard(format!("读取图片失败: {}", e))),
        }
    }

    fn text(&mut self) -> FormatResult<String> {
        match self.clipboard()?.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(e) if is_format_miss(&e) => Ok(None),
            Err(e) => Err(AppError::Clipboard(format!("读取文本失败: {}", e))),
        }
    }
}

impl ClipboardSource for SystemClipboard {
    fn read(&mut self) -> ClipboardSnapshot {
        snapshot_from(&mut OsFormats::default())
    }
}

impl ClipboardSink for SystemClipboard {
    fn write(&mut self, content: &ClipContent) -> Result<(), AppError> {
        let mut clipboard = arboard::Clipboard::new()
            .map_err(|e| AppError::Clipboard(e.to_string()))?;
        match content {
            ClipContent::Text(text) => clipboard.set_text(text.clone()),
            ClipContent::FileList(files) => clipboard.set_text(files.join("\n")),
            ClipContent::Image(image) => clipboard.set_image(arboard::ImageData {
                width: image.width,
                height: image.height,
                bytes: Cow::Borrowed(&image.bytes),
            }),
        }
        .map_err(|e| AppError::Clipboard(e.to_string()))
    }
}

/// 资源管理器"复制文件"放入的路径列表（`CF_HDROP`）
mod drop_files {
    use crate::error::AppError;

    /// 按剪贴板中的原始顺序保存的绝对路径
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    pub(super) struct DropFileList(pub(super) Vec<String>);

    #[cfg(target_os = "windows")]
    pub(super) fn read() -> Result<Option<DropFileList>, AppError> {
        use windows::Win32::System::DataExchange::{CloseClipboard, GetClipboardData, OpenClipboard};
        use windows::Win32::System::Ole::CF_HDROP;
        use windows::Win32::UI::Shell::HDROP;

        /// 持有期间剪贴板处于打开状态，离开作用域时关闭
        struct OpenGuard;

        impl Drop for OpenGuard {
            fn drop(&mut self) {
                // SAFETY: 只在 OpenClipboard 成功后构造
                let _ = unsafe { CloseClipboard() };
            }
        }

        // SAFETY: 无窗口句柄打开剪贴板，由 OpenGuard 负责关闭
        unsafe { OpenClipboard(None) }
            .map_err(|e| AppError::Clipboard(format!("打开剪贴板失败: {}", e)))?;
        let _guard = OpenGuard;

        // SAFETY: 剪贴板已打开；句柄仅在 guard 存活期间使用
        let handle = match unsafe { GetClipboardData(CF_HDROP.0 as u32) } {
            Ok(handle) => handle,
            Err(_) => return Ok(None),
        };
        let paths = unsafe { query_paths(HDROP(handle.0)) };

        if paths.is_empty() {
            return Ok(None);
        }
        log::debug!("📁 剪贴板包含 {} 个文件路径", paths.len());
        Ok(Some(DropFileList(paths)))
    }

    /// 逐个取出 `HDROP` 中的路径，跳过长度为 0 的条目
    #[cfg(target_os = "windows")]
    unsafe fn query_paths(hdrop: windows::Win32::UI::Shell::HDROP) -> Vec<String> {
        use windows::Win32::UI::Shell::DragQueryFileW;

        const QUERY_COUNT: u32 = u32::MAX;

        let count = unsafe { DragQueryFileW(hdrop, QUERY_COUNT, None) };
        (0..count)
            .filter_map(|index| {
                let len = unsafe { DragQueryFileW(hdrop, index, None) } as usize;
                if len == 0 {
                    return None;
                }
                let mut wide = vec![0u16; len + 1];
                let copied = unsafe { DragQueryFileW(hdrop, index, Some(&mut wide)) } as usize;
                wide.truncate(copied.min(len));
                Some(String::from_utf16_lossy(&wide))
            })
            .collect()
    }

    #[cfg(not(target_os = "windows"))]
    pub(super) fn read() -> Result<Option<DropFileList>, AppError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::{snapshot_from, FormatReader, FormatResult};
    use crate::clipboard::content::{ClipContent, ClipboardSnapshot, RawImage};
    use crate::error::AppError;

    /// 每种格式返回预设结果，并记录被询问的顺序
    #[derive(Default)]
    struct StubFormats {
        files: Option<Vec<String>>,
        image: Option<RawImage>,
        text: Option<String>,
        fail_on: Option<&'static str>,
        asked: Vec<&'static str>,
    }

    impl StubFormats {
        fn answer<T: Clone>(&mut self, format: &'static str, value: &Option<T>) -> FormatResult<T> {
            self.asked.push(format);
            if self.fail_on == Some(format) {
                return Err(AppError::Clipboard(format!("{format} locked")));
            }
            Ok(value.clone())
        }
    }

    impl FormatReader for StubFormats {
        fn files(&mut self) -> FormatResult<Vec<String>> {
            let files = self.files.clone();
            self.answer("files", &files)
        }

        fn image(&mut self) -> FormatResult<RawImage> {
            let image = self.image.clone();
            self.answer("image", &image)
        }

        fn text(&mut self) -> FormatResult<String> {
            let text = self.text.clone();
            self.answer("text", &text)
        }
    }

    fn pixel() -> RawImage {
        RawImage {
            width: 1,
            height: 1,
            bytes: vec![1, 2, 3, 255],
        }
    }

    #[test]
    fn file_list_wins_over_image_and_text() {
        let mut formats = StubFormats {
            files: Some(vec!["C:\\a.txt".to_string()]),
            image: Some(pixel()),
            text: Some("C:\\a.txt".to_string()),
            ..StubFormats::default()
        };
        assert_eq!(
            snapshot_from(&mut formats),
            ClipboardSnapshot::Content(ClipContent::FileList(vec!["C:\\a.txt".to_string()]))
        );
        assert_eq!(formats.asked, vec!["files"]);
    }

    #[test]
    fn missing_formats_fall_through_in_order() {
        let mut formats = StubFormats {
            image: Some(pixel()),
            text: Some("caption".to_string()),
            ..StubFormats::default()
        };
        assert_eq!(snapshot_from(&mut formats), ClipboardSnapshot::Content(ClipContent::Image(pixel())));
        assert_eq!(formats.asked, vec!["files", "image"]);

        let mut formats = StubFormats {
            text: Some("plain".to_string()),
            ..StubFormats::default()
        };
        assert_eq!(
            snapshot_from(&mut formats),
            ClipboardSnapshot::Content(ClipContent::Text("plain".to_string()))
        );
        assert_eq!(formats.asked, vec!["files", "image", "text"]);
    }

    #[test]
    fn no_supported_format_is_unknown() {
        let mut formats = StubFormats::default();
        assert_eq!(snapshot_from(&mut formats), ClipboardSnapshot::Unknown);
    }

    #[test]
    fn read_error_stops_and_becomes_error_snapshot() {
        let mut formats = StubFormats {
            text: Some("never read".to_string()),
            fail_on: Some("image"),
            ..StubFormats::default()
        };
        match snapshot_from(&mut formats) {
            ClipboardSnapshot::Error(message) => assert!(message.contains("image locked")),
            other => panic!("unexpected snapshot: {other:?}"),
        }
        assert_eq!(formats.asked, vec!["files", "image"]);

        let mut formats = StubFormats {
            fail_on: Some("files"),
            ..StubFormats::default()
        };
        assert!(matches!(snapshot_from(&mut formats), ClipboardSnapshot::Error(_)));
    }
}
