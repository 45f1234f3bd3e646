//! 剪贴板管理模块
//!
//! # 设计思路
//!
//! 统一管理剪贴板相关的核心能力：
//! - **读取**：`reader` 按固定优先级（文件列表 > 图片 > 文本）抓取一次快照
//! - **检测**：`detector` 持有唯一的"上一次快照"槽位，判定是否为真实变化
//! - **轮询**：`monitor` 以固定周期驱动检测器，可随时启动/停止
//! - **内容模型**：`content` 定义快照、条目类型与负载编解码
//!
//! # 实现思路
//!
//! - 平台访问通过 `ClipboardSource` / `ClipboardSink` 两个 trait 隔离，
//!   检测与存储逻辑可以在测试中使用内存假实现。
//! - 读取失败不会向上传播：统一折叠为 `ClipboardSnapshot::Error`，
//!   检测器将其视为"无变化"。

pub mod content;
pub mod detector;
pub mod monitor;
pub mod reader;

pub use content::{ClipContent, ClipboardSnapshot, ContentKind, RawImage};
pub use detector::{ChangeDetector, DetectedChange, MonitoredKinds};
pub use monitor::MonitorHandle;
pub use reader::{snapshot_from, FormatReader, SystemClipboard};

use crate::error::AppError;

/// 剪贴板快照来源
///
/// 实现方必须在每次 `read` 内完成"打开 → 读取 → 关闭"，
/// 不得跨调用持有系统剪贴板句柄。
pub trait ClipboardSource: Send {
    fn read(&mut self) -> ClipboardSnapshot;
}

/// 剪贴板写入目标（用于把历史条目还原到系统剪贴板）
pub trait ClipboardSink: Send {
    fn write(&mut self, content: &ClipContent) -> Result<(), AppError>;
}
