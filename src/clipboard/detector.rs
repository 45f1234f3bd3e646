//! 剪贴板变化检测
//!
//! # 设计思路
//!
//! 检测器只持有一个"上一次接受的快照"槽位，每次轮询覆盖，不保留更多历史。
//! 判定流程：
//!
//! ```text
//! 读取快照
//!   ├─ 类型被禁用        → 丢弃，槽位保持不变（重新启用后仍能识别为变化）
//!   ├─ Error / Unknown / 空内容 → 丢弃
//!   ├─ 与槽位结构相等    → 丢弃（防止重复风暴）
//!   └─ 否则              → 更新槽位并产出 DetectedChange
//! ```
//!
//! 启动后第一份有效内容必定产出（槽位为空，视为不同）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::{ClipContent, ClipboardSnapshot, ContentKind};
use super::ClipboardSource;

/// 各内容类型的监控开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredKinds {
    pub text: bool,
    pub images: bool,
    pub files: bool,
}

impl Default for MonitoredKinds {
    fn default() -> Self {
        Self {
            text: true,
            images: true,
            files: true,
        }
    }
}

impl MonitoredKinds {
    pub fn allows(&self, kind: ContentKind) -> bool {
        match kind {
            ContentKind::Text => self.text,
            ContentKind::Image => self.images,
            ContentKind::FileList => self.files,
            ContentKind::Unknown => false,
        }
    }
}

/// 一次被确认的剪贴板变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedChange {
    pub content: ClipContent,
    pub captured_at: DateTime<Utc>,
}

/// 单槽位变化检测器
#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: Option<ClipContent>,
    monitored: MonitoredKinds,
}

impl ChangeDetector {
    pub fn new(monitored: MonitoredKinds) -> Self {
        Self {
            previous: None,
            monitored,
        }
    }

    pub fn monitored(&self) -> MonitoredKinds {
        self.monitored
    }

    pub fn set_monitored(&mut self, monitored: MonitoredKinds) {
        self.monitored = monitored;
    }

    /// 读取一次并判定
    pub fn poll(&mut self, source: &mut dyn ClipboardSource) -> Option<DetectedChange> {
        let snapshot = source.read();
        self.observe(snapshot, Utc::now())
    }

    /// 对一份已读取的快照做判定
    ///
    /// 与 `poll` 分离，便于监控循环在带超时的阻塞任务中读取后再交给检测器。
    pub fn observe(
        &mut self,
        snapshot: ClipboardSnapshot,
        now: DateTime<Utc>,
    ) -> Option<DetectedChange> {
        let content = match snapshot {
            ClipboardSnapshot::Content(content) => content,
            ClipboardSnapshot::Unknown => {
                log::trace!("剪贴板无受支持的格式，跳过");
                return None;
            }
            ClipboardSnapshot::Error(message) => {
                log::warn!("读取剪贴板失败，本次轮询跳过: {}", message);
                return None;
            }
        };

        let kind = content.kind();
        if !self.monitored.allows(kind) {
            log::debug!("⏭️  {} 类型未启用监控，跳过", kind);
            return None;
        }

        if content.is_empty() {
            log::debug!("⏭️  剪贴板内容为空，跳过");
            return None;
        }

        if self.previous.as_ref() == Some(&content) {
            return None;
        }

        self.previous = Some(content.clone());
        Some(DetectedChange {
            content,
            captured_at: now,
        })
    }

    /// 直接设置槽位，不产出变化
    ///
    /// 用于还原条目到剪贴板后，避免把自己写入的内容再次捕获。
    pub fn prime(&mut self, content: ClipContent) {
        self.previous = Some(content);
    }

    pub fn previous(&self) -> Option<&ClipContent> {
        self.previous.as_ref()
    }
}
