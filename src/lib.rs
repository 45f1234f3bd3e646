//! # clipkeeper — 剪贴板历史核心库
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 调用方 (CLI / UI 协作方)                   │
//! │                                                          │
//! │   query · toggle_favorite · delete · clear · restore     │
//! │   set_monitored_kinds · set_retention_policy · export    │
//! │            ↑ broadcast<HistoryEvent>                     │
//! └────────────┼─────────────────────────────────────────────┘
//!              ↕
//! ┌────────────┼─────────────────────────────────────────────┐
//! │  history ── ClipboardHistory (门面)                       │
//! │     │                                                    │
//! │     ├─ clipboard                                         │
//! │     │   ├─ reader    系统剪贴板快照（文件 > 图片 > 文本） │
//! │     │   ├─ detector  单槽位变化检测                       │
//! │     │   └─ monitor   tokio 定时轮询 + 停止信号            │
//! │     │                                                    │
//! │     ├─ db ─────── SQLite (rusqlite) 历史 / 保留策略 / 标签 │
//! │     ├─ settings   运行时设置（持久化在 settings 表）      │
//! │     ├─ export     JSON / CSV 导出                        │
//! │     └─ error      AppError (统一错误类型)                 │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError` |
//! | [`clipboard`] | 剪贴板读取、变化检测、轮询循环、内容编解码 |
//! | [`db`] | SQLite 历史存储、保留策略、标签、设置表、数据库位置 |
//! | [`settings`] | 轮询间隔 / 监控类型 / 保留策略的解析与持久化 |
//! | [`history`] | 门面：连接检测器与存储，对外暴露操作与事件 |
//! | [`export`] | 历史导出为 JSON / CSV |

pub mod error;
pub mod clipboard;
pub mod db;
pub mod export;
pub mod history;
pub mod settings;

pub use error::AppError;
pub use history::{ClipboardHistory, HistoryEvent};
