//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，覆盖剪贴板读写、历史存储、导出与配置四类失败。
//! 调用方（CLI / UI 协作方）只需处理一种错误类型。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 存储层的所有 SQLite / 锁错误统一归入 `StorageUnavailable`，
//!   由调用方降级处理（"历史暂不可用"），而不是终止监控循环。
//! - `NotFound` 携带缺失的条目 ID，作为类型化结果返回而非 panic。

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 剪贴板读写操作失败
    #[error("剪贴板操作失败: {0}")]
    Clipboard(String),

    /// 历史存储不可用（数据库打开、读写、加锁失败）
    #[error("历史存储不可用: {0}")]
    StorageUnavailable(String),

    /// 引用的历史条目不存在
    #[error("历史条目不存在: id={0}")]
    NotFound(i64),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 配置或参数无效
    #[error("配置无效: {0}")]
    Config(String),

    /// 导出序列化失败
    #[error("导出失败: {0}")]
    Export(String),
}

impl AppError {
    /// 是否为存储层故障（用于外层决定是否进入降级模式）
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}
