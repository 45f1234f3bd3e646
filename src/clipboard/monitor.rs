//! 剪贴板轮询循环
//!
//! # 设计思路
//!
//! 固定周期的 tokio 任务驱动检测，是写入历史的唯一入口。
//! 停止信号通过 `watch` 通道与定时器在 `select!` 中竞争，
//! `stop()` 返回后不会再开始新的轮询；进行中的单次轮询本身是短操作，不强制取消。
//!
//! # 实现思路
//!
//! - 读取剪贴板是阻塞调用，放进 `spawn_blocking` 并用超时包裹。
//! - 来源通过 `try_lock` 获取：上一次超时的读取仍占用来源时，本次直接记为读取失败，
//!   保证同一时刻最多只有一次读取在进行。

use std::future::Future;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::content::ClipboardSnapshot;
use super::ClipboardSource;

pub const READ_TIMEOUT_DEFAULT_MS: u64 = 2_000;
const READ_TIMEOUT_MIN_MS: u64 = 50;
const READ_TIMEOUT_MAX_MS: u64 = 30_000;

pub type SharedSource = Arc<Mutex<Box<dyn ClipboardSource>>>;

pub fn normalize_read_timeout_ms(value_ms: u64) -> u64 {
    value_ms.clamp(READ_TIMEOUT_MIN_MS, READ_TIMEOUT_MAX_MS)
}

pub(crate) fn read_from(source: &SharedSource) -> ClipboardSnapshot {
    match source.try_lock() {
        Ok(mut guard) => guard.read(),
        Err(TryLockError::WouldBlock) => {
            ClipboardSnapshot::Error("上一次剪贴板读取仍未结束".to_string())
        }
        Err(TryLockError::Poisoned(poisoned)) => {
            log::warn!("剪贴板来源锁中毒，继续使用恢复数据");
            poisoned.into_inner().read()
        }
    }
}

/// 在阻塞线程池中读取一次，超时折叠为 `ClipboardSnapshot::Error`
pub async fn read_with_timeout(source: SharedSource, timeout: Duration) -> ClipboardSnapshot {
    let task = tokio::task::spawn_blocking(move || read_from(&source));
    match time::timeout(timeout, task).await {
        Ok(Ok(snapshot)) => snapshot,
        Ok(Err(join_err)) => ClipboardSnapshot::Error(format!("读取任务异常退出: {}", join_err)),
        Err(_) => ClipboardSnapshot::Error(format!(
            "读取剪贴板超时（{}ms）",
            timeout.as_millis()
        )),
    }
}

/// 运行中的轮询任务句柄
#[derive(Debug)]
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// 启动轮询任务；第一次轮询立即执行，之后每隔 `period` 执行一次
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn spawn<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            log::info!("📋 剪贴板轮询已启动（间隔 {}ms）", period.as_millis());

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        tick().await;
                    }
                }
            }

            log::info!("📋 剪贴板轮询已停止");
        });

        Self { stop_tx, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 发出停止信号并等待任务退出
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.task.await {
            log::warn!("剪贴板轮询任务异常退出: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{normalize_read_timeout_ms, read_with_timeout, MonitorHandle, SharedSource};
    use crate::clipboard::content::{ClipContent, ClipboardSnapshot};
    use crate::clipboard::ClipboardSource;

    struct SlowSource(Duration);

    impl ClipboardSource for SlowSource {
        fn read(&mut self) -> ClipboardSnapshot {
            std::thread::sleep(self.0);
            ClipboardSnapshot::Content(ClipContent::Text("late".to_string()))
        }
    }

    fn shared(source: impl ClipboardSource + 'static) -> SharedSource {
        let boxed: Box<dyn ClipboardSource> = Box::new(source);
        Arc::new(Mutex::new(boxed))
    }

    #[test]
    fn normalize_read_timeout_clamps_bounds() {
        assert_eq!(normalize_read_timeout_ms(1), 50);
        assert_eq!(normalize_read_timeout_ms(2_000), 2_000);
        assert_eq!(normalize_read_timeout_ms(90_000), 30_000);
    }

    #[tokio::test]
    async fn slow_read_times_out_and_blocks_overlapping_reads() {
        let source = shared(SlowSource(Duration::from_millis(300)));

        let first = read_with_timeout(Arc::clone(&source), Duration::from_millis(20)).await;
        assert!(matches!(first, ClipboardSnapshot::Error(_)));

        let second = read_with_timeout(Arc::clone(&source), Duration::from_millis(100)).await;
        assert!(matches!(second, ClipboardSnapshot::Error(_)), "first read still holds the source");

        tokio::time::sleep(Duration::from_millis(400)).await;
        let third = read_with_timeout(source, Duration::from_millis(1_000)).await;
        assert_eq!(third, ClipboardSnapshot::Content(ClipContent::Text("late".to_string())));
    }

    #[tokio::test]
    async fn stop_prevents_further_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let handle = MonitorHandle::spawn(Duration::from_millis(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 1, "first tick fires immediately");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }
}
