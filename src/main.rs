//! # clipkeeper — 命令行入口
//!
//! 本文件只负责参数解析、日志初始化与命令分发，
//! 业务逻辑在库内的 `ClipboardHistory` 门面中，详见 `lib.rs` 架构文档。

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use clipkeeper::clipboard::ContentKind;
use clipkeeper::db::{config, HistoryFilter, HistoryItem};
use clipkeeper::export::{self, ExportFormat};
use clipkeeper::settings::{
    KEY_AUTO_CLEANUP_DAYS, KEY_MAX_HISTORY_ITEMS, KEY_MONITOR_FILES, KEY_MONITOR_IMAGES,
    KEY_MONITOR_TEXT, KEY_POLL_INTERVAL_MS,
};
use clipkeeper::{AppError, ClipboardHistory, HistoryEvent};

const EXIT_ERROR: u8 = 1;

/// clipkeeper - 剪贴板历史记录工具
#[derive(Parser, Debug)]
#[command(name = "clipkeeper")]
#[command(version)]
#[command(about = "Clipboard history: capture, search, favorite, restore and export")]
struct Cli {
    /// 数据库文件路径（默认读取 config.json 或应用数据目录）
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 持续监控剪贴板，直到 Ctrl-C
    Watch {
        /// 轮询间隔（毫秒），会写回设置
        #[arg(long, value_name = "MS")]
        interval_ms: Option<u64>,
        /// 单次读取剪贴板的超时（毫秒），仅对本次运行生效
        #[arg(long, value_name = "MS")]
        read_timeout_ms: Option<u64>,
    },
    /// 立即读取一次剪贴板
    Capture,
    /// 列出历史
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// 切换收藏状态
    Favorite { id: i64 },
    /// 删除一条历史
    Delete { id: i64 },
    /// 清空历史（默认保留收藏）
    Clear {
        /// 连同收藏一起删除
        #[arg(long)]
        all: bool,
    },
    /// 把历史条目写回剪贴板
    Restore { id: i64 },
    /// 导出历史
    Export {
        path: PathBuf,
        #[arg(long, default_value = "json")]
        format: ExportFormat,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// 管理标签
    Tag {
        #[command(subcommand)]
        action: TagAction,
    },
    /// 查看或修改设置
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// 历史统计
    Stats,
    /// 查看或修改数据库目录（写入 config.json）
    DbPath {
        /// 新的数据库目录
        #[arg(long, value_name = "DIR", conflicts_with = "reset")]
        set: Option<String>,
        /// 恢复默认目录
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TagAction {
    /// 为条目添加标签（不存在则创建）
    Add { id: i64, name: String },
    /// 移除条目的标签
    Remove { id: i64, name: String },
    /// 列出全部标签
    List,
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Set {
        #[arg(long)]
        max_items: Option<usize>,
        /// 自动清理天数，0 表示关闭
        #[arg(long)]
        cleanup_days: Option<i64>,
        #[arg(long)]
        text: Option<bool>,
        #[arg(long)]
        images: Option<bool>,
        #[arg(long)]
        files: Option<bool>,
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// 内容类型：text / image / files
    #[arg(long)]
    kind: Option<ContentKind>,
    /// 只显示收藏
    #[arg(long)]
    favorites: bool,
    /// 文本子串（不区分大小写）
    #[arg(long)]
    search: Option<String>,
    /// 只显示该时间之后的条目（RFC 3339）
    #[arg(long, value_name = "RFC3339")]
    since: Option<String>,
    /// 按标签名过滤
    #[arg(long)]
    tag: Option<String>,
}

impl FilterArgs {
    /// 标签不存在时返回 `None`，表示结果必然为空
    fn to_filter(&self, history: &ClipboardHistory) -> Result<Option<HistoryFilter>, AppError> {
        let mut filter = HistoryFilter::default();
        if let Some(kind) = self.kind {
            filter = filter.kind(kind);
        }
        if self.favorites {
            filter = filter.favorites();
        }
        if let Some(search) = &self.search {
            filter = filter.search(search.clone());
        }
        if let Some(since) = &self.since {
            let at = DateTime::parse_from_rfc3339(since)
                .map_err(|e| AppError::Config(format!("无效的时间 '{}': {}", since, e)))?;
            filter = filter.created_after(at.with_timezone(&Utc));
        }
        if let Some(name) = &self.tag {
            match history.store().find_tag(name)? {
                Some(tag) => filter = filter.tag(tag.id),
                None => return Ok(None),
            }
        }
        Ok(Some(filter))
    }
}

fn describe(item: &HistoryItem) -> String {
    match item.content() {
        Ok(content) => content.summary(),
        Err(_) => format!("[{} data]", item.kind),
    }
}

fn print_item(item: &HistoryItem) {
    println!(
        "{:>6}  {}  {:<5}  {}  {}",
        item.id,
        item.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        item.kind,
        if item.favorite { "★" } else { " " },
        describe(item)
    );
}

async fn watch(
    history: &ClipboardHistory,
    interval_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
) -> Result<(), AppError> {
    if let Some(ms) = interval_ms {
        history.set_poll_interval_ms(ms)?;
    }
    if let Some(ms) = read_timeout_ms {
        history.set_read_timeout_ms(ms);
    }
    let mut events = history.subscribe();
    history.start_monitoring()?;
    println!("正在监控剪贴板，按 Ctrl-C 退出");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    log::warn!("监听 Ctrl-C 失败: {}", e);
                }
                break;
            }
            event = events.recv() => match event {
                Ok(HistoryEvent::NewItem { id, .. }) => match history.get(id) {
                    Ok(item) => print_item(&item),
                    Err(e) => log::warn!("读取新条目 {} 失败: {}", id, e),
                },
                Ok(HistoryEvent::StorageError { message }) => {
                    eprintln!("历史暂不可用，新内容未保存: {}", message);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => log::warn!("事件积压，跳过 {} 条", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    history.stop_monitoring().await;
    Ok(())
}

fn db_path_command(set: Option<String>, reset: bool) -> Result<(), AppError> {
    if reset {
        config::save_db_config(None)?;
    } else if let Some(dir) = set {
        config::save_db_config(Some(dir))?;
    }
    println!("{}", config::resolve_db_path(None)?.display());
    Ok(())
}

async fn run(cli: Cli) -> Result<(), AppError> {
    if let Commands::DbPath { set, reset } = cli.command {
        return db_path_command(set, reset);
    }

    let db_path = config::resolve_db_path(cli.db.as_deref())?;
    let history = ClipboardHistory::open(&db_path)?;

    match cli.command {
        Commands::Watch {
            interval_ms,
            read_timeout_ms,
        } => watch(&history, interval_ms, read_timeout_ms).await?,
        Commands::Capture => match history.poll_now() {
            Some(id) => print_item(&history.get(id)?),
            None => println!("剪贴板没有新内容"),
        },
        Commands::List {
            filter,
            limit,
            offset,
        } => {
            if let Some(filter) = filter.to_filter(&history)? {
                for item in history.query(&filter, Some(limit), offset)? {
                    print_item(&item);
                }
            }
        }
        Commands::Favorite { id } => {
            let favorite = history.toggle_favorite(id)?;
            println!("条目 {} {}", id, if favorite { "已收藏" } else { "已取消收藏" });
        }
        Commands::Delete { id } => {
            if history.delete(id)? {
                println!("已删除条目 {}", id);
            } else {
                println!("条目 {} 不存在", id);
            }
        }
        Commands::Clear { all } => {
            let removed = history.clear(!all)?;
            println!("已删除 {} 条", removed);
        }
        Commands::Restore { id } => {
            history.restore(id)?;
            println!("已将条目 {} 写回剪贴板", id);
        }
        Commands::Export {
            path,
            format,
            filter,
        } => {
            let filter = filter.to_filter(&history)?;
            let writer = BufWriter::new(File::create(&path)?);
            let count = match filter {
                Some(filter) => history.export(&filter, format, writer)?,
                None => {
                    export::write_items(&[], format, writer)?;
                    0
                }
            };
            println!("已导出 {} 条到 {}", count, path.display());
        }
        Commands::Tag { action } => match action {
            TagAction::Add { id, name } => {
                let tag = history.tag_item(id, &name)?;
                println!("条目 {} 已添加标签 {}", id, tag.name);
            }
            TagAction::Remove { id, name } => {
                if history.untag_item(id, &name)? {
                    println!("条目 {} 已移除标签 {}", id, name);
                } else {
                    println!("标签 {} 不存在", name);
                }
            }
            TagAction::List => {
                for tag in history.all_tags()? {
                    println!("{:>4}  {}", tag.id, tag.name);
                }
            }
        },
        Commands::Settings { action } => match action {
            SettingsAction::Show => {
                for (key, value) in history.settings().to_entries() {
                    println!("{:<18} {}", key, value);
                }
            }
            SettingsAction::Set {
                max_items,
                cleanup_days,
                text,
                images,
                files,
                interval_ms,
            } => {
                let mut settings = history.settings();
                let updates = [
                    (KEY_MAX_HISTORY_ITEMS, max_items.map(|v| v.to_string())),
                    (KEY_AUTO_CLEANUP_DAYS, cleanup_days.map(|v| v.to_string())),
                    (KEY_MONITOR_TEXT, text.map(|v| v.to_string())),
                    (KEY_MONITOR_IMAGES, images.map(|v| v.to_string())),
                    (KEY_MONITOR_FILES, files.map(|v| v.to_string())),
                    (KEY_POLL_INTERVAL_MS, interval_ms.map(|v| v.to_string())),
                ];
                for (key, value) in updates {
                    if let Some(value) = value {
                        let applied = settings.apply(key, &value)?;
                        println!("{} = {}", key, applied);
                    }
                }
                let evicted = history.apply_settings(settings)?;
                if evicted > 0 {
                    println!("按新的保留策略清理 {} 条", evicted);
                }
            }
        },
        Commands::Stats => {
            let stats = history.stats()?;
            println!("总数:   {}", stats.total);
            println!("今日:   {}", stats.today);
            println!("收藏:   {}", stats.favorites);
            println!("文本:   {}", stats.text);
            println!("图片:   {}", stats.images);
            println!("文件:   {}", stats.files);
        }
        Commands::DbPath { .. } => {}
    }

    Ok(())
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("错误: {}", e);
            if e.is_storage_unavailable() {
                eprintln!("提示: 可用 `clipkeeper db-path` 查看数据库位置");
            }
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Commands, SettingsAction};
    use clipkeeper::clipboard::ContentKind;
    use clipkeeper::export::ExportFormat;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_parses_filters() {
        let cli = Cli::parse_from([
            "clipkeeper", "--db", "/tmp/h.db", "list", "--kind", "images", "--favorites",
            "--search", "foo", "--limit", "5",
        ]);
        assert_eq!(cli.db.as_deref(), Some(std::path::Path::new("/tmp/h.db")));
        match cli.command {
            Commands::List { filter, limit, offset } => {
                assert_eq!(filter.kind, Some(ContentKind::Image));
                assert!(filter.favorites);
                assert_eq!(filter.search.as_deref(), Some("foo"));
                assert_eq!((limit, offset), (5, 0));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn export_and_settings_parse() {
        let cli = Cli::parse_from(["clipkeeper", "export", "out.csv", "--format", "csv"]);
        assert!(matches!(cli.command, Commands::Export { format: ExportFormat::Csv, .. }));

        let cli = Cli::parse_from(["clipkeeper", "settings", "set", "--max-items", "10", "--images", "false"]);
        match cli.command {
            Commands::Settings { action: SettingsAction::Set { max_items, images, text, .. } } => {
                assert_eq!(max_items, Some(10));
                assert_eq!(images, Some(false));
                assert_eq!(text, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
