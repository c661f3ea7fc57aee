use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use livefollow::{Application, ShutdownManager};
use livefollow_core::{models::Task, AppConfig};
use livefollow_dispatcher::RunAt;

#[derive(Parser, Debug)]
#[command(name = "livefollow")]
#[command(version)]
#[command(about = "直播间跟播任务调度系统")]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_name = "LEVEL", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, value_name = "FORMAT", value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 以守护进程方式运行调度器
    Run,
    /// 创建跟播任务
    Follow {
        /// 直播间ID，逗号分隔
        #[arg(long, value_delimiter = ',', required = true)]
        rooms: Vec<i64>,
        /// 执行时间 (RFC3339)，不指定则立即执行
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
        #[arg(long, default_value = "")]
        remark: String,
    },
    /// 创建测试跟播任务，只演练流程不发送消息
    TestFollow {
        #[arg(long, value_delimiter = ',', required = true)]
        rooms: Vec<i64>,
        #[arg(long, default_value = "")]
        remark: String,
    },
    /// 创建开播提醒
    Remind {
        #[arg(long)]
        room: i64,
        /// 开播时间 (RFC3339)
        #[arg(long, value_parser = parse_time)]
        at: DateTime<Utc>,
        #[arg(long, default_value = "")]
        remark: String,
    },
    /// 取消任务
    Cancel { task_id: String },
    /// 取消直播间的所有待执行任务
    CancelRoom { room: i64 },
    /// 待执行任务列表
    Tasks,
    /// 最近的执行日志
    Logs {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// 跟播执行统计
    Stats,
    /// 重试任务列表
    Retries {
        /// 取消该任务派生的所有待执行重试
        #[arg(long, value_name = "TASK_ID")]
        cancel: Option<String>,
    },
    /// 按开播时间表补建开播提醒
    SyncLiveTimes,
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("无效的时间 {value}: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.observability.log_format = format;
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    let app = Application::new(config).await?;
    match cli.command {
        Commands::Run => run_daemon(app).await,
        command => {
            let result = run_command(&app, command).await;
            app.database().close().await;
            result
        }
    }
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

fn init_metrics(listen_address: &str) -> Result<()> {
    let addr: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen_address}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标导出器失败")?;
    info!("Prometheus指标监听: {}", addr);
    Ok(())
}

async fn run_daemon(app: Application) -> Result<()> {
    info!("启动直播间跟播任务调度系统");

    if let Some(addr) = &app.config().observability.metrics_listen_address {
        init_metrics(addr)?;
    }

    let shutdown_manager = ShutdownManager::new();
    let app = Arc::new(app);
    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    // 比调度器的等待时间多留一点给数据库关闭
    match tokio::time::timeout(Duration::from_secs(35), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    Ok(())
}

async fn run_command(app: &Application, command: Commands) -> Result<()> {
    let manager = app.task_manager();
    match command {
        Commands::Run => anyhow::bail!("守护进程模式不能作为一次性命令执行"),
        Commands::Follow { rooms, at, remark } => {
            let subjects = manager.resolve_subjects(&rooms).await?;
            if subjects.len() < rooms.len() {
                warn!("部分直播间不存在，已忽略");
            }
            let run_at = at.map_or(RunAt::Immediate, RunAt::At);
            let created = manager.schedule_follow(subjects, run_at, &remark).await?;
            println!("{}", if created { "跟播任务已创建" } else { "跟播任务未创建" });
        }
        Commands::TestFollow { rooms, remark } => {
            let subjects = manager.resolve_subjects(&rooms).await?;
            let created = manager.schedule_test_follow(subjects, &remark).await?;
            println!("{}", if created { "测试跟播任务已创建" } else { "测试跟播任务未创建" });
        }
        Commands::Remind { room, at, remark } => {
            let created = manager.schedule_live_reminder(room, at, &remark).await?;
            println!("{}", if created { "开播提醒已创建" } else { "开播提醒未创建" });
        }
        Commands::Cancel { task_id } => {
            if manager.cancel_task(&task_id).await? {
                println!("已取消任务: {task_id}");
            } else {
                println!("没有待执行的任务: {task_id}");
            }
        }
        Commands::CancelRoom { room } => {
            let cancelled = manager.cancel_pipeline_for_subject(room).await?;
            println!("已取消直播间 {room} 的任务 {cancelled} 个");
        }
        Commands::Tasks => {
            for task in manager.list_active_tasks().await? {
                print_task(&task);
            }
        }
        Commands::Logs { limit } => {
            for entry in manager.list_task_logs(limit).await? {
                println!(
                    "{}  {:?}  {}  {}  {}",
                    entry.execution_time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    entry.outcome,
                    entry.task_id,
                    entry.subject_name.as_deref().unwrap_or("-"),
                    entry.message
                );
            }
        }
        Commands::Stats => {
            let stats = manager.execution_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Retries { cancel } => match cancel {
            Some(task_id) => {
                let cancelled = manager.cancel_retry_tasks(&task_id).await?;
                println!("已取消重试任务 {cancelled} 个");
            }
            None => {
                for task in manager.get_retry_tasks().await? {
                    print_task(&task);
                }
            }
        },
        Commands::SyncLiveTimes => {
            let created = manager.sync_tasks_with_live_times().await?;
            println!("补建开播提醒 {created} 个");
        }
    }
    Ok(())
}

fn print_task(task: &Task) {
    println!(
        "{}  {}  {}  {}  重试{}次  {}",
        task.run_time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        task.task_type,
        task.execution_status,
        task.task_id,
        task.retry_count,
        task.remark.lines().next().unwrap_or("")
    );
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
