mod config;
mod crawler;
mod mail;
mod parser;
mod pipeline;
mod publisher;
mod storage;
mod summarizer;
mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use config::taxonomy::DEFAULT_TAXONOMY_PATH;
use config::{AppConfig, TaxonomyConfig, DEFAULT_CONFIG_PATH};
use pipeline::{batches_from_dir, retry_batch, BatchDownloader, Pipeline};
use storage::Database;
use utils::fs::today_str;
use utils::logger;

#[derive(Parser)]
#[command(name = "rxivbot")]
#[command(about = "预印本提醒邮件自动总结分类并发布到飞书", long_about = None)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 生成默认配置并初始化数据库
    Init,
    /// 拉取邮件并完成下载、总结、分类、上传全流程
    Run,
    /// 只拉取邮件并登记提取到的链接
    Fetch,
    /// 下载当天登记的链接
    Download {
        /// 共用一个浏览器会话并发下载
        #[arg(long)]
        concurrent: bool,
        /// 默认取配置中的 crawler.browser.workers
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// 处理已下载的 PDF 目录
    Process {
        /// 默认 <data_dir>/downloads/<今天>
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// 重新处理异常清单中的链接或文件
    Retry {
        #[arg(short, long, default_value = "error_file/error_file.txt")]
        file: PathBuf,
    },
    /// 启动每日定时任务
    Schedule {
        #[arg(long, default_value = "0 0 8 * * *")]
        cron: String,
    },
    /// 清理下载和临时文件并清空数据库
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load(&cli.config)
        .with_context(|| format!("读取配置失败: {}", cli.config.display()))?;

    let _guards = logger::init_logger(&app_config.storage.log_dir);
    info!("rxivbot 启动");

    match cli.command {
        Commands::Init => init_command(&cli.config, &app_config).await?,
        Commands::Run => run_command(&app_config).await?,
        Commands::Fetch => fetch_command(&app_config).await?,
        Commands::Download {
            concurrent,
            workers,
        } => {
            let workers = workers.unwrap_or(app_config.crawler.browser.workers);
            download_command(&app_config, concurrent, workers).await?
        }
        Commands::Process { dir } => process_command(&app_config, dir).await?,
        Commands::Retry { file } => retry_command(&app_config, &file).await?,
        Commands::Schedule { cron } => schedule_command(app_config, &cron).await?,
        Commands::Clean => clean_command(&app_config).await?,
    }

    Ok(())
}

async fn open_database(app_config: &AppConfig) -> Result<Database> {
    let url = app_config.storage.database_url();
    let db = Database::new(&url)
        .await
        .with_context(|| format!("连接数据库失败: {}", url))?;
    db.init_schema().await.context("初始化数据库表失败")?;
    Ok(db)
}

async fn build_pipeline(app_config: &AppConfig) -> Result<Pipeline> {
    let taxonomy = TaxonomyConfig::load(DEFAULT_TAXONOMY_PATH)
        .with_context(|| format!("读取分类配置失败: {}", DEFAULT_TAXONOMY_PATH))?;
    Pipeline::from_config(app_config, taxonomy).await
}

async fn init_command(config_path: &Path, app_config: &AppConfig) -> Result<()> {
    info!("初始化系统...");

    tokio::fs::create_dir_all(app_config.storage.downloads_dir()).await?;
    tokio::fs::create_dir_all(app_config.storage.work_dir()).await?;
    tokio::fs::create_dir_all("error_file").await?;
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    if config_path.exists() {
        info!("配置文件已存在，保留: {}", config_path.display());
    } else {
        app_config.save(config_path)?;
        info!("已生成配置文件: {}", config_path.display());
    }

    let taxonomy_path = Path::new(DEFAULT_TAXONOMY_PATH);
    if taxonomy_path.exists() {
        info!("分类配置已存在，保留: {}", DEFAULT_TAXONOMY_PATH);
    } else {
        if let Some(parent) = taxonomy_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let taxonomy_toml = toml::to_string_pretty(&TaxonomyConfig::default())?;
        tokio::fs::write(taxonomy_path, taxonomy_toml).await?;
        info!("已生成分类配置: {}", DEFAULT_TAXONOMY_PATH);
    }

    open_database(app_config).await?;
    info!("数据库初始化完成");

    info!("✅ 系统初始化完成！");
    info!("下一步:");
    info!("  1. 编辑 {} 配置邮箱、大模型和飞书密钥", config_path.display());
    info!("  2. 编辑 {} 调整文献分类", DEFAULT_TAXONOMY_PATH);
    info!("  3. 运行 'rxivbot run' 开始处理");

    Ok(())
}

async fn run_command(app_config: &AppConfig) -> Result<()> {
    let pipeline = build_pipeline(app_config).await?;
    pipeline.run().await;
    Ok(())
}

async fn fetch_command(app_config: &AppConfig) -> Result<()> {
    let pipeline = build_pipeline(app_config).await?;
    let batches = pipeline.collect_batches().await;

    let mut total = 0;
    for batch in &batches {
        match pipeline.record_batch(batch).await {
            Ok(ids) => {
                info!("批次 [{}]: {} 个链接", batch.label(), ids.len());
                total += batch.links.len();
            }
            Err(e) => error!("登记批次失败 [{}]: {}", batch.label(), e),
        }
    }

    info!("✅ 拉取完成: {} 个批次, {} 个链接", batches.len(), total);
    Ok(())
}

async fn download_command(app_config: &AppConfig, concurrent: bool, workers: usize) -> Result<()> {
    let db = Arc::new(open_database(app_config).await?);
    let downloader = BatchDownloader::new(
        &app_config.crawler,
        db,
        app_config.storage.downloads_dir(),
        app_config.storage.work_dir(),
    )
    .context("创建下载器失败")?;

    downloader
        .download_day(&today_str(), concurrent, workers)
        .await
        .context("下载任务失败")?;
    Ok(())
}

async fn process_command(app_config: &AppConfig, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| app_config.storage.downloads_dir().join(today_str()));
    let batches =
        batches_from_dir(&dir).with_context(|| format!("读取下载目录失败: {}", dir.display()))?;
    if batches.is_empty() {
        info!("{} 中没有可处理的批次目录", dir.display());
        return Ok(());
    }

    let pipeline = build_pipeline(app_config).await?;
    for batch in &batches {
        let report = pipeline.process_batch(batch).await;
        info!("批次 [{}] 完成: {:?}", batch.label(), report);
    }
    Ok(())
}

async fn retry_command(app_config: &AppConfig, file: &Path) -> Result<()> {
    let batch = retry_batch(file)
        .await
        .with_context(|| format!("读取异常清单失败: {}", file.display()))?;
    if batch.links.is_empty() {
        error!("异常清单中没有可处理的地址: {}", file.display());
        return Ok(());
    }

    let pipeline = build_pipeline(app_config).await?;
    let report = pipeline.process_batch(&batch).await;
    info!("✅ 异常补充完成: {:?}", report);
    Ok(())
}

async fn schedule_command(app_config: AppConfig, cron: &str) -> Result<()> {
    info!("启动定时任务调度器...");

    let pipeline = Arc::new(build_pipeline(&app_config).await?);
    let scheduler = utils::scheduler::TaskScheduler::new().await?;

    let job_fn = Arc::new(move || {
        let pipeline = Arc::clone(&pipeline);
        async move {
            info!("执行每日处理任务");
            pipeline.run().await;
        }
    });

    scheduler.add_daily_job(cron, job_fn).await?;
    scheduler.start().await?;

    info!("调度器运行中 ({})，按 Ctrl+C 停止", cron);
    tokio::signal::ctrl_c().await?;
    info!("收到停止信号");

    scheduler.shutdown().await?;
    Ok(())
}

async fn clean_command(app_config: &AppConfig) -> Result<()> {
    info!("开始清理缓存数据...");

    for dir in [app_config.storage.downloads_dir(), app_config.storage.work_dir()] {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!("已清理: {}", dir.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("目录不存在，跳过: {}", dir.display())
            }
            Err(e) => error!("删除失败 {}: {}", dir.display(), e),
        }
    }

    match open_database(app_config).await {
        Ok(db) => db.clear_all_tables().await?,
        Err(e) => info!("数据库连接失败，跳过清空: {}", e),
    }

    info!("✅ 清理完成");
    Ok(())
}
