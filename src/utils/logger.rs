use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 控制台 + 按天滚动的处理日志 + 单独的错误日志。
/// 返回的 guard 必须在 main 中持有，否则文件日志会丢失。
pub fn init_logger(log_dir: impl AsRef<Path>) -> Vec<WorkerGuard> {
    let log_dir = log_dir.as_ref();

    let (process_writer, process_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(log_dir, "paper_processing.log"),
    );
    let (error_writer, error_guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::daily(log_dir, "errors.log"),
    );

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "rxivbot=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(process_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(LevelFilter::WARN),
        )
        .init();

    vec![process_guard, error_guard]
}
