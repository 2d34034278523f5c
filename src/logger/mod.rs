use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// 构建日志过滤器，`RUST_LOG` 存在时优先
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}

/// 初始化全局日志
///
/// 设置了 `log_dir` 时额外按天滚动写文件，返回的 guard 需要保持到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = build_filter(config);
    let stdout_layer = fmt::layer().with_target(true);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "devpool.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer().with_ansi(false).with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(file_layer)
                .init();

            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();

            None
        }
    }
}
