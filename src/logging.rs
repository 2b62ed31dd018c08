use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::Layered, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// 初始化日志系统
///
/// 配置了 `log_file` 时日志按天滚动写入文件，返回的 guard 需要持有到进程退出。
pub fn init_logging(
    log_level: &str,
    log_format: Option<&str>,
    log_file: Option<&str>,
    quiet: bool,
) -> Result<Option<WorkerGuard>> {
    let level = if quiet { "error" } else { log_level };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (writer, guard) = match log_file {
        Some(path) => {
            let path = Path::new(path);
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("日志文件路径无效: {:?}", path))?;
            std::fs::create_dir_all(directory)
                .with_context(|| format!("无法创建日志目录: {:?}", directory))?;

            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let layer: BoxedLayer = match (log_format, writer) {
        (Some("json"), Some(w)) => fmt::layer().json().with_writer(w).boxed(),
        (Some("json"), None) => fmt::layer().json().boxed(),
        (Some("pretty") | Some("dev"), Some(w)) => {
            fmt::layer().pretty().with_ansi(false).with_writer(w).boxed()
        }
        (Some("pretty") | Some("dev"), None) => fmt::layer().pretty().boxed(),
        (_, Some(w)) => fmt::layer().compact().with_ansi(false).with_writer(w).boxed(),
        (_, None) => fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layer)
        .try_init()
        .context("日志系统初始化失败")?;

    Ok(guard)
}
