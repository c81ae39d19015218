//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别来自 `[logging].level`，`RUST_LOG` 优先；配置了 `[logging].file` 时额外追加一份无 ANSI 的文件日志。

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSection;

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化全局订阅器；重复调用时静默忽略
pub fn init(logging: &LoggingSection, verbose: bool) -> std::io::Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };

    let file_layer = match &logging.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer())
        .with(file_layer)
        .try_init();
    Ok(())
}
