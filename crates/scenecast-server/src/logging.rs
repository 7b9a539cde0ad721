//! 日志初始化
//!
//! `RUST_LOG` 优先，其次是配置中的日志级别。

use scenecast_config::LoggingConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 构建环境过滤器
///
/// `override_level` 来自命令行参数，优先级最高。
pub fn build_filter(config: &LoggingConfig, override_level: Option<&str>) -> EnvFilter {
    let level = override_level.unwrap_or(config.level.as_str());
    if override_level.is_none() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化全局 subscriber。重复调用时返回 `false`。
pub fn init_logging(config: &LoggingConfig, override_level: Option<&str>) -> bool {
    let filter = build_filter(config, override_level);
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    result.is_ok()
}
