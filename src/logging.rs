//! 引擎自身的诊断日志
//!
//! 核心组件不依赖全局日志状态：解析器和 fan-out 引擎各自持有一个
//! `tracing::Span`，所有事件都以它为父 span 发出。宿主可以传入自己的 span，
//! 也可以调用 [`init_subscriber`] 安装一个简单的全局订阅器。

use crate::config::{validate_config, TeeConfig};
use crate::core::fanout::PLUGIN_NAME;
use crate::error::{Result, TeeError};
use tracing::Span;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

/// 默认的诊断 span，携带 `plugin_name` 字段
pub fn plugin_span() -> Span {
    tracing::info_span!("tee", plugin_name = PLUGIN_NAME)
}

/// 根据配置的级别构建过滤器，`RUST_LOG` 存在时优先
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let level = level.to_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(TeeError::InvalidLogLevel(level)),
    }

    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .map_err(|e| TeeError::TracingError(format!("invalid RUST_LOG: {}", e))),
        _ => EnvFilter::try_new(&level).map_err(|e| TeeError::TracingError(e.to_string())),
    }
}

/// 安装全局订阅器
///
/// 输出不带时间戳的文本行，时间由宿主的日志系统负责。
/// 已经存在全局订阅器时返回 `TracingError`。
pub fn init_subscriber(config: &TeeConfig) -> Result<()> {
    validate_config(config)?;
    let filter = build_filter(&config.log_level)?;

    Registry::default()
        .with(filter)
        .with(fmt::layer().without_time().with_target(false))
        .try_init()
        .map_err(|e| TeeError::TracingError(e.to_string()))
}
