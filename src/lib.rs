//! tee_log - 多路日志分发
//!
//! tee_log 把同一条日志流同时写入多个 sink。启用哪些 sink 由基础配置中的
//! `tee-drivers` 决定，每个 sink 的私有配置来自 `"<sink>:<key>"` 形式的
//! 命名空间键以及一个可选的覆盖文件；覆盖文件修改后可以热重载，只有配置
//! 发生变化的 sink 会被重建。
//!
//! # 快速开始
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use tee_log::sinks::{MemoryJournal, SinkRegistry};
//! use tee_log::{FanoutLogger, LogRecord, SinkInfo, TeeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let journal = MemoryJournal::new();
//!     let registry = Arc::new(SinkRegistry::with_memory_journal(journal.clone()));
//!
//!     let mut config = BTreeMap::new();
//!     config.insert("tee-drivers".to_string(), "memory".to_string());
//!     config.insert("memory:readable".to_string(), "true".to_string());
//!
//!     let logger = FanoutLogger::builder()
//!         .with_registry(registry)
//!         .with_config(TeeConfig {
//!             override_file: "/nonexistent/tee.json".into(),
//!             ..Default::default()
//!         })
//!         .build(SinkInfo::new(config))
//!         .await?;
//!
//!     logger.log(LogRecord::new("stdout", "hello")).await?;
//!     assert_eq!(journal.lines("memory"), vec!["hello".to_string()]);
//!
//!     logger.close().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod logging;
#[cfg(unix)]
pub mod signal;
pub mod sinks;

// 重新导出主要类型
pub use config::{load_config_from_file, load_config_from_str, ReloadPolicy, TeeConfig};
pub use diagnostics::{DiagnosticsSnapshot, FanoutDiagnostics};
pub use error::{CompositeError, Result, TeeError};
pub use logging::{init_subscriber, plugin_span};
#[cfg(unix)]
pub use signal::spawn_reload_on_sighup;

// 重新导出核心功能
pub use core::fanout::{FanoutLogger, FanoutLoggerBuilder, PLUGIN_NAME};
pub use core::record::{LogRecord, LogWatcher, PartialMetadata, ReadConfig, RecordPool};
pub use core::reload::ReloadReport;
pub use core::resolver::{
    ConfigMap, ConfigResolver, ResolvedConfig, DEFAULT_DRIVERS_ENV, DEFAULT_OVERRIDE_FILE,
    DRIVERS_KEY,
};
pub use sinks::{Sink, SinkError, SinkInfo, SinkRegistry};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
