//! tee_log 核心模块
//!
//! 本模块包含 fan-out 引擎、配置解析、热重载以及在它们之间流转的日志记录。

pub mod fanout;
pub mod record;
pub mod reload;
pub mod resolver;

// 重新导出核心类型
pub use fanout::{FanoutLogger, FanoutLoggerBuilder, PLUGIN_NAME};
pub use record::{LogRecord, LogWatcher, PartialMetadata, ReadConfig, RecordPool};
pub use reload::ReloadReport;
pub use resolver::{ConfigMap, ConfigResolver, ResolvedConfig};
