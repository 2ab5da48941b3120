//! tee_log Sink Traits
//!
//! 定义了统一的 Sink trait 接口，fan-out 引擎只通过此接口认识各个日志后端。
//!
//! # 架构设计
//!
//! - `Sink`: 对象安全的基础 trait，所有 sink 都支持 `log` / `close`
//! - `LogReader`: 可选能力，支持查询历史日志的 sink 通过
//!   `Sink::capabilities()` 声明并由 `Sink::as_reader()` 暴露
//!
//! # 使用示例
//!
//! ```rust
//! use tee_log::sinks::traits::{Sink, SinkResult};
//! use tee_log::LogRecord;
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct MyCustomSink;
//!
//! #[async_trait]
//! impl Sink for MyCustomSink {
//!     async fn log(&self, record: LogRecord) -> SinkResult<()> {
//!         println!("Custom sink received: {}", record.line_lossy());
//!         Ok(())
//!     }
//!
//!     async fn close(&self) -> SinkResult<()> {
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &str {
//!         "my_custom_sink"
//!     }
//! }
//! ```

use crate::core::record::{LogRecord, LogWatcher, ReadConfig};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

/// 基础 Sink trait
///
/// fan-out 引擎对每个 sink 的全部要求。记录按值传入，每个 sink 拿到的都是
/// 独立的副本，可以保留或修改。
#[async_trait]
pub trait Sink: Send + Sync + Debug {
    /// 写入一条日志记录
    async fn log(&self, record: LogRecord) -> SinkResult<()>;

    /// 关闭 sink 并释放资源
    ///
    /// 重复调用的行为由具体 sink 决定。
    async fn close(&self) -> SinkResult<()>;

    /// 获取 sink 的名称
    fn name(&self) -> &str;

    /// 声明 sink 支持的可选能力
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::default()
    }

    /// 支持读取的 sink 返回自身的读取接口
    fn as_reader(&self) -> Option<&dyn LogReader> {
        None
    }

    /// 获取 sink 的元数据
    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new(self.name().to_string()).with_capabilities(self.capabilities())
    }
}

/// 历史日志读取能力
pub trait LogReader: Send + Sync {
    /// 按读取配置返回一个记录流
    fn read_logs(&self, config: ReadConfig) -> LogWatcher;
}

/// Sink 可选能力标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkCapabilities {
    /// 是否支持历史读取
    pub read: bool,
}

impl SinkCapabilities {
    pub fn readable() -> Self {
        Self { read: true }
    }
}

/// Sink 元数据
#[derive(Debug, Clone)]
pub struct SinkMetadata {
    /// Sink 名称
    pub name: String,
    /// 能力
    pub capabilities: SinkCapabilities,
    /// 描述信息
    pub description: Option<String>,
}

impl SinkMetadata {
    /// 创建新的 sink 元数据
    pub fn new(name: String) -> Self {
        Self {
            name,
            capabilities: SinkCapabilities::default(),
            description: None,
        }
    }

    /// 设置能力
    pub fn with_capabilities(mut self, capabilities: SinkCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// 设置描述信息
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }
}

/// 传给 sink 构造器的信息包
///
/// `config` 在交给构造器时已经是该 sink 自己的配置（去掉了命名空间前缀并
/// 合并了覆盖文件）；其余字段描述产生日志流的容器。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkInfo {
    pub config: BTreeMap<String, String>,
    pub container_id: String,
    pub container_name: String,
    pub container_image: String,
    pub log_path: Option<PathBuf>,
    pub labels: BTreeMap<String, String>,
}

impl SinkInfo {
    pub fn new(config: BTreeMap<String, String>) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// 替换配置，保留其余元数据
    pub fn with_config(mut self, config: BTreeMap<String, String>) -> Self {
        self.config = config;
        self
    }

    pub fn with_container(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.container_id = id.into();
        self.container_name = name.into();
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// 解析布尔配置项，缺省时返回 `default`
    pub fn config_flag(&self, key: &str, default: bool) -> SinkResult<bool> {
        match self.config_value(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(SinkError::Config(format!(
                    "invalid boolean for '{}': {}",
                    key, other
                ))),
            },
        }
    }

    /// 容器 ID 的前 12 位
    pub fn short_container_id(&self) -> &str {
        let end = self
            .container_id
            .char_indices()
            .nth(12)
            .map_or(self.container_id.len(), |(i, _)| i);
        &self.container_id[..end]
    }
}

/// 通用 Sink 错误类型
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 通用错误
    #[error("Generic error: {0}")]
    Generic(String),

    /// Sink 已关闭
    #[error("Sink is closed")]
    Closed,

    /// 调用超时
    #[error("Sink call timed out after {0:?}")]
    Timeout(Duration),

    /// 不支持的操作
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Sink 结果类型
pub type SinkResult<T> = Result<T, SinkError>;

/// 为 sink 调用加上可选的超时
pub(crate) async fn bounded<T, F>(limit: Option<Duration>, call: F) -> SinkResult<T>
where
    F: Future<Output = SinkResult<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(SinkError::Timeout(limit))),
        None => call.await,
    }
}
