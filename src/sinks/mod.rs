//! tee_log Sinks 模块
//!
//! sink 接口、注册表以及内置的 sink 实现：标准输出、JSON 行文件和内存。

pub mod file;
pub mod memory;
pub mod registry;
pub mod stdout;
pub mod traits;

// 重新导出主要类型
pub use file::{JsonFileSink, JsonFileSinkFactory};
pub use memory::{InstanceRecord, MemoryJournal, MemorySink, MemorySinkFactory};
pub use registry::{global_registry, FnSinkFactory, SinkFactory, SinkRegistry};
pub use stdout::{OutputFormat, StdoutSink, StdoutSinkFactory};
pub use traits::{
    LogReader, Sink, SinkCapabilities, SinkError, SinkInfo, SinkMetadata, SinkResult,
};
