//! 日志记录定义
//!
//! 此模块定义了在 fan-out 引擎中流转的日志记录、记录池以及历史读取所用的
//! 配置与记录流。

use crate::sinks::traits::{SinkError, SinkResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// 默认记录池容量
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// 被拆分的长行的分片信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PartialMetadata {
    /// 是否为最后一个分片
    pub last: bool,
    /// 分片组 ID
    pub id: String,
    /// 分片序号，从 1 开始
    pub ordinal: u32,
}

/// 日志记录
///
/// 每个 sink 拿到的都是 `clone()` 出来的独立副本。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// 原始日志内容，不含结尾换行
    pub line: Vec<u8>,
    /// 来源流，例如 `stdout` / `stderr`
    pub source: String,
    /// 记录时间
    pub timestamp: DateTime<Utc>,
    /// 附加属性
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    /// 分片信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialMetadata>,
}

impl LogRecord {
    /// 创建新的日志记录，时间戳为当前时间
    pub fn new(source: impl Into<String>, line: impl Into<Vec<u8>>) -> Self {
        Self {
            line: line.into(),
            source: source.into(),
            timestamp: Utc::now(),
            attrs: BTreeMap::new(),
            partial: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_partial(mut self, partial: PartialMetadata) -> Self {
        self.partial = Some(partial);
        self
    }

    /// 以 UTF-8 有损方式查看内容
    pub fn line_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.line)
    }

    pub fn is_partial(&self) -> bool {
        self.partial.as_ref().is_some_and(|p| !p.last)
    }

    /// 清空内容以便复用，保留 `line` 的容量
    fn reset(&mut self) {
        self.line.clear();
        self.source.clear();
        self.timestamp = DateTime::<Utc>::default();
        self.attrs.clear();
        self.partial = None;
    }
}

/// 记录池
///
/// 宿主从池中取记录填充后交给 fan-out 引擎；引擎在所有 sink 副本分发完毕后
/// 把原始记录放回池中，每次 `log` 调用恰好一次。
#[derive(Debug)]
pub struct RecordPool {
    free: Mutex<Vec<LogRecord>>,
    capacity: usize,
    released: AtomicU64,
}

impl RecordPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity.min(DEFAULT_POOL_CAPACITY))),
            capacity,
            released: AtomicU64::new(0),
        }
    }

    /// 取出一条空记录
    pub fn get(&self) -> LogRecord {
        let reused = match self.free.lock() {
            Ok(mut free) => free.pop(),
            Err(_) => None,
        };
        reused.unwrap_or_else(|| LogRecord {
            line: Vec::new(),
            source: String::new(),
            timestamp: Utc::now(),
            attrs: BTreeMap::new(),
            partial: None,
        })
    }

    /// 归还记录，池满时直接丢弃
    pub fn put(&self, mut record: LogRecord) {
        self.released.fetch_add(1, Ordering::Relaxed);
        record.reset();
        if let Ok(mut free) = self.free.lock() {
            if free.len() < self.capacity {
                free.push(record);
            }
        }
    }

    /// 池中空闲记录数
    pub fn idle(&self) -> usize {
        self.free.lock().map(|free| free.len()).unwrap_or(0)
    }

    /// 累计归还次数
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RecordPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

/// 历史读取配置
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadConfig {
    /// 只返回此时间之后（含）的记录
    pub since: Option<DateTime<Utc>>,
    /// 只返回此时间之前（不含）的记录
    pub until: Option<DateTime<Utc>>,
    /// 只返回最后 N 条
    pub tail: Option<usize>,
    /// 读完现有内容后继续跟随新记录
    pub follow: bool,
}

impl ReadConfig {
    pub fn tail(n: usize) -> Self {
        Self {
            tail: Some(n),
            ..Default::default()
        }
    }

    /// 检查记录是否落在时间窗口内
    pub fn matches(&self, record: &LogRecord) -> bool {
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.timestamp >= until {
                return false;
            }
        }
        true
    }

    /// 应用时间窗口和 tail 限制
    pub fn apply(&self, records: Vec<LogRecord>) -> Vec<LogRecord> {
        let mut selected: Vec<LogRecord> =
            records.into_iter().filter(|r| self.matches(r)).collect();
        if let Some(tail) = self.tail {
            let skip = selected.len().saturating_sub(tail);
            selected.drain(..skip);
        }
        selected
    }
}

/// 历史记录流
///
/// 由读取方的后台任务填充；发送端全部释放后流结束。
#[derive(Debug)]
pub struct LogWatcher {
    receiver: mpsc::Receiver<SinkResult<LogRecord>>,
}

impl LogWatcher {
    /// 创建记录流及其发送端
    pub fn channel(buffer: usize) -> (mpsc::Sender<SinkResult<LogRecord>>, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (sender, Self { receiver })
    }

    /// 不产生任何记录、立即结束的流
    pub fn empty() -> Self {
        let (_, watcher) = Self::channel(1);
        watcher
    }

    /// 接收下一条记录，流结束时返回 `None`
    pub async fn next(&mut self) -> Option<SinkResult<LogRecord>> {
        self.receiver.recv().await
    }

    /// 停止接收，读取方会在下一次发送时发现流已关闭
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// 读取全部记录，遇到第一个错误即返回
    pub async fn collect_records(mut self) -> SinkResult<Vec<LogRecord>> {
        let mut records = Vec::new();
        while let Some(item) = self.next().await {
            records.push(item?);
        }
        Ok(records)
    }
}

/// 读取方发送记录的辅助函数，接收端已关闭时返回 `SinkError::Closed`
pub(crate) async fn send_record(
    sender: &mpsc::Sender<SinkResult<LogRecord>>,
    item: SinkResult<LogRecord>,
) -> SinkResult<()> {
    sender.send(item).await.map_err(|_| SinkError::Closed)
}
