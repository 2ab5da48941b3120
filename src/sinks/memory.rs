//! 内存 Sink
//!
//! 把记录写进进程内共享的 [`MemoryJournal`]。宿主可以用它捕获日志流，
//! 测试用它观察 fan-out 引擎对每个 sink 做了什么：构造、写入、关闭。
//!
//! 支持的配置项：
//!
//! | 键 | 含义 |
//! |----|------|
//! | `fail-log` | 每次写入都返回错误 |
//! | `fail-close` | 关闭时返回错误 |
//! | `fail-construct` | 构造器直接失败 |
//! | `readable` | 声明读取能力，默认 `false` |

use crate::core::record::{LogRecord, LogWatcher, ReadConfig};
use crate::sinks::registry::SinkFactory;
use crate::sinks::traits::{
    LogReader, Sink, SinkCapabilities, SinkError, SinkInfo, SinkMetadata, SinkResult,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// 日志簿中一个 sink 实例的档案
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    /// 日志簿内唯一的实例编号，按构造顺序递增
    pub id: u64,
    pub name: String,
    /// 构造时收到的配置
    pub config: BTreeMap<String, String>,
    pub container_id: String,
    pub closed: bool,
}

#[derive(Debug, Default)]
struct JournalState {
    instances: Vec<InstanceRecord>,
    records: Vec<(u64, LogRecord)>,
    next_id: u64,
}

/// 多个内存 sink 共享的日志簿，克隆后指向同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    state: Arc<Mutex<JournalState>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JournalState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open_instance(&self, name: &str, info: &SinkInfo) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.instances.push(InstanceRecord {
            id,
            name: name.to_string(),
            config: info.config.clone(),
            container_id: info.container_id.clone(),
            closed: false,
        });
        id
    }

    fn push(&self, id: u64, record: LogRecord) {
        self.lock().records.push((id, record));
    }

    fn mark_closed(&self, id: u64) {
        if let Some(instance) = self.lock().instances.iter_mut().find(|i| i.id == id) {
            instance.closed = true;
        }
    }

    /// 名为 `name` 的所有实例收到的记录，按写入顺序
    pub fn records(&self, name: &str) -> Vec<LogRecord> {
        let state = self.lock();
        let ids: Vec<u64> = state
            .instances
            .iter()
            .filter(|i| i.name == name)
            .map(|i| i.id)
            .collect();
        state
            .records
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// 某个实例收到的记录
    pub fn records_of(&self, id: u64) -> Vec<LogRecord> {
        self.lock()
            .records
            .iter()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// 记录内容的字符串形式，便于断言
    pub fn lines(&self, name: &str) -> Vec<String> {
        self.records(name)
            .iter()
            .map(|record| record.line_lossy().into_owned())
            .collect()
    }

    /// 名为 `name` 的所有实例档案，按构造顺序
    pub fn instances(&self, name: &str) -> Vec<InstanceRecord> {
        self.lock()
            .instances
            .iter()
            .filter(|i| i.name == name)
            .cloned()
            .collect()
    }

    /// 构造次数
    pub fn constructed(&self, name: &str) -> usize {
        self.lock().instances.iter().filter(|i| i.name == name).count()
    }

    /// 关闭次数
    pub fn closed(&self, name: &str) -> usize {
        self.lock()
            .instances
            .iter()
            .filter(|i| i.name == name && i.closed)
            .count()
    }

    /// 当前未关闭的实例
    pub fn open_instances(&self, name: &str) -> Vec<InstanceRecord> {
        self.lock()
            .instances
            .iter()
            .filter(|i| i.name == name && !i.closed)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.instances.clear();
        state.records.clear();
    }
}

/// 内存 sink
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    id: u64,
    journal: MemoryJournal,
    fail_log: bool,
    fail_close: bool,
    readable: bool,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new(name: impl Into<String>, journal: MemoryJournal, info: &SinkInfo) -> SinkResult<Self> {
        let name = name.into();
        let fail_log = info.config_flag("fail-log", false)?;
        let fail_close = info.config_flag("fail-close", false)?;
        let readable = info.config_flag("readable", false)?;
        let id = journal.open_instance(&name, info);

        Ok(Self {
            name,
            id,
            journal,
            fail_log,
            fail_close,
            readable,
            closed: AtomicBool::new(false),
        })
    }

    /// 日志簿中的实例编号
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn log(&self, record: LogRecord) -> SinkResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        if self.fail_log {
            return Err(SinkError::Generic(format!(
                "{}: write rejected (fail-log)",
                self.name
            )));
        }
        self.journal.push(self.id, record);
        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        self.closed.store(true, Ordering::Release);
        self.journal.mark_closed(self.id);
        if self.fail_close {
            return Err(SinkError::Generic(format!(
                "{}: close rejected (fail-close)",
                self.name
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            read: self.readable,
        }
    }

    fn as_reader(&self) -> Option<&dyn LogReader> {
        if self.readable {
            Some(self)
        } else {
            None
        }
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new(self.name.clone())
            .with_capabilities(self.capabilities())
            .with_description(format!("In-memory sink #{}", self.id))
    }
}

impl LogReader for MemorySink {
    /// 返回本实例已有的记录；内存 sink 不支持跟随
    fn read_logs(&self, config: ReadConfig) -> LogWatcher {
        let records = config.apply(self.journal.records_of(self.id));
        let (sender, watcher) = LogWatcher::channel(records.len());
        for record in records {
            // 缓冲区按记录数分配，不会满
            if sender.try_send(Ok(record)).is_err() {
                break;
            }
        }
        watcher
    }
}

/// 内存 sink 的构造器
#[derive(Debug, Clone)]
pub struct MemorySinkFactory {
    name: String,
    journal: MemoryJournal,
    fail_construct: Arc<AtomicBool>,
}

impl MemorySinkFactory {
    /// `name` 是该构造器生产的实例在日志簿中的名字
    pub fn new(name: impl Into<String>, journal: MemoryJournal) -> Self {
        Self {
            name: name.into(),
            journal,
            fail_construct: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 让之后的构造全部失败或恢复正常
    pub fn set_fail_construct(&self, fail: bool) {
        self.fail_construct.store(fail, Ordering::Release);
    }

    pub fn journal(&self) -> &MemoryJournal {
        &self.journal
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn create(&self, info: SinkInfo) -> SinkResult<Box<dyn Sink>> {
        if self.fail_construct.load(Ordering::Acquire) || info.config_flag("fail-construct", false)? {
            return Err(SinkError::Config(format!(
                "{}: construction rejected",
                self.name
            )));
        }
        let sink = MemorySink::new(self.name.clone(), self.journal.clone(), &info)?;
        Ok(Box::new(sink))
    }
}
