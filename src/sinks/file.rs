//! JSON 行文件 Sink
//!
//! 每条记录写成一行 JSON：`{"log":"...","stream":"stdout","time":"..."}`。
//! 文件路径取配置项 `path`，缺省时使用宿主提供的 `log_path`。
//!
//! 此 sink 支持读取：按 `since` / `until` / `tail` 过滤已有内容，
//! `follow` 为真时继续轮询文件尾部的新行，直到读取方关闭记录流或 sink 被关闭。

use crate::core::record::{send_record, LogRecord, LogWatcher, PartialMetadata, ReadConfig};
use crate::sinks::registry::SinkFactory;
use crate::sinks::traits::{
    LogReader, Sink, SinkCapabilities, SinkError, SinkInfo, SinkMetadata, SinkResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, watch, Mutex};

/// 跟随模式下的轮询间隔
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// 读取记录流的缓冲
const READ_BUFFER: usize = 64;

/// 文件中的一行
#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    log: String,
    stream: String,
    time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partial: Option<PartialMetadata>,
}

impl FileEntry {
    fn from_record(record: LogRecord) -> Self {
        Self {
            log: String::from_utf8_lossy(&record.line).into_owned(),
            stream: record.source,
            time: record.timestamp,
            attrs: record.attrs,
            partial: record.partial,
        }
    }

    fn into_record(self) -> LogRecord {
        LogRecord {
            line: self.log.into_bytes(),
            source: self.stream,
            timestamp: self.time,
            attrs: self.attrs,
            partial: self.partial,
        }
    }
}

/// JSON 行文件 Sink
#[derive(Debug)]
pub struct JsonFileSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    /// 关闭后置为 true，通知跟随中的读取任务
    closed: watch::Sender<bool>,
}

impl JsonFileSink {
    /// 打开（必要时创建）目标文件，以追加方式写入
    pub async fn open(path: impl Into<PathBuf>) -> SinkResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
            closed: watch::Sender::new(false),
        })
    }

    pub async fn from_info(info: &SinkInfo) -> SinkResult<Self> {
        let path = match info.config_value("path") {
            Some(path) if !path.trim().is_empty() => PathBuf::from(path),
            _ => info.log_path.clone().ok_or_else(|| {
                SinkError::Config("json-file requires `path` or a host log path".to_string())
            })?,
        };
        Self::open(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for JsonFileSink {
    async fn log(&self, record: LogRecord) -> SinkResult<()> {
        let mut line = serde_json::to_vec(&FileEntry::from_record(record))
            .map_err(|e| SinkError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SinkError::Closed)?;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        let mut guard = self.writer.lock().await;
        let result = match guard.take() {
            Some(mut writer) => match writer.flush().await {
                Ok(()) => writer.get_mut().sync_all().await,
                Err(e) => Err(e),
            },
            // 重复关闭视为成功
            None => Ok(()),
        };
        // 写入端已经释放，无论刷新是否成功都要结束跟随者
        self.closed.send_replace(true);
        result.map_err(SinkError::from)
    }

    fn name(&self) -> &str {
        "json-file"
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::readable()
    }

    fn as_reader(&self) -> Option<&dyn LogReader> {
        Some(self)
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("json-file".to_string())
            .with_capabilities(self.capabilities())
            .with_description(format!("JSON lines file at {}", self.path.display()))
    }
}

impl LogReader for JsonFileSink {
    fn read_logs(&self, config: ReadConfig) -> LogWatcher {
        let (sender, watcher) = LogWatcher::channel(READ_BUFFER);
        let path = self.path.clone();
        let closed = self.closed.subscribe();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = stream_file(path, config, closed, &sender).await {
                        // 读取方已关闭时发送失败，无需处理
                        let _ = send_record(&sender, Err(e)).await;
                    }
                });
            }
            Err(_) => {
                let _ = sender.try_send(Err(SinkError::Unsupported(
                    "json-file reads require a tokio runtime".to_string(),
                )));
            }
        }
        watcher
    }
}

/// 解析文件内容中的完整行，返回记录和已消费的字节数
fn parse_lines(buf: &[u8]) -> (Vec<SinkResult<LogRecord>>, usize) {
    let mut items = Vec::new();
    let mut consumed = 0;
    while let Some(pos) = buf[consumed..].iter().position(|b| *b == b'\n') {
        let line = &buf[consumed..consumed + pos];
        consumed += pos + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        items.push(
            serde_json::from_slice::<FileEntry>(line)
                .map(FileEntry::into_record)
                .map_err(|e| SinkError::Serialization(e.to_string())),
        );
    }
    (items, consumed)
}

async fn stream_file(
    path: PathBuf,
    config: ReadConfig,
    mut closed: watch::Receiver<bool>,
    sender: &mpsc::Sender<SinkResult<LogRecord>>,
) -> SinkResult<()> {
    let mut file = File::open(&path).await?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await?;

    let (items, consumed) = parse_lines(&buf);
    let records = items.into_iter().collect::<SinkResult<Vec<_>>>()?;
    for record in config.apply(records) {
        send_record(sender, Ok(record)).await?;
    }

    if !config.follow {
        return Ok(());
    }

    let mut offset = consumed as u64;
    let mut pending: Vec<u8> = Vec::new();
    let mut finished = *closed.borrow_and_update();
    loop {
        if !finished {
            finished = tokio::select! {
                _ = sender.closed() => return Ok(()),
                // sink 被丢弃时 changed() 返回错误，同样视为结束
                _ = closed.changed() => true,
                _ = tokio::time::sleep(FOLLOW_POLL_INTERVAL) => false,
            };
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let read = file.read_to_end(&mut pending).await?;
        offset += read as u64;

        let (items, consumed) = parse_lines(&pending);
        pending.drain(..consumed);
        for item in items {
            let record = item?;
            if let Some(until) = config.until {
                if record.timestamp >= until {
                    return Ok(());
                }
            }
            if config.matches(&record) {
                send_record(sender, Ok(record)).await?;
            }
        }

        // 关闭前写入的行已在最后一轮读出
        if finished {
            return Ok(());
        }
    }
}

/// `json-file` 的构造器
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileSinkFactory;

#[async_trait]
impl SinkFactory for JsonFileSinkFactory {
    async fn create(&self, info: SinkInfo) -> SinkResult<Box<dyn Sink>> {
        Ok(Box::new(JsonFileSink::from_info(&info).await?))
    }
}
