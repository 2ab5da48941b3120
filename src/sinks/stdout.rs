//! 标准输出 Sink
//!
//! 配置项：`format`（`text` 或 `json`，默认 `text`）、`colored`（默认 `false`）、
//! `tag`（默认取容器名，其次是短容器 ID）。

use crate::core::record::LogRecord;
use crate::sinks::registry::SinkFactory;
use crate::sinks::traits::{Sink, SinkError, SinkInfo, SinkMetadata, SinkResult};
use async_trait::async_trait;
use colored::Colorize;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(raw: &str) -> SinkResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(SinkError::Config(format!("unknown stdout format: {}", other))),
        }
    }
}

/// A sink that writes records to stdout
#[derive(Debug, Clone)]
pub struct StdoutSink {
    tag: String,
    format: OutputFormat,
    colored: bool,
}

impl StdoutSink {
    /// Creates a stdout sink from the per-sink configuration
    pub fn from_info(info: &SinkInfo) -> SinkResult<Self> {
        let format = match info.config_value("format") {
            Some(raw) => OutputFormat::parse(raw)?,
            None => OutputFormat::Text,
        };
        let colored = info.config_flag("colored", false)?;
        let tag = match info.config_value("tag") {
            Some(tag) => tag.to_string(),
            None if !info.container_name.is_empty() => {
                info.container_name.trim_start_matches('/').to_string()
            }
            None => info.short_container_id().to_string(),
        };

        Ok(Self {
            tag,
            format,
            colored,
        })
    }

    /// Creates a new stdout sink with custom settings
    pub fn with_options(tag: impl Into<String>, format: OutputFormat, colored: bool) -> Self {
        Self {
            tag: tag.into(),
            format,
            colored,
        }
    }

    /// Formats the record as one output line, including the trailing newline
    fn format_record(&self, record: &LogRecord) -> SinkResult<String> {
        let mut output = match self.format {
            OutputFormat::Json => serde_json::to_string(&JsonLine::new(&self.tag, record))
                .map_err(|e| SinkError::Serialization(e.to_string()))?,
            OutputFormat::Text => {
                let source = self.format_source(&record.source);
                let line = record.line_lossy();
                if self.tag.is_empty() {
                    format!("{}: {}", source, line)
                } else {
                    format!("[{}] {}: {}", self.tag, source, line)
                }
            }
        };
        output.push('\n');
        Ok(output)
    }

    /// Formats the stream name with optional coloring
    fn format_source(&self, source: &str) -> String {
        if !self.colored {
            return source.to_string();
        }
        match source {
            "stderr" => source.red().to_string(),
            "stdout" => source.green().to_string(),
            other => other.cyan().to_string(),
        }
    }
}

#[derive(serde::Serialize)]
struct JsonLine<'a> {
    #[serde(skip_serializing_if = "is_blank")]
    tag: &'a str,
    source: &'a str,
    time: String,
    log: std::borrow::Cow<'a, str>,
    #[serde(skip_serializing_if = "no_attrs")]
    attrs: &'a BTreeMap<String, String>,
}

fn is_blank(tag: &&str) -> bool {
    tag.is_empty()
}

fn no_attrs(attrs: &&BTreeMap<String, String>) -> bool {
    attrs.is_empty()
}

impl<'a> JsonLine<'a> {
    fn new(tag: &'a str, record: &'a LogRecord) -> Self {
        Self {
            tag,
            source: &record.source,
            time: record.timestamp.to_rfc3339(),
            log: record.line_lossy(),
            attrs: &record.attrs,
        }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn log(&self, record: LogRecord) -> SinkResult<()> {
        let formatted = self.format_record(&record)?;
        // Spawn blocking operation for stdout write
        let result = tokio::task::spawn_blocking(move || {
            let mut stdout = io::stdout().lock();
            stdout.write_all(formatted.as_bytes())?;
            stdout.flush()
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(io_err)) => Err(SinkError::Io(io_err)),
            Err(join_err) => Err(SinkError::Io(io::Error::other(join_err.to_string()))),
        }
    }

    async fn close(&self) -> SinkResult<()> {
        // 刷新标准输出流以确保所有数据都被写入
        io::stdout().flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }

    fn metadata(&self) -> SinkMetadata {
        SinkMetadata::new("stdout".to_string()).with_description(format!(
            "Standard output sink with format={:?}, colored={}",
            self.format, self.colored
        ))
    }
}

/// `stdout` 的构造器
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSinkFactory;

#[async_trait]
impl SinkFactory for StdoutSinkFactory {
    async fn create(&self, info: SinkInfo) -> SinkResult<Box<dyn Sink>> {
        Ok(Box::new(StdoutSink::from_info(&info)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn info(pairs: &[(&str, &str)]) -> SinkInfo {
        let config: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SinkInfo::new(config).with_container("0123456789abcdef", "/web")
    }

    #[test]
    fn test_stdout_sink_defaults() {
        let sink = StdoutSink::from_info(&info(&[])).unwrap();
        assert_eq!(sink.tag, "web");
        assert_eq!(sink.format, OutputFormat::Text);
        assert!(!sink.colored);

        let anonymous = StdoutSink::from_info(&SinkInfo::default().with_container("0123456789abcdef", "")).unwrap();
        assert_eq!(anonymous.tag, "0123456789ab");
    }

    #[test]
    fn test_stdout_sink_config_errors() {
        assert!(matches!(
            StdoutSink::from_info(&info(&[("format", "xml")])),
            Err(SinkError::Config(_))
        ));
        assert!(matches!(
            StdoutSink::from_info(&info(&[("colored", "often")])),
            Err(SinkError::Config(_))
        ));
    }

    #[test]
    fn test_format_text() {
        let sink = StdoutSink::with_options("api", OutputFormat::Text, false);
        let formatted = sink
            .format_record(&LogRecord::new("stderr", "boom"))
            .unwrap();
        assert_eq!(formatted, "[api] stderr: boom\n");

        let untagged = StdoutSink::with_options("", OutputFormat::Text, false);
        assert_eq!(
            untagged.format_record(&LogRecord::new("stdout", "ok")).unwrap(),
            "stdout: ok\n"
        );
    }

    #[test]
    fn test_format_source_colored() {
        let sink = StdoutSink::with_options("api", OutputFormat::Text, true);
        assert!(sink.format_source("stderr").contains("stderr"));
        assert!(sink.format_source("stdout").contains("stdout"));

        let plain = StdoutSink::with_options("api", OutputFormat::Text, false);
        assert_eq!(plain.format_source("stderr"), "stderr");
    }

    #[test]
    fn test_format_json() {
        let sink = StdoutSink::with_options("api", OutputFormat::Json, false);
        let record = LogRecord::new("stdout", "hello")
            .with_timestamp(Utc.timestamp_opt(0, 0).unwrap())
            .with_attr("k", "v");
        let formatted = sink.format_record(&record).unwrap();
        assert!(formatted.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(formatted.trim_end()).unwrap();
        assert_eq!(value["tag"], "api");
        assert_eq!(value["log"], "hello");
        assert_eq!(value["source"], "stdout");
        assert_eq!(value["attrs"]["k"], "v");
    }

    #[tokio::test]
    async fn test_log_and_close() {
        let sink = StdoutSinkFactory
            .create(info(&[("tag", "unit-test")]))
            .await
            .unwrap();
        assert_eq!(sink.name(), "stdout");
        assert!(sink.log(LogRecord::new("stdout", "from test")).await.is_ok());
        assert!(sink.close().await.is_ok());
    }
}
