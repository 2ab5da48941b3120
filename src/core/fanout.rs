//! Fan-out 引擎
//!
//! 一个 `FanoutLogger` 对应一条日志流（例如一个容器）。它持有一组具名的
//! sink 实例，把每条记录的独立副本分发给所有实例，并汇总各自的失败。
//!
//! sink 的名字集合在构造时确定，之后不再增减；重载只替换配置发生变化的
//! 实例（见 [`reload`](crate::core::reload)）。

use crate::config::{validate_config, TeeConfig};
use crate::core::record::{LogRecord, LogWatcher, ReadConfig, RecordPool};
use crate::core::resolver::{normalize_names, ConfigResolver, ResolvedConfig};
use crate::diagnostics::{DiagnosticsSnapshot, FanoutDiagnostics};
use crate::error::{CompositeError, Result, TeeError};
use crate::logging::plugin_span;
use crate::sinks::registry::{global_registry, SinkRegistry};
use crate::sinks::traits::{bounded, Sink, SinkInfo};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn, Span};

/// 宿主看到的日志驱动名
pub const PLUGIN_NAME: &str = "tee";

/// 一个活动 sink
#[derive(Debug)]
pub(crate) struct SinkEntry {
    pub(crate) name: String,
    pub(crate) instance: Box<dyn Sink>,
    /// 构造该实例时使用的配置
    pub(crate) config: ResolvedConfig,
    /// 交给构造器的信息包，`config` 字段与上面一致
    pub(crate) info: SinkInfo,
    /// 每次被重载替换时加一
    pub(crate) generation: u64,
}

/// 多路日志分发器
#[derive(Debug)]
pub struct FanoutLogger {
    pub(crate) entries: RwLock<Vec<SinkEntry>>,
    pub(crate) registry: Arc<SinkRegistry>,
    pub(crate) resolver: ConfigResolver,
    pub(crate) settings: TeeConfig,
    /// 最近一次构造或重载使用的基础信息；锁同时用于串行化重载
    pub(crate) base_info: Mutex<SinkInfo>,
    pub(crate) closed: AtomicBool,
    pool: Arc<RecordPool>,
    pub(crate) diagnostics: Arc<FanoutDiagnostics>,
    pub(crate) span: Span,
}

/// `FanoutLogger` 构建器
#[derive(Debug, Default)]
pub struct FanoutLoggerBuilder {
    registry: Option<Arc<SinkRegistry>>,
    settings: TeeConfig,
    span: Option<Span>,
    pool: Option<Arc<RecordPool>>,
}

impl FanoutLoggerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定注册表，缺省使用 [`global_registry`]
    pub fn with_registry(mut self, registry: Arc<SinkRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_config(mut self, settings: TeeConfig) -> Self {
        self.settings = settings;
        self
    }

    /// 指定诊断日志的父 span，缺省为 `tee{plugin_name="tee"}`
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// 与宿主共享记录池
    pub fn with_pool(mut self, pool: Arc<RecordPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// 从 `info.config` 解析 sink 名列表后构造
    pub async fn build(self, info: SinkInfo) -> Result<FanoutLogger> {
        let resolver = self.resolver();
        let names = resolver.resolve_sink_names(&info.config)?;
        self.build_with_names(names, info).await
    }

    /// 用给定的 sink 名列表构造
    ///
    /// 全部成功或全部失败：任何一个 sink 构造失败时，本批次中已经构造出的
    /// sink 会先被关闭，再返回错误。
    pub async fn build_with_names<I, S>(self, names: I, info: SinkInfo) -> Result<FanoutLogger>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        validate_config(&self.settings)?;
        let names = normalize_names(names);
        if names.is_empty() {
            return Err(TeeError::NoSinksConfigured);
        }

        let resolver = self.resolver();
        let span = resolver_span(&self.span);
        let registry = self.registry.unwrap_or_else(global_registry);
        let limit = self.settings.sink_timeout();

        let mut entries: Vec<SinkEntry> = Vec::with_capacity(names.len());
        for name in &names {
            match build_entry(&registry, &resolver, name, &info, limit, &span).await {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(parent: &span, sink = %name, error = %e, "could not create sink");
                    close_batch(&entries, limit, &span).await;
                    return Err(e);
                }
            }
        }

        let pool = self
            .pool
            .unwrap_or_else(|| Arc::new(RecordPool::new(self.settings.record_pool_capacity)));

        Ok(FanoutLogger {
            entries: RwLock::new(entries),
            registry,
            resolver,
            settings: self.settings,
            base_info: Mutex::new(info),
            closed: AtomicBool::new(false),
            pool,
            diagnostics: Arc::new(FanoutDiagnostics::new()),
            span,
        })
    }

    fn resolver(&self) -> ConfigResolver {
        ConfigResolver::from_config(&self.settings).with_span(resolver_span(&self.span))
    }
}

fn resolver_span(span: &Option<Span>) -> Span {
    span.clone().unwrap_or_else(plugin_span)
}

/// 查找构造器、推导配置、调用构造器
async fn build_entry(
    registry: &SinkRegistry,
    resolver: &ConfigResolver,
    name: &str,
    base: &SinkInfo,
    limit: Option<Duration>,
    span: &Span,
) -> Result<SinkEntry> {
    let factory = registry.get(name)?;
    let config = resolver.derive_sink_config(name, &base.config)?;
    let info = base.clone().with_config(config.as_map().clone());

    let instance = bounded(limit, factory.create(info.clone()))
        .await
        .map_err(|source| TeeError::SinkConstructionFailed {
            name: name.to_string(),
            source,
        })?;

    info!(parent: span, sink = %name, config = ?config.as_map(), "adding sink");
    Ok(SinkEntry {
        name: name.to_string(),
        instance,
        config,
        info,
        generation: 0,
    })
}

/// 构造失败时回收本批次已经构造出的 sink，关闭错误只记录
async fn close_batch(entries: &[SinkEntry], limit: Option<Duration>, span: &Span) {
    for entry in entries {
        if let Err(e) = bounded(limit, entry.instance.close()).await {
            warn!(parent: span, sink = %entry.name, error = %e, "close after failed construction");
        }
    }
}

impl FanoutLogger {
    pub fn builder() -> FanoutLoggerBuilder {
        FanoutLoggerBuilder::new()
    }

    /// 用给定注册表和名字列表构造，其余设置取默认值
    pub async fn new<I, S>(names: I, info: SinkInfo, registry: Arc<SinkRegistry>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::builder()
            .with_registry(registry)
            .build_with_names(names, info)
            .await
    }

    /// 把记录分发给所有 sink
    ///
    /// 每个 sink 拿到独立的副本；某个 sink 失败不会影响其余 sink。失败按遇到
    /// 的顺序汇总成 `PartialLogFailure`。无论成败，原始记录在分发结束后都会
    /// 恰好一次归还给记录池。
    pub async fn log(&self, record: LogRecord) -> Result<()> {
        self.diagnostics.increment_records_dispatched();
        let limit = self.settings.sink_timeout();
        let mut causes = Vec::new();
        let mut written = 0u64;

        {
            let entries = self.entries.read().await;
            for entry in entries.iter() {
                match bounded(limit, entry.instance.log(record.clone())).await {
                    Ok(()) => written += 1,
                    Err(source) => {
                        debug!(parent: &self.span, sink = %entry.name, error = %source, "sink rejected record");
                        causes.push(TeeError::SinkFailed {
                            name: entry.name.clone(),
                            source,
                        });
                    }
                }
            }
        }

        self.pool.put(record);
        self.diagnostics.add_sink_writes(written);
        self.diagnostics.add_sink_write_failures(causes.len() as u64);

        match CompositeError::from_causes("failed to log on some sinks", causes) {
            Some(composite) => Err(TeeError::PartialLogFailure(composite)),
            None => Ok(()),
        }
    }

    /// 关闭所有 sink，失败汇总成 `PartialCloseFailure`
    ///
    /// 重复关闭的行为取决于各个 sink。
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let limit = self.settings.sink_timeout();
        let mut causes = Vec::new();

        {
            let entries = self.entries.read().await;
            for entry in entries.iter() {
                if let Err(source) = bounded(limit, entry.instance.close()).await {
                    warn!(parent: &self.span, sink = %entry.name, error = %source, "failed to close sink");
                    causes.push(TeeError::SinkFailed {
                        name: entry.name.clone(),
                        source,
                    });
                }
            }
        }

        self.diagnostics.add_close_failures(causes.len() as u64);
        match CompositeError::from_causes("failed to close on some sinks", causes) {
            Some(composite) => Err(TeeError::PartialCloseFailure(composite)),
            None => Ok(()),
        }
    }

    /// 从第一个支持读取的 sink 读取历史记录
    ///
    /// 多个可读 sink 的结果不会合并；没有可读 sink 时返回立即结束的空流。
    pub async fn read_logs(&self, config: ReadConfig) -> LogWatcher {
        let entries = self.entries.read().await;
        for entry in entries.iter() {
            if !entry.instance.capabilities().read {
                continue;
            }
            if let Some(reader) = entry.instance.as_reader() {
                debug!(parent: &self.span, sink = %entry.name, "reading logs");
                return reader.read_logs(config);
            }
        }
        LogWatcher::empty()
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    /// 活动 sink 的名字，按构造顺序
    pub async fn sink_names(&self) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// 某个 sink 当前生效的配置
    pub async fn sink_config(&self, name: &str) -> Option<ResolvedConfig> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.config.clone())
    }

    /// 每个 sink 被替换的次数
    pub async fn generations(&self) -> Vec<(String, u64)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|entry| (entry.name.clone(), entry.generation))
            .collect()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// 宿主取记录用的池
    pub fn pool(&self) -> &Arc<RecordPool> {
        &self.pool
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn override_file(&self) -> &Path {
        self.resolver.override_file()
    }

    pub fn settings(&self) -> &TeeConfig {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SinkRegistry> {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
