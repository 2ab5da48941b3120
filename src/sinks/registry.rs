//! Sink 注册表
//!
//! 名字到构造器的映射。fan-out 引擎只通过注册表认识各类 sink：
//! `tee-drivers` 中的每个名字都必须在注册表中有对应的工厂。
//!
//! ```rust
//! use tee_log::sinks::{MemoryJournal, MemorySinkFactory, SinkRegistry};
//!
//! let journal = MemoryJournal::new();
//! let registry = SinkRegistry::with_builtin_sinks();
//! registry
//!     .register("audit", MemorySinkFactory::new("audit", journal))
//!     .unwrap();
//! assert!(registry.contains("audit"));
//! assert!(registry.contains("json-file"));
//! ```

use crate::error::{Result, TeeError};
use crate::sinks::file::JsonFileSinkFactory;
use crate::sinks::memory::{MemoryJournal, MemorySinkFactory};
use crate::sinks::stdout::StdoutSinkFactory;
use crate::sinks::traits::{Sink, SinkInfo, SinkResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// Sink 构造器
///
/// `info.config` 已经是该 sink 自己的配置。
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn create(&self, info: SinkInfo) -> SinkResult<Box<dyn Sink>>;
}

/// 用同步闭包实现的构造器
pub struct FnSinkFactory<F> {
    constructor: F,
}

impl<F> FnSinkFactory<F>
where
    F: Fn(SinkInfo) -> SinkResult<Box<dyn Sink>> + Send + Sync,
{
    pub fn new(constructor: F) -> Self {
        Self { constructor }
    }
}

#[async_trait]
impl<F> SinkFactory for FnSinkFactory<F>
where
    F: Fn(SinkInfo) -> SinkResult<Box<dyn Sink>> + Send + Sync,
{
    async fn create(&self, info: SinkInfo) -> SinkResult<Box<dyn Sink>> {
        (self.constructor)(info)
    }
}

/// Sink 注册表
///
/// 注册和查找都只需要 `&self`，可以放在 `Arc` 中共享。
pub struct SinkRegistry {
    factories: RwLock<HashMap<String, Arc<dyn SinkFactory>>>,
}

impl SinkRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// 注册了内置 sink 的注册表：`stdout`、`json-file`、`memory`
    pub fn with_builtin_sinks() -> Self {
        Self::with_memory_journal(MemoryJournal::new())
    }

    /// 同 [`with_builtin_sinks`](Self::with_builtin_sinks)，`memory` 写入指定的日志簿
    pub fn with_memory_journal(journal: MemoryJournal) -> Self {
        let registry = Self::new();
        let builtins: [(&str, Arc<dyn SinkFactory>); 3] = [
            ("stdout", Arc::new(StdoutSinkFactory)),
            ("json-file", Arc::new(JsonFileSinkFactory)),
            ("memory", Arc::new(MemorySinkFactory::new("memory", journal))),
        ];
        {
            let mut factories = registry.write_map();
            for (name, factory) in builtins {
                factories.insert(name.to_string(), factory);
            }
        }
        registry
    }

    /// 注册构造器，名字已存在时返回 `DuplicateSinkType`
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> Result<()>
    where
        F: SinkFactory + 'static,
    {
        self.register_arc(name, Arc::new(factory))
    }

    pub fn register_arc(&self, name: impl Into<String>, factory: Arc<dyn SinkFactory>) -> Result<()> {
        let name = name.into();
        let mut factories = self.write_map();
        if factories.contains_key(&name) {
            return Err(TeeError::DuplicateSinkType(name));
        }
        factories.insert(name, factory);
        Ok(())
    }

    /// 用同步闭包注册构造器
    pub fn register_fn<F>(&self, name: impl Into<String>, constructor: F) -> Result<()>
    where
        F: Fn(SinkInfo) -> SinkResult<Box<dyn Sink>> + Send + Sync + 'static,
    {
        self.register(name, FnSinkFactory::new(constructor))
    }

    /// 查找构造器，不存在时返回 `SinkTypeNotFound`
    pub fn get(&self, name: &str) -> Result<Arc<dyn SinkFactory>> {
        self.read_map()
            .get(name)
            .cloned()
            .ok_or_else(|| TeeError::SinkTypeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_map().contains_key(name)
    }

    /// 已注册的名字，按字母排序
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_map().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    // 注册表只做插入和查找，锁中毒后数据仍然一致
    fn read_map(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn SinkFactory>>> {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_map(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn SinkFactory>>> {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("names", &self.names())
            .finish()
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<SinkRegistry>> =
    Lazy::new(|| Arc::new(SinkRegistry::with_builtin_sinks()));

/// 进程级默认注册表，预先注册了内置 sink
///
/// 未显式指定注册表的 `FanoutLogger` 使用它。
pub fn global_registry() -> Arc<SinkRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}
