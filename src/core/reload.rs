//! 配置热重载
//!
//! 重载时逐个 sink 重新推导配置（内联键 + 覆盖文件），与当前生效的配置逐键
//! 比较；只有发生变化的 sink 会用新配置重新构造，并在写锁下原子地替换。
//! 未变化的 sink 保持原实例不动。
//!
//! 替换实例在不持有写锁的情况下构造，因此重载期间 `log` 可以照常进行。
//! 多个重载之间由基础信息上的互斥锁串行化。sink 的名字集合不会因为重载而改变。

use crate::config::ReloadPolicy;
use crate::core::fanout::FanoutLogger;
use crate::core::resolver::{ConfigMap, ResolvedConfig};
use crate::error::{CompositeError, Result, TeeError};
use crate::sinks::traits::{bounded, Sink, SinkInfo};
use std::mem;
use tracing::{debug, info, warn};

/// 一次重载的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// 被替换的 sink，按构造顺序
    pub replaced: Vec<String>,
    /// 配置未变化的 sink
    pub unchanged: Vec<String>,
}

impl ReloadReport {
    pub fn is_noop(&self) -> bool {
        self.replaced.is_empty()
    }
}

/// 已构造好、等待换入的实例
struct Replacement {
    index: usize,
    name: String,
    config: ResolvedConfig,
    info: SinkInfo,
    instance: Box<dyn Sink>,
}

impl FanoutLogger {
    /// 用新的基础配置重载
    ///
    /// 某个 sink 重新推导或重新构造失败时，该 sink 保持原来的实例和配置。
    /// `ReloadPolicy::ContinueOnError` 下其余 sink 照常处理，最后返回单个
    /// `ReloadFailed` 或汇总的 `PartialReloadFailure`；`ReloadPolicy::FailFast`
    /// 下遇到第一个失败即停止，之前已经构造好的替换仍然生效。
    ///
    /// 被替换的旧实例在换出后关闭（`close_replaced_sinks`），关闭失败只记录日志。
    pub async fn reload(&self, new_base: ConfigMap) -> Result<ReloadReport> {
        let mut base = self.base_info.lock().await;
        let limit = self.settings.sink_timeout();

        // 只有持有 base 锁的重载会修改条目，快照在本次重载期间保持有效
        let snapshot: Vec<(String, ResolvedConfig, SinkInfo)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|entry| (entry.name.clone(), entry.config.clone(), entry.info.clone()))
            .collect();

        let mut report = ReloadReport::default();
        let mut replacements = Vec::new();
        let mut failures = Vec::new();

        for (index, (name, current, info)) in snapshot.into_iter().enumerate() {
            let derived = match self.resolver.derive_sink_config(&name, &new_base) {
                Ok(derived) => derived,
                Err(e) => {
                    warn!(parent: &self.span, sink = %name, error = %e, "could not re-derive sink config");
                    failures.push(TeeError::reload_failed(&name, e));
                    if self.settings.reload_policy == ReloadPolicy::FailFast {
                        break;
                    }
                    continue;
                }
            };

            if derived == current {
                debug!(parent: &self.span, sink = %name, "configuration unchanged");
                report.unchanged.push(name);
                continue;
            }

            info!(
                parent: &self.span,
                sink = %name,
                container = %info.container_name,
                changed = ?current.changed_keys(&derived),
                "configuration changed, reloading sink"
            );

            let info = info.with_config(derived.as_map().clone());
            let created = match self.registry.get(&name) {
                Ok(factory) => bounded(limit, factory.create(info.clone()))
                    .await
                    .map_err(|source| TeeError::SinkConstructionFailed {
                        name: name.clone(),
                        source,
                    }),
                Err(e) => Err(e),
            };

            match created {
                Ok(instance) => replacements.push(Replacement {
                    index,
                    name,
                    config: derived,
                    info,
                    instance,
                }),
                Err(e) => {
                    warn!(parent: &self.span, sink = %name, error = %e, "could not rebuild sink");
                    failures.push(TeeError::reload_failed(&name, e));
                    if self.settings.reload_policy == ReloadPolicy::FailFast {
                        break;
                    }
                }
            }
        }

        let superseded = self.swap_in(replacements, &mut report).await;
        base.config = new_base;
        drop(base);

        self.diagnostics.increment_reloads();
        self.diagnostics.add_sinks_replaced(report.replaced.len() as u64);
        self.diagnostics.add_reload_failures(failures.len() as u64);

        self.dispose(superseded).await;

        match failures.len() {
            0 => Ok(report),
            1 => Err(failures.remove(0)),
            _ => match CompositeError::from_causes("failed to reload some sinks", failures) {
                Some(composite) => Err(TeeError::PartialReloadFailure(composite)),
                None => Ok(report),
            },
        }
    }

    /// 用当前保存的基础配置重载，让覆盖文件的修改生效
    pub async fn reload_current(&self) -> Result<ReloadReport> {
        let current = self.base_info.lock().await.config.clone();
        self.reload(current).await
    }

    /// 在写锁下换入新实例，返回需要关闭的实例
    ///
    /// 日志器已经关闭时不再换入，新构造的实例直接作为待关闭实例返回。
    async fn swap_in(
        &self,
        replacements: Vec<Replacement>,
        report: &mut ReloadReport,
    ) -> Vec<(String, Box<dyn Sink>)> {
        let mut superseded = Vec::with_capacity(replacements.len());
        if replacements.is_empty() {
            return superseded;
        }

        let mut entries = self.entries.write().await;
        let closed = self.is_closed();
        for replacement in replacements {
            match entries.get_mut(replacement.index) {
                Some(entry) if !closed && entry.name == replacement.name => {
                    let old = mem::replace(&mut entry.instance, replacement.instance);
                    entry.config = replacement.config;
                    entry.info = replacement.info;
                    entry.generation += 1;
                    report.replaced.push(replacement.name.clone());
                    superseded.push((replacement.name, old));
                }
                _ => {
                    debug!(parent: &self.span, sink = %replacement.name, "logger closed, discarding replacement");
                    report.unchanged.push(replacement.name.clone());
                    superseded.push((replacement.name, replacement.instance));
                }
            }
        }
        superseded
    }

    async fn dispose(&self, superseded: Vec<(String, Box<dyn Sink>)>) {
        let limit = self.settings.sink_timeout();
        let discard_only = !self.settings.close_replaced_sinks && !self.is_closed();
        for (name, instance) in superseded {
            if discard_only {
                debug!(parent: &self.span, sink = %name, "dropping replaced instance without close");
                continue;
            }
            if let Err(e) = bounded(limit, instance.close()).await {
                warn!(parent: &self.span, sink = %name, error = %e, "failed to close replaced sink");
                self.diagnostics.add_close_failures(1);
            }
        }
    }
}
