//! 定义 fan-out 引擎的内部诊断与指标。
//!
//! 每个 `FanoutLogger` 持有自己的一份计数器，不存在全局状态，
//! 同一进程中的多个日志流互不干扰。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 内部诊断与指标数据结构。
///
/// 使用原子操作确保线程安全。
#[derive(Debug)]
pub struct FanoutDiagnostics {
    /// 引擎创建时间
    start_time: Instant,

    /// `log` 调用次数
    records_dispatched: AtomicU64,

    /// 成功写入的 sink 副本数
    sink_writes: AtomicU64,

    /// 写入失败的 sink 副本数
    sink_write_failures: AtomicU64,

    /// 关闭失败次数
    close_failures: AtomicU64,

    /// 完成的重载次数
    reloads: AtomicU64,

    /// 因配置变化被替换的 sink 实例数
    sinks_replaced: AtomicU64,

    /// 重载中失败的 sink 数
    reload_failures: AtomicU64,
}

/// 诊断数据的快照，用于外部查询。
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticsSnapshot {
    pub uptime: Duration,
    pub records_dispatched: u64,
    pub sink_writes: u64,
    pub sink_write_failures: u64,
    pub close_failures: u64,
    pub reloads: u64,
    pub sinks_replaced: u64,
    pub reload_failures: u64,
    /// sink 副本写入成功率（百分比）
    pub success_rate_percent: f64,
}

impl FanoutDiagnostics {
    /// 创建新的诊断实例。
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            records_dispatched: AtomicU64::new(0),
            sink_writes: AtomicU64::new(0),
            sink_write_failures: AtomicU64::new(0),
            close_failures: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            sinks_replaced: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
        }
    }

    pub fn increment_records_dispatched(&self) {
        self.records_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sink_writes(&self, count: u64) {
        self.sink_writes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_sink_write_failures(&self, count: u64) {
        self.sink_write_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_close_failures(&self, count: u64) {
        self.close_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_reloads(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_sinks_replaced(&self, count: u64) {
        self.sinks_replaced.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_reload_failures(&self, count: u64) {
        self.reload_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// 获取诊断数据的快照。
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let sink_writes = self.sink_writes.load(Ordering::Relaxed);
        let sink_write_failures = self.sink_write_failures.load(Ordering::Relaxed);

        let success_rate_percent = if sink_writes + sink_write_failures > 0 {
            (sink_writes as f64 / (sink_writes + sink_write_failures) as f64) * 100.0
        } else {
            100.0
        };

        DiagnosticsSnapshot {
            uptime: self.start_time.elapsed(),
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            sink_writes,
            sink_write_failures,
            close_failures: self.close_failures.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            sinks_replaced: self.sinks_replaced.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
            success_rate_percent,
        }
    }

    /// 重置所有计数器（主要用于测试）。
    pub fn reset(&self) {
        self.records_dispatched.store(0, Ordering::Relaxed);
        self.sink_writes.store(0, Ordering::Relaxed);
        self.sink_write_failures.store(0, Ordering::Relaxed);
        self.close_failures.store(0, Ordering::Relaxed);
        self.reloads.store(0, Ordering::Relaxed);
        self.sinks_replaced.store(0, Ordering::Relaxed);
        self.reload_failures.store(0, Ordering::Relaxed);
    }
}

impl Default for FanoutDiagnostics {
    fn default() -> Self {
        Self::new()
    }
}
