//! Fan-out 集成测试
//!
//! 通过公开 API 验证多路分发的整体行为：构造的全部成功或全部失败、
//! 部分失败的汇总、热重载只替换变化的 sink，以及并发写入与重载。

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tee_log::sinks::{MemoryJournal, MemorySinkFactory, SinkResult};
use tee_log::{
    FanoutLogger, LogRecord, ReadConfig, ReloadPolicy, Sink, SinkError, SinkInfo, SinkRegistry,
    TeeConfig, TeeError,
};
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    journal: MemoryJournal,
    registry: Arc<SinkRegistry>,
}

impl Harness {
    fn new(names: &[&str]) -> Self {
        let journal = MemoryJournal::new();
        let registry = Arc::new(SinkRegistry::with_builtin_sinks());
        for name in names {
            registry
                .register(*name, MemorySinkFactory::new(*name, journal.clone()))
                .unwrap();
        }
        Self {
            dir: TempDir::new().unwrap(),
            journal,
            registry,
        }
    }

    fn settings(&self, env_var: &str) -> TeeConfig {
        TeeConfig {
            override_file: self.dir.path().join("tee.json"),
            drivers_env_var: env_var.to_string(),
            ..Default::default()
        }
    }

    fn write_overrides(&self, json: &str) {
        std::fs::write(self.dir.path().join("tee.json"), json).unwrap();
    }

    async fn build(&self, settings: TeeConfig, pairs: &[(&str, &str)]) -> tee_log::Result<FanoutLogger> {
        FanoutLogger::builder()
            .with_registry(self.registry.clone())
            .with_config(settings)
            .build(SinkInfo::new(config(pairs)).with_container("4f2a9c1d0e3b7a65", "api"))
            .await
    }
}

fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_inline_drivers_example() {
    let h = Harness::new(&["a", "b"]);
    let logger = h
        .build(
            h.settings("TEE_IT_UNSET_1"),
            &[("tee-drivers", "a,b"), ("a:level", "info")],
        )
        .await
        .unwrap();

    assert_eq!(logger.sink_names().await, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(config(&[("level", "info")]), h.journal.instances("a")[0].config);
    assert!(h.journal.instances("b")[0].config.is_empty());
}

#[tokio::test]
async fn test_no_drivers_anywhere_fails() {
    let h = Harness::new(&["a"]);
    let result = h.build(h.settings("TEE_IT_UNSET_2"), &[("a:level", "info")]).await;
    assert!(matches!(result, Err(TeeError::NoSinksConfigured)));
    assert_eq!(h.journal.constructed("a"), 0);
}

#[tokio::test]
async fn test_env_fallback_names_sinks() {
    let h = Harness::new(&["a", "b"]);
    std::env::set_var("TEE_IT_FALLBACK", "b");
    let logger = h.build(h.settings("TEE_IT_FALLBACK"), &[]).await.unwrap();
    std::env::remove_var("TEE_IT_FALLBACK");

    assert_eq!(logger.sink_names().await, vec!["b".to_string()]);
    assert_eq!(h.journal.constructed("a"), 0);
}

#[tokio::test]
async fn test_override_file_applies_at_construction() {
    let h = Harness::new(&["a"]);
    h.write_overrides(r#"{"a": {"level": "debug"}}"#);
    let logger = h
        .build(
            h.settings("TEE_IT_UNSET_3"),
            &[("tee-drivers", "a"), ("a:level", "info")],
        )
        .await
        .unwrap();

    assert_eq!(
        logger.sink_config("a").await.unwrap().get("level"),
        Some("debug")
    );
}

#[tokio::test]
async fn test_kth_construction_failure_closes_earlier_sinks() {
    let h = Harness::new(&["a", "b", "c", "d"]);
    let result = h
        .build(
            h.settings("TEE_IT_UNSET_4"),
            &[("tee-drivers", "a,b,c,d"), ("c:fail-construct", "true")],
        )
        .await;

    assert!(matches!(
        result,
        Err(TeeError::SinkConstructionFailed { ref name, .. }) if name == "c"
    ));
    for name in ["a", "b"] {
        assert_eq!(h.journal.constructed(name), 1, "{} built", name);
        assert_eq!(h.journal.closed(name), 1, "{} closed", name);
    }
    assert_eq!(h.journal.constructed("d"), 0);
}

#[tokio::test]
async fn test_every_sink_sees_every_record_despite_failures() {
    let h = Harness::new(&["a", "b", "c"]);
    let logger = h
        .build(
            h.settings("TEE_IT_UNSET_5"),
            &[
                ("tee-drivers", "a,b,c"),
                ("a:fail-log", "true"),
                ("c:fail-log", "true"),
            ],
        )
        .await
        .unwrap();

    for i in 0..3 {
        let err = logger
            .log(LogRecord::new("stdout", format!("m{}", i)))
            .await
            .unwrap_err();
        let causes: Vec<String> = err
            .composite()
            .unwrap()
            .causes()
            .iter()
            .map(|cause| match cause {
                TeeError::SinkFailed { name, .. } => name.clone(),
                other => panic!("unexpected cause {:?}", other),
            })
            .collect();
        assert_eq!(causes, vec!["a".to_string(), "c".to_string()]);
    }

    assert_eq!(h.journal.lines("b").len(), 3);
    assert_eq!(logger.pool().released(), 3);
}

#[tokio::test]
async fn test_pooled_records_are_returned_once_per_log() {
    let h = Harness::new(&["a", "b"]);
    let logger = h
        .build(h.settings("TEE_IT_UNSET_6"), &[("tee-drivers", "a,b")])
        .await
        .unwrap();

    for i in 0..5 {
        let mut record = logger.pool().get();
        record.source.push_str("stdout");
        record.line.extend_from_slice(format!("pooled {}", i).as_bytes());
        logger.log(record).await.unwrap();
    }

    assert_eq!(logger.pool().released(), 5);
    assert_eq!(logger.pool().idle(), 1);
    assert_eq!(h.journal.lines("a").last().map(String::as_str), Some("pooled 4"));
}

#[tokio::test]
async fn test_reload_touches_only_changed_sink() {
    let h = Harness::new(&["a", "b", "c"]);
    let base = [("tee-drivers", "a,b,c"), ("b:level", "info")];
    let logger = h.build(h.settings("TEE_IT_UNSET_7"), &base).await.unwrap();

    let unchanged = logger.reload(config(&base)).await.unwrap();
    assert!(unchanged.is_noop());

    h.write_overrides(r#"{"b": {"level": "warn"}}"#);
    let report = logger.reload_current().await.unwrap();
    assert_eq!(report.replaced, vec!["b".to_string()]);
    assert_eq!(report.unchanged, vec!["a".to_string(), "c".to_string()]);

    for name in ["a", "c"] {
        assert_eq!(h.journal.constructed(name), 1);
        assert_eq!(h.journal.closed(name), 0);
    }
    assert_eq!(h.journal.constructed("b"), 2);
    assert_eq!(h.journal.closed("b"), 1);
}

#[tokio::test]
async fn test_reload_never_changes_membership() {
    let h = Harness::new(&["a", "b"]);
    let logger = h
        .build(h.settings("TEE_IT_UNSET_8"), &[("tee-drivers", "a")])
        .await
        .unwrap();

    logger
        .reload(config(&[("tee-drivers", "a,b"), ("b:level", "info")]))
        .await
        .unwrap();
    assert_eq!(logger.sink_names().await, vec!["a".to_string()]);
    assert_eq!(h.journal.constructed("b"), 0);
}

#[tokio::test]
async fn test_fail_fast_policy_keeps_previous_configuration() {
    let h = Harness::new(&["a", "b"]);
    let settings = TeeConfig {
        reload_policy: ReloadPolicy::FailFast,
        ..h.settings("TEE_IT_UNSET_9")
    };
    let logger = h.build(settings, &[("tee-drivers", "a,b")]).await.unwrap();

    h.write_overrides(r#"{"a": {"fail-construct": "true"}, "b": {"level": "debug"}}"#);
    let err = logger.reload_current().await.unwrap_err();
    assert!(matches!(err, TeeError::ReloadFailed { .. }));
    assert!(logger.sink_config("b").await.unwrap().is_empty());

    // 修复覆盖文件后再次重载
    h.write_overrides(r#"{"b": {"level": "debug"}}"#);
    let report = logger.reload_current().await.unwrap();
    assert_eq!(report.replaced, vec!["b".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_log_and_reload() {
    let h = Harness::new(&["a", "b"]);
    let logger = Arc::new(
        h.build(h.settings("TEE_IT_UNSET_10"), &[("tee-drivers", "a,b")])
            .await
            .unwrap(),
    );

    let writer = {
        let logger = logger.clone();
        tokio::spawn(async move {
            for i in 0..200 {
                logger
                    .log(LogRecord::new("stdout", format!("line {}", i)))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    for round in 0..10 {
        let level = format!("v{}", round);
        logger
            .reload(config(&[("tee-drivers", "a,b"), ("a:level", level.as_str())]))
            .await
            .unwrap();
    }
    writer.await.unwrap();

    // a 被替换过多次，但每条记录恰好被某一个 a 实例收到
    assert_eq!(h.journal.lines("a").len(), 200);
    assert_eq!(h.journal.lines("b").len(), 200);
    assert_eq!(h.journal.constructed("a"), 11);
    assert_eq!(h.journal.open_instances("a").len(), 1);
    assert_eq!(logger.generations().await[0], ("a".to_string(), 10));
}

#[tokio::test]
async fn test_json_file_sink_end_to_end() {
    let h = Harness::new(&[]);
    let path = h.dir.path().join("container.log");
    let path_str = path.to_string_lossy().into_owned();
    let logger = h
        .build(
            h.settings("TEE_IT_UNSET_11"),
            &[
                ("tee-drivers", "memory,json-file"),
                ("json-file:path", path_str.as_str()),
            ],
        )
        .await
        .unwrap();

    for i in 0..5 {
        logger
            .log(LogRecord::new("stderr", format!("entry {}", i)))
            .await
            .unwrap();
    }

    // memory 未声明 readable，读取落到 json-file
    let records = logger
        .read_logs(ReadConfig::tail(2))
        .await
        .collect_records()
        .await
        .unwrap();
    let lines: Vec<String> = records.iter().map(|r| r.line_lossy().into_owned()).collect();
    assert_eq!(lines, vec!["entry 3".to_string(), "entry 4".to_string()]);

    logger.close().await.unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 5);
}

#[derive(Debug)]
struct StuckSink;

#[async_trait]
impl Sink for StuckSink {
    async fn log(&self, _record: LogRecord) -> SinkResult<()> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "stuck"
    }
}

#[tokio::test]
async fn test_sink_timeout_bounds_hung_sink() {
    let h = Harness::new(&["a"]);
    h.registry
        .register_fn("stuck", |_info| Ok(Box::new(StuckSink) as Box<dyn Sink>))
        .unwrap();
    let settings = TeeConfig {
        sink_timeout_ms: Some(50),
        ..h.settings("TEE_IT_UNSET_12")
    };
    let logger = h.build(settings, &[("tee-drivers", "stuck,a")]).await.unwrap();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        logger.log(LogRecord::new("stdout", "x")),
    )
    .await
    .unwrap()
    .unwrap_err();

    let composite = err.composite().unwrap();
    assert!(matches!(
        &composite.causes()[0],
        TeeError::SinkFailed { source: SinkError::Timeout(_), .. }
    ));
    assert_eq!(h.journal.lines("a"), vec!["x".to_string()]);
}
