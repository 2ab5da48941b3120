//! 定义 tee_log fan-out 引擎自身的配置结构体。
//!
//! 这里的配置描述引擎如何运行（覆盖文件位置、重载策略、超时等），
//! 与随日志流一起传入、决定启用哪些 sink 的基础配置是两回事。

use crate::core::resolver::{DEFAULT_DRIVERS_ENV, DEFAULT_OVERRIDE_FILE};
use crate::core::record::DEFAULT_POOL_CAPACITY;
use crate::error::{Result, TeeError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// --- 辅助函数，用于提供配置项的默认值 ---
fn default_override_file() -> PathBuf {
    PathBuf::from(DEFAULT_OVERRIDE_FILE)
}
fn default_drivers_env_var() -> String {
    DEFAULT_DRIVERS_ENV.to_string()
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_record_pool_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

/// 重载过程中某个 sink 失败时的处理策略。
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPolicy {
    /// 遇到第一个失败立即返回，后面的 sink 保持旧配置。
    FailFast,
    /// 继续处理所有 sink，最后汇总错误。
    #[default]
    ContinueOnError,
}

/// tee_log 引擎的顶层配置结构体。
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TeeConfig {
    /// 按 sink 名覆盖配置的文件，每次构造和重载时重新读取
    #[serde(default = "default_override_file")]
    pub override_file: PathBuf,
    /// 基础配置中缺少 `tee-drivers` 时查询的环境变量
    #[serde(default = "default_drivers_env_var")]
    pub drivers_env_var: String,
    #[serde(default)]
    pub reload_policy: ReloadPolicy,
    /// 重载替换后是否关闭被替换的旧实例
    #[serde(default = "default_true")]
    pub close_replaced_sinks: bool,
    /// 单次 sink 调用（构造、写入、关闭）的超时；不设置则不限时
    pub sink_timeout_ms: Option<u64>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_record_pool_capacity")]
    pub record_pool_capacity: usize,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            override_file: default_override_file(),
            drivers_env_var: default_drivers_env_var(),
            reload_policy: ReloadPolicy::default(),
            close_replaced_sinks: default_true(),
            sink_timeout_ms: None,
            log_level: default_log_level(),
            record_pool_capacity: default_record_pool_capacity(),
        }
    }
}

impl TeeConfig {
    pub fn sink_timeout(&self) -> Option<Duration> {
        self.sink_timeout_ms.map(Duration::from_millis)
    }
}

/// 用于从 TOML 文件加载 `TeeConfig` 的辅助函数。
pub fn load_config_from_file(path: &Path) -> Result<TeeConfig> {
    if !path.exists() {
        return Err(TeeError::ConfigFileMissing(
            path.to_string_lossy().into_owned(),
        ));
    }

    let config_str = std::fs::read_to_string(path)?;
    load_config_from_str(&config_str)
}

/// 用于从 TOML 字符串加载 `TeeConfig` 的辅助函数。
pub fn load_config_from_str(config_str: &str) -> Result<TeeConfig> {
    let config: TeeConfig = toml::from_str(config_str)
        .map_err(|e| TeeError::ConfigError(format!("TOML解析失败: {}", e)))?;

    validate_config(&config)?;
    Ok(config)
}

/// 验证配置的有效性。
pub fn validate_config(config: &TeeConfig) -> Result<()> {
    match config.log_level.to_uppercase().as_str() {
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR" => {}
        _ => return Err(TeeError::InvalidLogLevel(config.log_level.clone())),
    }

    if config.override_file.as_os_str().is_empty() {
        return Err(TeeError::config("覆盖文件路径不能为空"));
    }

    if config.drivers_env_var.trim().is_empty() {
        return Err(TeeError::config("环境变量名不能为空"));
    }

    if config.sink_timeout_ms == Some(0) {
        return Err(TeeError::config("sink 调用超时必须大于0"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TeeConfig::default();
        assert_eq!(config.override_file, PathBuf::from("/etc/docker/tee.json"));
        assert_eq!(config.drivers_env_var, "TEE-DRIVERS");
        assert_eq!(config.reload_policy, ReloadPolicy::ContinueOnError);
        assert!(config.close_replaced_sinks);
        assert!(config.sink_timeout().is_none());
        assert_eq!(config.record_pool_capacity, 256);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_config_from_str_basic() {
        let toml_str = r#"
            override_file = "/srv/tee/overrides.json"
            reload_policy = "FailFast"
            close_replaced_sinks = false
            sink_timeout_ms = 2500
            log_level = "debug"
        "#;

        let config = load_config_from_str(toml_str).unwrap();
        assert_eq!(
            config.override_file,
            PathBuf::from("/srv/tee/overrides.json")
        );
        assert_eq!(config.reload_policy, ReloadPolicy::FailFast);
        assert!(!config.close_replaced_sinks);
        assert_eq!(config.sink_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.drivers_env_var, "TEE-DRIVERS");
    }

    #[test]
    fn test_load_config_rejects_unknown_fields() {
        let result = load_config_from_str("tee_drivers = \"a,b\"");
        assert!(matches!(result, Err(TeeError::ConfigError(_))));
    }

    #[test]
    fn test_load_config_from_str_invalid_toml() {
        let invalid_toml = r#"
            log_level = "INFO
        "#;

        if let Err(TeeError::ConfigError(msg)) = load_config_from_str(invalid_toml) {
            assert!(msg.contains("TOML解析失败"));
        } else {
            panic!("Expected ConfigError");
        }
    }

    #[test]
    fn test_validate_config_invalid_level() {
        let config = TeeConfig {
            log_level: "LOUD".to_string(),
            ..Default::default()
        };

        if let Err(TeeError::InvalidLogLevel(level)) = validate_config(&config) {
            assert_eq!(level, "LOUD");
        } else {
            panic!("Expected InvalidLogLevel error");
        }
    }

    #[test]
    fn test_validate_config_zero_timeout() {
        let config = TeeConfig {
            sink_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_config_empty_env_var() {
        let config = TeeConfig {
            drivers_env_var: "  ".to_string(),
            ..Default::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "drivers_env_var = \"MY_TEE_DRIVERS\"").unwrap();

        let config = load_config_from_file(file.path()).unwrap();
        assert_eq!(config.drivers_env_var, "MY_TEE_DRIVERS");

        let missing = load_config_from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(TeeError::ConfigFileMissing(_))));
    }
}
