//! 配置解析
//!
//! 从分层的配置来源推导出启用的 sink 列表以及每个 sink 的私有配置：
//!
//! 1. 基础配置中的 `tee-drivers`，缺失时回退到环境变量；
//! 2. 基础配置中形如 `"<sink>:<key>"` 的命名空间键；
//! 3. 固定路径上的覆盖文件，同名键以文件为准。
//!
//! 覆盖文件在每次构造和每次重载时都会重新读取。

use crate::config::TeeConfig;
use crate::error::{Result, TeeError};
use crate::logging::plugin_span;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, Span};

/// 基础配置中列出启用 sink 的键
pub const DRIVERS_KEY: &str = "tee-drivers";
/// 默认回退环境变量名
pub const DEFAULT_DRIVERS_ENV: &str = "TEE-DRIVERS";
/// 默认覆盖文件路径
pub const DEFAULT_OVERRIDE_FILE: &str = "/etc/docker/tee.json";

/// 随日志流传入的基础配置
pub type ConfigMap = BTreeMap<String, String>;

/// 某个 sink 解析后的配置快照，重载时用于逐键比较
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedConfig(BTreeMap<String, String>);

impl ResolvedConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }

    /// 与另一份快照不同的键：新增、删除或取值变化，按键排序
    pub fn changed_keys(&self, other: &ResolvedConfig) -> Vec<String> {
        let mut keys: Vec<String> = self
            .0
            .iter()
            .filter(|(k, v)| other.0.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(
            other
                .0
                .keys()
                .filter(|k| !self.0.contains_key(*k))
                .cloned(),
        );
        keys.sort();
        keys
    }
}

impl From<BTreeMap<String, String>> for ResolvedConfig {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, String)> for ResolvedConfig {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// 覆盖文件内容：sink 名 -> 键值
#[derive(Deserialize, Debug, Default)]
#[serde(transparent)]
struct OverrideFile(HashMap<String, BTreeMap<String, String>>);

/// 配置解析器
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    override_file: PathBuf,
    drivers_env_var: String,
    span: Span,
}

impl ConfigResolver {
    pub fn new(override_file: impl Into<PathBuf>, drivers_env_var: impl Into<String>) -> Self {
        Self {
            override_file: override_file.into(),
            drivers_env_var: drivers_env_var.into(),
            span: plugin_span(),
        }
    }

    pub fn from_config(config: &TeeConfig) -> Self {
        Self::new(config.override_file.clone(), config.drivers_env_var.clone())
    }

    /// 指定诊断日志的父 span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn override_file(&self) -> &Path {
        &self.override_file
    }

    pub fn drivers_env_var(&self) -> &str {
        &self.drivers_env_var
    }

    /// 解析启用的 sink 名列表
    ///
    /// 名字去掉首尾空白，空项丢弃，重复项只保留第一次出现的位置。
    pub fn resolve_sink_names(&self, base: &ConfigMap) -> Result<Vec<String>> {
        let raw = match base.get(DRIVERS_KEY) {
            Some(list) => list.clone(),
            None => match std::env::var(&self.drivers_env_var) {
                Ok(list) => {
                    debug!(
                        parent: &self.span,
                        "`{}` not set, using ${}", DRIVERS_KEY, self.drivers_env_var
                    );
                    list
                }
                Err(_) => return Err(TeeError::NoSinksConfigured),
            },
        };

        let names = parse_driver_list(&raw);
        if names.is_empty() {
            return Err(TeeError::NoSinksConfigured);
        }
        Ok(names)
    }

    /// 推导单个 sink 的配置
    pub fn derive_sink_config(&self, sink_name: &str, base: &ConfigMap) -> Result<ResolvedConfig> {
        let mut config: BTreeMap<String, String> = base
            .iter()
            .filter_map(|(key, value)| match key.split_once(':') {
                Some((prefix, rest)) if prefix == sink_name => {
                    Some((rest.to_string(), value.clone()))
                }
                _ => None,
            })
            .collect();

        if let Some(mut overrides) = self.load_overrides()? {
            if let Some(file_values) = overrides.0.remove(sink_name) {
                debug!(
                    parent: &self.span,
                    sink = sink_name,
                    keys = file_values.len(),
                    "applying overrides from {}",
                    self.override_file.display()
                );
                config.extend(file_values);
            }
        }

        Ok(ResolvedConfig(config))
    }

    /// 读取覆盖文件；文件不存在或路径是目录时返回 `None`
    fn load_overrides(&self) -> Result<Option<OverrideFile>> {
        let path = &self.override_file;
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                if path.is_dir() {
                    return Ok(None);
                }
                return Err(TeeError::config_load(path, e.to_string()));
            }
        };

        let parsed = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str::<OverrideFile>(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str::<OverrideFile>(&content).map_err(|e| e.to_string())
        };

        parsed
            .map(Some)
            .map_err(|message| TeeError::config_load(path, message))
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(DEFAULT_OVERRIDE_FILE, DEFAULT_DRIVERS_ENV)
    }
}

fn parse_driver_list(raw: &str) -> Vec<String> {
    normalize_names(raw.split(','))
}

/// 去空白、去空项、去重（保留第一次出现）
pub(crate) fn normalize_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut normalized: Vec<String> = Vec::new();
    for name in names {
        let name = name.as_ref().trim();
        if !name.is_empty() && !normalized.iter().any(|existing| existing == name) {
            normalized.push(name.to_string());
        }
    }
    normalized
}
