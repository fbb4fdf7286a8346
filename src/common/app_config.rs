// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<NovaCoordConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static NovaCoordConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = NovaCoordConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn init_from_env_or_default() -> Result<&'static NovaCoordConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = config_path_from_env_or_default()?;
    let cfg = NovaCoordConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    Ok(CONFIG.get().expect("CONFIG set"))
}

pub fn config() -> Result<&'static NovaCoordConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<PathBuf> {
    if let Ok(p) = std::env::var("NOVACOORD_CONFIG") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let candidates = [PathBuf::from("novacoord.toml")];
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }

    Err(anyhow!(
        "missing config file: set $NOVACOORD_CONFIG or create ./novacoord.toml"
    ))
}

#[derive(Clone, Deserialize)]
pub struct NovaCoordConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novacoord=debug,opendal=off"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub fs: FsConfig,
}

impl NovaCoordConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: NovaCoordConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        Ok(cfg)
    }
}

impl Default for NovaCoordConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            coordinator: CoordinatorConfig::default(),
            fs: FsConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Log scan progress whenever completion advances by this many percent.
    #[serde(default = "default_progress_log_interval_percent")]
    pub progress_log_interval_percent: i64,

    /// Dump launched fragment parameters as JSON at debug level.
    #[serde(default)]
    pub debug_exec_params_json: bool,

    /// Worker threads for the coordinator's blocking-IO tokio runtime.
    #[serde(default = "default_io_runtime_worker_threads")]
    pub io_runtime_worker_threads: usize,
}

fn default_progress_log_interval_percent() -> i64 {
    5
}

fn default_io_runtime_worker_threads() -> usize {
    2
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            progress_log_interval_percent: default_progress_log_interval_percent(),
            debug_exec_params_json: false,
            io_runtime_worker_threads: default_io_runtime_worker_threads(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct FsConfig {
    /// Root the local filesystem operator is anchored at. INSERT finalization
    /// paths are resolved relative to it.
    #[serde(default = "default_fs_root")]
    pub root: String,
}

fn default_fs_root() -> String {
    "/".to_string()
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            root: default_fs_root(),
        }
    }
}
