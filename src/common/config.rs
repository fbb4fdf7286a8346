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
use crate::common::app_config::config as novacoord_app_config;

pub(crate) fn log_filter() -> String {
    let cfg = match novacoord_app_config() {
        Ok(cfg) => cfg,
        Err(_) => return "info".to_string(),
    };
    match cfg.log_filter.as_ref() {
        Some(filter) if !filter.trim().is_empty() => filter.clone(),
        _ => cfg.log_level.clone(),
    }
}

pub(crate) fn progress_log_interval_percent() -> i64 {
    novacoord_app_config()
        .ok()
        .map(|c| c.coordinator.progress_log_interval_percent)
        .unwrap_or(5)
        .max(1)
}

pub(crate) fn debug_exec_params_json() -> bool {
    novacoord_app_config()
        .ok()
        .map(|c| c.coordinator.debug_exec_params_json)
        .unwrap_or(false)
}

pub(crate) fn io_runtime_worker_threads() -> usize {
    novacoord_app_config()
        .ok()
        .map(|c| c.coordinator.io_runtime_worker_threads)
        .unwrap_or(2)
}

pub(crate) fn fs_root() -> String {
    novacoord_app_config()
        .ok()
        .map(|c| c.fs.root.clone())
        .unwrap_or_else(|| "/".to_string())
}
