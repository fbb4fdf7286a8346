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
use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio::runtime::Runtime;

use crate::common::config::io_runtime_worker_threads;
use crate::novacoord_logging::info;

const IO_RUNTIME_THREAD_NAME: &str = "novacoord-io-runtime";
static IO_RUNTIME: OnceLock<Result<Arc<Runtime>, String>> = OnceLock::new();

/// Shared runtime used to drive the filesystem operator from synchronous
/// coordinator code.
pub fn io_runtime() -> Result<&'static Arc<Runtime>, String> {
    match IO_RUNTIME.get_or_init(|| {
        let worker_threads = io_runtime_worker_threads().max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(worker_threads)
            .thread_name(IO_RUNTIME_THREAD_NAME)
            .build()
            .map_err(|e| format!("init io tokio runtime failed: {e}"))?;
        info!(
            worker_threads,
            thread_name = IO_RUNTIME_THREAD_NAME,
            "io runtime initialized"
        );
        Ok(Arc::new(runtime))
    }) {
        Ok(runtime) => Ok(runtime),
        Err(err) => Err(err.clone()),
    }
}

pub fn io_block_on<F>(future: F) -> Result<F::Output, String>
where
    F: Future,
{
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err("io_block_on cannot run inside an async runtime context".to_string());
    }
    let runtime = io_runtime()?;
    Ok(runtime.block_on(future))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn io_runtime_is_singleton_across_threads() {
        let expected_ptr = Arc::as_ptr(io_runtime().expect("get io runtime")) as usize;
        let handles = (0..8)
            .map(|_| {
                thread::spawn(move || {
                    let ptr = Arc::as_ptr(io_runtime().expect("get io runtime")) as usize;
                    assert_eq!(ptr, expected_ptr);
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join");
        }
    }

    #[test]
    fn io_block_on_runs_outside_runtime() {
        let value = io_block_on(async { 7_i32 }).expect("run on io runtime");
        assert_eq!(value, 7);
    }
}
