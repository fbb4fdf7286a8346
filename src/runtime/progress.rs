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
use std::sync::atomic::{AtomicI64, Ordering};

use crate::novacoord_logging::info;

/// Monotonic completion tracker for a fixed amount of work, logging whenever
/// completion advances past the configured percentage step.
#[derive(Debug)]
pub struct ProgressUpdater {
    label: String,
    total: i64,
    update_period_percent: i64,
    num_complete: AtomicI64,
    last_output_percentage: AtomicI64,
}

impl ProgressUpdater {
    pub fn new(label: impl Into<String>, total: i64, update_period_percent: i64) -> Self {
        Self {
            label: label.into(),
            total,
            update_period_percent: update_period_percent.max(1),
            num_complete: AtomicI64::new(0),
            last_output_percentage: AtomicI64::new(0),
        }
    }

    /// Record `delta` more units complete. Negative deltas are ignored.
    pub fn update(&self, delta: i64) {
        if delta <= 0 {
            return;
        }
        let now_complete = self.num_complete.fetch_add(delta, Ordering::Relaxed) + delta;
        if self.total <= 0 {
            return;
        }
        let new_percentage = now_complete * 100 / self.total;
        let old_percentage = self.last_output_percentage.load(Ordering::Relaxed);
        if new_percentage - old_percentage >= self.update_period_percent
            && self
                .last_output_percentage
                .compare_exchange(
                    old_percentage,
                    new_percentage,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            info!(
                "{}: {}% complete ({} out of {})",
                self.label, new_percentage, now_complete, self.total
            );
        }
    }

    pub fn num_complete(&self) -> i64 {
        self.num_complete.load(Ordering::Relaxed).min(self.total.max(0))
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn done(&self) -> bool {
        self.num_complete.load(Ordering::Relaxed) >= self.total
    }
}
