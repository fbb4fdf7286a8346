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
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::common::ids::PlanNodeId;
use crate::common::status::Status;
use crate::common::types::{NetworkAddress, UniqueId};
use crate::runtime::profile::{ProfileTree, RuntimeProfile};

/// Counter name a scan node reports its finished range count under.
pub const SCAN_RANGES_COMPLETE_COUNTER: &str = "ScanRangesComplete";
/// Counter name a scan node reports its read throughput under.
pub const SCAN_THROUGHPUT_COUNTER: &str = "BytesReadThroughput";

/// State of one remotely executing fragment instance. Identity fields are
/// immutable; everything a report can touch sits behind the per-instance
/// mutex. Lock order: the coordinator's global lock, if held, is acquired
/// before this one, never after.
pub struct BackendExecState {
    pub backend_num: usize,
    pub fragment_idx: usize,
    /// Index within the fragment's instance list.
    pub instance_idx: usize,
    pub fragment_instance_id: UniqueId,
    pub address: NetworkAddress,
    /// Scan bytes this instance was assigned at scheduling time.
    pub total_split_bytes: i64,
    /// Live instance profile, attached under the fragment's root profile.
    pub profile: RuntimeProfile,
    start: Instant,
    state: Mutex<InstanceState>,
}

pub struct InstanceState {
    /// Set once the launch RPC has been issued.
    pub initiated: bool,
    pub done: bool,
    pub status: Status,
    pub error_log: Vec<String>,
    /// Last reported finished-range count per scan node.
    pub scan_ranges_complete: HashMap<PlanNodeId, i64>,
    /// Last reported throughput per scan node.
    pub scan_throughput: HashMap<PlanNodeId, i64>,
    /// Wall time from launch to the terminal report, ns.
    pub completion_time_ns: i64,
}

impl Default for InstanceState {
    fn default() -> Self {
        Self {
            initiated: false,
            done: false,
            status: Status::ok(),
            error_log: Vec::new(),
            scan_ranges_complete: HashMap::new(),
            scan_throughput: HashMap::new(),
            completion_time_ns: 0,
        }
    }
}

impl BackendExecState {
    pub fn new(
        backend_num: usize,
        fragment_idx: usize,
        instance_idx: usize,
        fragment_instance_id: UniqueId,
        address: NetworkAddress,
        total_split_bytes: i64,
        profile: RuntimeProfile,
    ) -> Self {
        Self {
            backend_num,
            fragment_idx,
            instance_idx,
            fragment_instance_id,
            address,
            total_split_bytes,
            profile,
            start: Instant::now(),
            state: Mutex::new(InstanceState::default()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn elapsed_ns(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    /// Completion-time-derived scan rate in bytes per second, 0 before the
    /// instance finishes.
    pub fn exec_rate(&self, completion_time_ns: i64) -> i64 {
        if completion_time_ns <= 0 {
            return 0;
        }
        (self.total_split_bytes as f64 / (completion_time_ns as f64 / 1e9)) as i64
    }
}

/// Pull per-scan-node counters out of a reported profile snapshot. Scan
/// nodes are recognized by a non-negative plan node id in the profile
/// node's metadata.
pub fn collect_scan_node_counters(
    tree: &ProfileTree,
) -> (HashMap<PlanNodeId, i64>, HashMap<PlanNodeId, i64>) {
    let mut ranges_complete = HashMap::new();
    let mut throughput = HashMap::new();
    for node in &tree.nodes {
        if node.metadata < 0 {
            continue;
        }
        let node_id = PlanNodeId::new(node.metadata as i32);
        for counter in &node.counters {
            match counter.name.as_str() {
                SCAN_RANGES_COMPLETE_COUNTER => {
                    *ranges_complete.entry(node_id).or_insert(0) += counter.value;
                }
                SCAN_THROUGHPUT_COUNTER => {
                    *throughput.entry(node_id).or_insert(0) += counter.value;
                }
                _ => {}
            }
        }
    }
    (ranges_complete, throughput)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::profile::{CounterUnit, RuntimeProfile};

    #[test]
    fn scan_counters_are_collected_by_metadata_node_id() {
        let profile = RuntimeProfile::new("inst");
        let scan = profile.child("OLAP_SCAN (plan_node_id=3)");
        scan.set_metadata(3);
        scan.counter_set(SCAN_RANGES_COMPLETE_COUNTER, CounterUnit::Unit, 7);
        scan.counter_set(SCAN_THROUGHPUT_COUNTER, CounterUnit::BytesPerSecond, 1024);
        let other = profile.child("EXCHANGE (plan_node_id=4)");
        other.set_metadata(4);

        let (ranges, throughput) = collect_scan_node_counters(&profile.to_tree());
        assert_eq!(ranges.get(&PlanNodeId::new(3)), Some(&7));
        assert_eq!(throughput.get(&PlanNodeId::new(3)), Some(&1024));
        assert!(!ranges.contains_key(&PlanNodeId::new(4)));
    }

    #[test]
    fn exec_rate_is_bytes_per_second() {
        let state = BackendExecState::new(
            0,
            1,
            0,
            UniqueId::new(1, 2),
            NetworkAddress::new("be1", 9060),
            2048,
            RuntimeProfile::new("inst"),
        );
        // 2048 bytes in half a second -> 4096 B/s.
        assert_eq!(state.exec_rate(500_000_000), 4096);
        assert_eq!(state.exec_rate(0), 0);
    }
}
