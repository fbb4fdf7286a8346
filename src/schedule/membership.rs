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
use std::collections::{HashMap, HashSet};

use crate::common::ids::PlanNodeId;
use crate::common::status::{Status, StatusCode};
use crate::common::types::{NetworkAddress, UniqueId};
use crate::plan::ScanRangeLocations;

/// Cluster membership and data locality, as seen by the scheduler.
///
/// Kept to two methods so alternative deployments (shared-nothing local
/// tablets, lake tablets behind a shard registry) can plug in without the
/// coordinator caring which one it talks to.
pub trait ClusterMembership: Send + Sync {
    /// Ordered scan-range locations for one scan node of the query. The
    /// order is the storage layer's; the scheduler must not reorder it.
    fn scan_range_locations(
        &self,
        query_id: UniqueId,
        node_id: PlanNodeId,
    ) -> Result<Vec<ScanRangeLocations>, Status>;

    /// Choose the hosts a fragment runs on, given the union of data-local
    /// candidates of its scan nodes. An empty candidate list means the
    /// fragment has no locality preference.
    fn hosts_for_fragment(
        &self,
        candidates: &[NetworkAddress],
    ) -> Result<Vec<NetworkAddress>, Status>;
}

/// Fixed membership over a known backend list; locations are registered up
/// front. This is what a static `be_list`-style deployment uses, and what
/// tests script against.
#[derive(Default)]
pub struct StaticMembership {
    backends: Vec<NetworkAddress>,
    locations: HashMap<PlanNodeId, Vec<ScanRangeLocations>>,
}

impl StaticMembership {
    pub fn new(backends: Vec<NetworkAddress>) -> Self {
        Self {
            backends,
            locations: HashMap::new(),
        }
    }

    pub fn add_locations(&mut self, node_id: PlanNodeId, locations: Vec<ScanRangeLocations>) {
        self.locations.entry(node_id).or_default().extend(locations);
    }
}

impl ClusterMembership for StaticMembership {
    fn scan_range_locations(
        &self,
        _query_id: UniqueId,
        node_id: PlanNodeId,
    ) -> Result<Vec<ScanRangeLocations>, Status> {
        Ok(self.locations.get(&node_id).cloned().unwrap_or_default())
    }

    fn hosts_for_fragment(
        &self,
        candidates: &[NetworkAddress],
    ) -> Result<Vec<NetworkAddress>, Status> {
        if candidates.is_empty() {
            if self.backends.is_empty() {
                return Err(Status::new(
                    StatusCode::HostAssignmentFailed,
                    "no live backends",
                ));
            }
            return Ok(self.backends.clone());
        }
        // Keep every data-local host, first occurrence order.
        let mut seen = HashSet::new();
        let mut hosts = Vec::new();
        for addr in candidates {
            if seen.insert(addr.clone()) {
                hosts.push(addr.clone());
            }
        }
        Ok(hosts)
    }
}
