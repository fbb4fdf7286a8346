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
//! Wire-shaped plan model handed to the coordinator by the FE.
//!
//! The coordinator never evaluates a plan; it only needs enough structure to
//! place fragments and route data: node types and child counts (flattened in
//! pre-order, first child first), output sinks, partitioning, and scan
//! ranges. Everything here is serde-shaped so the RPC layer can move it
//! without re-encoding.

pub mod inspector;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::ids::PlanNodeId;
use crate::common::types::{NetworkAddress, UniqueId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum PlanNodeType {
    OlapScanNode,
    FileScanNode,
    ExchangeNode,
    AggregationNode,
    HashJoinNode,
    SortNode,
    ProjectNode,
    UnionNode,
}

impl PlanNodeType {
    pub fn is_scan(self) -> bool {
        matches!(self, PlanNodeType::OlapScanNode | PlanNodeType::FileScanNode)
    }
}

/// Node types that read storage directly.
pub const SCAN_NODE_TYPES: &[PlanNodeType] =
    &[PlanNodeType::OlapScanNode, PlanNodeType::FileScanNode];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanNode {
    pub node_id: PlanNodeId,
    pub node_type: PlanNodeType,
    pub num_children: i32,
    /// Row limit, -1 when unlimited.
    pub limit: i64,
}

/// Flattened plan tree in pre-order, first child first. A node's first child
/// is the node immediately after it.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Plan {
    pub nodes: Vec<PlanNode>,
}

impl Plan {
    /// All scan node ids of this plan, in pre-order.
    pub fn scan_node_ids(&self) -> Vec<PlanNodeId> {
        self.nodes
            .iter()
            .filter(|n| n.node_type.is_scan())
            .map(|n| n.node_id)
            .collect()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DataPartition {
    Unpartitioned,
    Random,
    HashPartitioned,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DataSink {
    /// Rows go back to the client through the coordinator.
    ResultSink,
    /// Rows stream to the exchange node `dest_node_id` of the consuming
    /// fragment.
    DataStreamSink { dest_node_id: PlanNodeId },
    /// Rows are written to a table; `overwrite` replaces pre-existing files
    /// during finalization.
    TableSink { overwrite: bool },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanFragment {
    pub plan: Plan,
    pub partition: DataPartition,
    pub output_sink: Option<DataSink>,
}

/// One contiguous unit of storage processed by a scan node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRange {
    pub path: String,
    pub offset: i64,
    pub length: i64,
}

/// A scan range plus the hosts that have the data locally, in the order the
/// storage layer reported them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanRangeLocations {
    pub scan_range: ScanRange,
    pub locations: Vec<NetworkAddress>,
}

/// Scan ranges of one fragment instance, keyed by scan node.
pub type PerNodeScanRanges = HashMap<PlanNodeId, Vec<ScanRange>>;

/// One receiver of a fragment's data stream output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanFragmentDestination {
    pub fragment_instance_id: UniqueId,
    pub server: NetworkAddress,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TupleDescriptor {
    pub id: i32,
    pub byte_size: i32,
}

/// Descriptor table shared by every fragment of the query. The coordinator
/// forwards it untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DescriptorTable {
    pub tuple_descriptors: Vec<TupleDescriptor>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryGlobals {
    pub now_string: String,
    pub time_zone: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryOptions {
    pub batch_size: i32,
    pub max_errors: i32,
    pub enable_profile: bool,
    pub query_timeout_s: i32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            batch_size: 4096,
            max_errors: 100,
            enable_profile: true,
            query_timeout_s: 300,
        }
    }
}

/// Post-query side-effect description for INSERTs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FinalizeParams {
    pub table_db: String,
    pub table_name: String,
    /// Base directory the partition keys of the catalog update live under.
    pub base_dir: String,
    pub is_overwrite: bool,
}

/// Everything the FE hands over for one query. Immutable once `exec` begins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryExecRequest {
    /// Fragment 0 is the root; when it is unpartitioned it runs in-process
    /// as the coordinator fragment.
    pub fragments: Vec<PlanFragment>,
    /// `dest_fragment_idx[i - 1]` is the fragment that consumes fragment
    /// `i`'s output. Fragment 0 sends to no one.
    pub dest_fragment_idx: Vec<usize>,
    pub desc_tbl: DescriptorTable,
    pub query_globals: QueryGlobals,
    pub finalize_params: Option<FinalizeParams>,
}

impl QueryExecRequest {
    /// True when the root fragment runs inside the coordinator process and
    /// feeds rows to the client.
    pub fn has_coordinator_fragment(&self) -> bool {
        self.fragments
            .first()
            .map(|f| f.partition == DataPartition::Unpartitioned)
            .unwrap_or(false)
    }
}
