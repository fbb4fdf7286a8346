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
//! Outbound RPC surface towards backends, plus the wire shapes the two
//! calls carry. The shapes are contractual with the worker side and are
//! serde-shaped so a transport can move them without re-encoding; the
//! transport itself stays behind the `BackendClient` trait.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::common::ids::PlanNodeId;
use crate::common::status::Status;
use crate::common::types::{NetworkAddress, UniqueId};
use crate::plan::{
    DescriptorTable, PerNodeScanRanges, PlanFragment, PlanFragmentDestination, QueryGlobals,
    QueryOptions,
};
use crate::runtime::profile::ProfileTree;

/// Per-instance execution parameters inside an `ExecPlanFragmentParams`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanFragmentExecParams {
    pub query_id: UniqueId,
    pub fragment_instance_id: UniqueId,
    /// Global instance number; backends echo it in their reports.
    pub backend_num: i32,
    pub per_node_scan_ranges: PerNodeScanRanges,
    pub destinations: Vec<PlanFragmentDestination>,
    /// Sender count per exchange node of this fragment; receivers use it
    /// for stream termination.
    pub per_exch_num_senders: HashMap<PlanNodeId, i32>,
    /// Where `ReportExecStatus` callbacks go.
    pub coord: NetworkAddress,
}

/// Payload of one `ExecPlanFragment` RPC.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecPlanFragmentParams {
    pub fragment: PlanFragment,
    pub desc_tbl: DescriptorTable,
    pub params: PlanFragmentExecParams,
    pub query_globals: QueryGlobals,
    pub query_options: QueryOptions,
}

/// One file produced by an INSERT, to be moved into place at finalization.
/// An empty `dest` deletes `src` instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileMove {
    pub src: String,
    pub dest: String,
}

/// INSERT side effects accumulated by one fragment instance.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InsertExecStatus {
    /// Rows written per partition key; the empty key is the whole table.
    pub partition_row_counts: BTreeMap<String, i64>,
    pub files_to_move: Vec<FileMove>,
}

/// Payload of one `ReportExecStatus` callback from a backend. The caller
/// serializes reports per instance; distinct instances may report
/// concurrently.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportExecStatusParams {
    pub query_id: UniqueId,
    pub backend_num: i32,
    pub fragment_instance_id: UniqueId,
    pub status: Status,
    pub done: bool,
    /// Cumulative profile snapshot; replaces the previous one.
    pub profile: Option<ProfileTree>,
    /// New error-log lines since the last report.
    pub error_log: Vec<String>,
    pub insert_exec_status: Option<InsertExecStatus>,
}

/// Client side of the backend internal service. `Err` is a transport
/// failure (connect/send); `Ok` carries the remote's own status.
pub trait BackendClient: Send + Sync {
    fn exec_plan_fragment(
        &self,
        addr: &NetworkAddress,
        params: &ExecPlanFragmentParams,
    ) -> Result<Status, String>;

    fn cancel_plan_fragment(
        &self,
        addr: &NetworkAddress,
        fragment_instance_id: UniqueId,
    ) -> Result<Status, String>;
}
