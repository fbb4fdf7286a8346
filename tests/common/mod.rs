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
//! Shared fixtures: a recording in-memory backend transport, a scripted
//! local executor, and plan builders for the query shapes the scenarios
//! exercise.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arrow::array::Int32Array;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use novacoord::common::ids::PlanNodeId;
use novacoord::plan::{
    DataPartition, DataSink, DescriptorTable, FinalizeParams, Plan, PlanFragment, PlanNode,
    PlanNodeType, QueryExecRequest, QueryGlobals, ScanRange, ScanRangeLocations,
};
use novacoord::runtime::executor::{FragmentExecutor, LocalExecEngine};
use novacoord::runtime::profile::{CounterUnit, ProfileTree, RuntimeProfile};
use novacoord::service::backend_client::{
    BackendClient, ExecPlanFragmentParams, InsertExecStatus, ReportExecStatusParams,
};
use novacoord::{ExecEnv, NetworkAddress, StaticMembership, Status, UniqueId};

pub fn addr(name: &str) -> NetworkAddress {
    NetworkAddress::new(name, 9060)
}

pub fn coord_addr() -> NetworkAddress {
    addr("coord")
}

/// In-memory transport: records every call, optionally failing the first
/// launch on a chosen host.
#[derive(Default)]
pub struct RecordingBackendClient {
    pub exec_calls: Mutex<Vec<(NetworkAddress, ExecPlanFragmentParams)>>,
    pub cancel_calls: Mutex<Vec<(NetworkAddress, UniqueId)>>,
    fail_first_exec_on: Mutex<Option<(String, Status)>>,
}

impl RecordingBackendClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The first `ExecPlanFragment` sent to `hostname` returns `status`.
    pub fn fail_first_exec_on(&self, hostname: &str, status: Status) {
        let mut guard = self.fail_first_exec_on.lock().expect("fail lock");
        *guard = Some((hostname.to_string(), status));
    }

    pub fn exec_params(&self) -> Vec<ExecPlanFragmentParams> {
        self.exec_calls
            .lock()
            .expect("exec calls lock")
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn cancelled_instances(&self) -> Vec<UniqueId> {
        self.cancel_calls
            .lock()
            .expect("cancel calls lock")
            .iter()
            .map(|(_, id)| *id)
            .collect()
    }
}

impl BackendClient for RecordingBackendClient {
    fn exec_plan_fragment(
        &self,
        addr: &NetworkAddress,
        params: &ExecPlanFragmentParams,
    ) -> Result<Status, String> {
        self.exec_calls
            .lock()
            .expect("exec calls lock")
            .push((addr.clone(), params.clone()));
        let mut guard = self.fail_first_exec_on.lock().expect("fail lock");
        if let Some((hostname, _)) = guard.as_ref() {
            if *hostname == addr.hostname {
                let (_, status) = guard.take().expect("failure just checked");
                return Ok(status);
            }
        }
        Ok(Status::ok())
    }

    fn cancel_plan_fragment(
        &self,
        addr: &NetworkAddress,
        fragment_instance_id: UniqueId,
    ) -> Result<Status, String> {
        self.cancel_calls
            .lock()
            .expect("cancel calls lock")
            .push((addr.clone(), fragment_instance_id));
        Ok(Status::ok())
    }
}

/// Coordinator-fragment executor fed from a fixed batch list. `cancel` wins
/// over remaining batches, like a real pipeline being torn down.
pub struct ScriptedExecutor {
    batches: Mutex<VecDeque<RecordBatch>>,
    cancelled: AtomicBool,
    fail_open: Mutex<Option<Status>>,
    insert_status: Mutex<Option<InsertExecStatus>>,
    profile: RuntimeProfile,
}

impl ScriptedExecutor {
    pub fn with_batches(num_batches: usize) -> Arc<Self> {
        let batches = (0..num_batches).map(|i| test_batch(i as i32)).collect();
        Arc::new(Self {
            batches: Mutex::new(batches),
            cancelled: AtomicBool::new(false),
            fail_open: Mutex::new(None),
            insert_status: Mutex::new(None),
            profile: RuntimeProfile::new("Coordinator Fragment Instance"),
        })
    }

    pub fn fail_open_with(&self, status: Status) {
        *self.fail_open.lock().expect("fail_open lock") = Some(status);
    }

    pub fn set_insert_status(&self, status: InsertExecStatus) {
        *self.insert_status.lock().expect("insert status lock") = Some(status);
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl FragmentExecutor for ScriptedExecutor {
    fn prepare(&self) -> Result<(), Status> {
        Ok(())
    }

    fn open(&self) -> Result<(), Status> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Status::cancelled("Cancelled"));
        }
        if let Some(status) = self.fail_open.lock().expect("fail_open lock").take() {
            return Err(status);
        }
        Ok(())
    }

    fn get_next(&self) -> Result<Option<RecordBatch>, Status> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Status::cancelled("Cancelled"));
        }
        Ok(self.batches.lock().expect("batches lock").pop_front())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn profile(&self) -> RuntimeProfile {
        self.profile.clone()
    }

    fn insert_exec_status(&self) -> Option<InsertExecStatus> {
        self.insert_status.lock().expect("insert status lock").clone()
    }
}

/// Engine handing out one pre-scripted executor.
pub struct ScriptedEngine {
    executor: Arc<ScriptedExecutor>,
}

impl ScriptedEngine {
    pub fn new(executor: Arc<ScriptedExecutor>) -> Arc<Self> {
        Arc::new(Self { executor })
    }
}

impl LocalExecEngine for ScriptedEngine {
    fn create_executor(
        &self,
        _params: &ExecPlanFragmentParams,
    ) -> Result<Arc<dyn FragmentExecutor>, Status> {
        Ok(Arc::clone(&self.executor) as Arc<dyn FragmentExecutor>)
    }
}

pub fn test_batch(tag: i32) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("c0", DataType::Int32, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![tag]))])
        .expect("build record batch")
}

pub fn make_env(
    client: Arc<RecordingBackendClient>,
    membership: StaticMembership,
    executor: Arc<ScriptedExecutor>,
) -> Arc<ExecEnv> {
    Arc::new(ExecEnv::new(
        client,
        Arc::new(membership),
        ScriptedEngine::new(executor),
        coord_addr(),
    ))
}

/// F0 (coordinator: exchange 10, result sink)
///   <- F1 (agg 5 over exchange 6, hash partitioned)
///   <- F2 (scan 0, random), with `num_ranges` ranges spread over `hosts`.
pub fn three_fragment_select(
    hosts: &[&str],
    num_ranges: usize,
) -> (QueryExecRequest, StaticMembership) {
    let node = |id: i32, node_type: PlanNodeType, num_children: i32| PlanNode {
        node_id: PlanNodeId::new(id),
        node_type,
        num_children,
        limit: -1,
    };
    let request = QueryExecRequest {
        fragments: vec![
            PlanFragment {
                plan: Plan {
                    nodes: vec![node(10, PlanNodeType::ExchangeNode, 0)],
                },
                partition: DataPartition::Unpartitioned,
                output_sink: Some(DataSink::ResultSink),
            },
            PlanFragment {
                plan: Plan {
                    nodes: vec![
                        node(5, PlanNodeType::AggregationNode, 1),
                        node(6, PlanNodeType::ExchangeNode, 0),
                    ],
                },
                partition: DataPartition::HashPartitioned,
                output_sink: Some(DataSink::DataStreamSink {
                    dest_node_id: PlanNodeId::new(10),
                }),
            },
            PlanFragment {
                plan: Plan {
                    nodes: vec![node(0, PlanNodeType::OlapScanNode, 0)],
                },
                partition: DataPartition::Random,
                output_sink: Some(DataSink::DataStreamSink {
                    dest_node_id: PlanNodeId::new(6),
                }),
            },
        ],
        dest_fragment_idx: vec![0, 1],
        desc_tbl: DescriptorTable::default(),
        query_globals: QueryGlobals::default(),
        finalize_params: None,
    };

    let mut membership = StaticMembership::new(hosts.iter().map(|h| addr(h)).collect());
    membership.add_locations(PlanNodeId::new(0), scan_locations(hosts, num_ranges));
    (request, membership)
}

/// Single-fragment distributed INSERT: scan 0 feeding a table sink, no
/// coordinator fragment.
pub fn distributed_insert(
    hosts: &[&str],
    num_ranges: usize,
    base_dir: &str,
) -> (QueryExecRequest, StaticMembership) {
    let request = QueryExecRequest {
        fragments: vec![PlanFragment {
            plan: Plan {
                nodes: vec![PlanNode {
                    node_id: PlanNodeId::new(0),
                    node_type: PlanNodeType::OlapScanNode,
                    num_children: 0,
                    limit: -1,
                }],
            },
            partition: DataPartition::Random,
            output_sink: Some(DataSink::TableSink { overwrite: false }),
        }],
        dest_fragment_idx: vec![],
        desc_tbl: DescriptorTable::default(),
        query_globals: QueryGlobals::default(),
        finalize_params: Some(FinalizeParams {
            table_db: "ssb".to_string(),
            table_name: "lineorder".to_string(),
            base_dir: base_dir.to_string(),
            is_overwrite: false,
        }),
    };

    let mut membership = StaticMembership::new(hosts.iter().map(|h| addr(h)).collect());
    membership.add_locations(PlanNodeId::new(0), scan_locations(hosts, num_ranges));
    (request, membership)
}

/// `num_ranges` equal-sized ranges, candidate lists rotated so every host
/// leads for its share.
pub fn scan_locations(hosts: &[&str], num_ranges: usize) -> Vec<ScanRangeLocations> {
    (0..num_ranges)
        .map(|i| {
            let mut candidates: Vec<NetworkAddress> = Vec::with_capacity(hosts.len());
            for k in 0..hosts.len() {
                candidates.push(addr(hosts[(i + k) % hosts.len()]));
            }
            ScanRangeLocations {
                scan_range: ScanRange {
                    path: format!("tablet-{i}.dat"),
                    offset: 0,
                    length: 64,
                },
                locations: candidates,
            }
        })
        .collect()
}

/// Profile snapshot a backend would report: an instance root plus one scan
/// node child carrying completed-range and throughput counters.
pub fn instance_profile_tree(scan_node: Option<(i32, i64)>) -> ProfileTree {
    let root = RuntimeProfile::new("Fragment Instance");
    root.counter_set("ExecTime", CounterUnit::TimeNs, 1_000_000);
    root.counter_set("RowsProduced", CounterUnit::Rows, 100);
    if let Some((node_id, ranges_complete)) = scan_node {
        let scan = root.child(format!("OLAP_SCAN (plan_node_id={node_id})"));
        scan.set_metadata(node_id as i64);
        scan.counter_set("ScanRangesComplete", CounterUnit::Unit, ranges_complete);
        scan.counter_set("BytesReadThroughput", CounterUnit::BytesPerSecond, 4096);
    }
    root.to_tree()
}

/// Terminal OK report for one launched instance, echoing the identity from
/// its launch parameters.
pub fn done_report(params: &ExecPlanFragmentParams) -> ReportExecStatusParams {
    let scan_node = params
        .params
        .per_node_scan_ranges
        .iter()
        .next()
        .map(|(node_id, ranges)| (node_id.as_i32(), ranges.len() as i64));
    ReportExecStatusParams {
        query_id: params.params.query_id,
        backend_num: params.params.backend_num,
        fragment_instance_id: params.params.fragment_instance_id,
        status: Status::ok(),
        done: true,
        profile: Some(instance_profile_tree(scan_node)),
        error_log: Vec::new(),
        insert_exec_status: None,
    }
}

/// Terminal error report for one launched instance.
pub fn error_report(
    params: &ExecPlanFragmentParams,
    status: Status,
    error_lines: Vec<String>,
) -> ReportExecStatusParams {
    ReportExecStatusParams {
        query_id: params.params.query_id,
        backend_num: params.params.backend_num,
        fragment_instance_id: params.params.fragment_instance_id,
        status,
        done: true,
        profile: None,
        error_log: error_lines,
        insert_exec_status: None,
    }
}

/// Terminal OK report carrying INSERT side effects.
pub fn insert_report(
    params: &ExecPlanFragmentParams,
    partition_row_counts: &[(&str, i64)],
    files_to_move: &[(&str, &str)],
) -> ReportExecStatusParams {
    let mut report = done_report(params);
    report.insert_exec_status = Some(InsertExecStatus {
        partition_row_counts: partition_row_counts
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<BTreeMap<_, _>>(),
        files_to_move: files_to_move
            .iter()
            .map(|(src, dest)| novacoord::service::backend_client::FileMove {
                src: src.to_string(),
                dest: dest.to_string(),
            })
            .collect(),
    });
    report
}

/// Launch params split by fragment: instances with scan ranges are the leaf
/// fragment's, the rest are interior.
pub fn split_by_scan(
    params: &[ExecPlanFragmentParams],
) -> (Vec<ExecPlanFragmentParams>, Vec<ExecPlanFragmentParams>) {
    let (scan, other): (Vec<_>, Vec<_>) = params
        .iter()
        .cloned()
        .partition(|p| !p.params.per_node_scan_ranges.is_empty());
    (scan, other)
}
