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
//! Per-query coordinator.
//!
//! One `Coordinator` drives one query: `exec` schedules and launches every
//! fragment instance, `wait` blocks until results are ready (or the query
//! finished, for DML), `get_next` streams the coordinator fragment's rows,
//! `cancel` tears everything down, and `update_fragment_exec_status`
//! absorbs the backends' reports. Setting the overall error status and
//! starting cancellation of local and remote fragments is a single atomic
//! step under the global lock.
//!
//! Expected call sequence (same-numbered calls may be concurrent):
//! 1. `exec`
//! 2. `wait` / `cancel` / `update_fragment_exec_status`
//! 3. `get_next`* / `cancel` / `update_fragment_exec_status`
//!
//! Lock order: `wait_lock`, then the global `lock`, then one instance lock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;

use arrow::record_batch::RecordBatch;

use crate::common::config::{debug_exec_params_json, fs_root, progress_log_interval_percent};
use crate::common::ids::PlanNodeId;
use crate::common::status::{Status, StatusCode};
use crate::common::types::{NetworkAddress, UniqueId};
use crate::fs::local::build_fs_operator;
use crate::novacoord_logging::{debug, error, info, warn};
use crate::plan::{
    DataSink, DescriptorTable, FinalizeParams, QueryExecRequest, QueryGlobals, QueryOptions,
};
use crate::runtime::backend_state::{collect_scan_node_counters, BackendExecState};
use crate::runtime::exec_env::ExecEnv;
use crate::runtime::executor::FragmentExecutor;
use crate::runtime::finalize::{build_catalog_update, move_insert_files, CatalogUpdate};
use crate::runtime::profile::{CounterUnit, RuntimeProfile, SummaryStats};
use crate::runtime::progress::ProgressUpdater;
use crate::schedule::exec_params::{compute_query_schedule, FragmentExecParams};
use crate::schedule::scan_range::assigned_bytes_for_host;
use crate::service::backend_client::{
    ExecPlanFragmentParams, FileMove, PlanFragmentExecParams, ReportExecStatusParams,
};

pub struct Coordinator {
    exec_env: Arc<ExecEnv>,
    query_id: UniqueId,
    /// Populated once by `exec`, read-only afterwards.
    exec_state: OnceLock<QueryExecState>,
    /// In-process executor for the coordinator fragment, when there is one.
    executor: OnceLock<Arc<dyn FragmentExecutor>>,
    /// Serializes `wait`; holds `has_called_wait`. Never held while already
    /// holding `lock`.
    wait_lock: Mutex<bool>,
    lock: Mutex<QueryState>,
    /// Notified when `num_remaining_backends` reaches 0 and on cancellation.
    backend_completion_cv: Condvar,
}

/// Scheduling output and aggregation structure, fixed at launch.
struct QueryExecState {
    fragments: Vec<crate::plan::PlanFragment>,
    desc_tbl: DescriptorTable,
    query_globals: QueryGlobals,
    query_options: QueryOptions,
    finalize_params: Option<FinalizeParams>,
    has_coordinator_fragment: bool,
    fragment_exec_params: Vec<FragmentExecParams>,
    backend_states: Vec<Arc<BackendExecState>>,
    backend_num_by_instance: HashMap<UniqueId, usize>,
    unique_hosts: HashSet<NetworkAddress>,
    num_backends: usize,
    progress: ProgressUpdater,
    fragment_profiles: Vec<FragmentProfileData>,
}

/// Aggregation state of one fragment.
struct FragmentProfileData {
    /// Root profile; one child per instance.
    root_profile: RuntimeProfile,
    num_instances: usize,
    bytes_assigned: Mutex<SummaryStats>,
    completion_times: Mutex<SummaryStats>,
    rates: Mutex<SummaryStats>,
}

/// Everything the global lock protects.
struct QueryState {
    /// First non-OK status wins; never goes back to OK.
    query_status: Status,
    failed_instance: Option<UniqueId>,
    /// Once set the client has all rows; later remote errors are only
    /// logged.
    returned_all_results: bool,
    execution_completed: bool,
    num_remaining_backends: usize,
    partition_row_counts: BTreeMap<String, i64>,
    files_to_move: Vec<FileMove>,
    file_move_srcs: HashSet<String>,
}

impl Coordinator {
    pub fn new(exec_env: Arc<ExecEnv>, query_id: UniqueId) -> Self {
        Self {
            exec_env,
            query_id,
            exec_state: OnceLock::new(),
            executor: OnceLock::new(),
            wait_lock: Mutex::new(false),
            lock: Mutex::new(QueryState {
                query_status: Status::ok(),
                failed_instance: None,
                returned_all_results: false,
                execution_completed: false,
                num_remaining_backends: 0,
                partition_row_counts: BTreeMap::new(),
                files_to_move: Vec::new(),
                file_move_srcs: HashSet::new(),
            }),
            backend_completion_cv: Condvar::new(),
        }
    }

    pub fn query_id(&self) -> UniqueId {
        self.query_id
    }

    /// Starts the query: computes placement, prepares the in-process
    /// coordinator fragment, and launches every remote instance in
    /// parallel. Returns once all launches finished; the first launch
    /// failure poisons the query and cancels everything already running.
    pub fn exec(&self, request: &QueryExecRequest, query_options: &QueryOptions) -> Status {
        if self.exec_state.get().is_some() {
            return Status::internal_error("exec called twice");
        }
        if let Err(status) = self.exec_internal(request, query_options) {
            return self.update_status(status, None);
        }
        self.get_status()
    }

    fn exec_internal(
        &self,
        request: &QueryExecRequest,
        query_options: &QueryOptions,
    ) -> Result<(), Status> {
        let returns_rows = matches!(
            request.fragments.first().and_then(|f| f.output_sink.as_ref()),
            Some(DataSink::ResultSink)
        );
        if returns_rows && !request.has_coordinator_fragment() {
            return Err(Status::new(
                StatusCode::PlanInvalid,
                "query returning rows must have an unpartitioned root fragment",
            ));
        }

        let schedule = compute_query_schedule(
            self.query_id,
            request,
            self.exec_env.membership(),
            self.exec_env.backend_address(),
        )?;
        let has_coordinator_fragment = request.has_coordinator_fragment();

        let mut fragment_profiles = Vec::with_capacity(schedule.fragment_exec_params.len());
        for (idx, fp) in schedule.fragment_exec_params.iter().enumerate() {
            fragment_profiles.push(FragmentProfileData {
                root_profile: RuntimeProfile::new(format!("Fragment F{idx:02}")),
                num_instances: fp.hosts.len(),
                bytes_assigned: Mutex::new(SummaryStats::new()),
                completion_times: Mutex::new(SummaryStats::new()),
                rates: Mutex::new(SummaryStats::new()),
            });
        }

        let mut backend_states = Vec::with_capacity(schedule.num_backends);
        let mut backend_num_by_instance = HashMap::new();
        for (fragment_idx, fp) in schedule.fragment_exec_params.iter().enumerate() {
            for (instance_idx, (instance_id, host)) in
                fp.instance_ids.iter().zip(fp.hosts.iter()).enumerate()
            {
                let split_bytes = assigned_bytes_for_host(&fp.scan_range_assignment, host);
                fragment_profiles[fragment_idx]
                    .bytes_assigned
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .update(split_bytes);
                if has_coordinator_fragment && fragment_idx == 0 {
                    // The coordinator fragment runs in-process, not via RPC.
                    continue;
                }
                let backend_num = backend_states.len();
                let profile = fragment_profiles[fragment_idx]
                    .root_profile
                    .child(format!("Instance {instance_id} (host={host})"));
                backend_num_by_instance.insert(*instance_id, backend_num);
                backend_states.push(Arc::new(BackendExecState::new(
                    backend_num,
                    fragment_idx,
                    instance_idx,
                    *instance_id,
                    host.clone(),
                    split_bytes,
                    profile,
                )));
            }
        }

        let progress = ProgressUpdater::new(
            format!("Query {}", self.query_id),
            schedule.num_scan_ranges,
            progress_log_interval_percent(),
        );

        let exec_state = QueryExecState {
            fragments: request.fragments.clone(),
            desc_tbl: request.desc_tbl.clone(),
            query_globals: request.query_globals.clone(),
            query_options: query_options.clone(),
            finalize_params: request.finalize_params.clone(),
            has_coordinator_fragment,
            fragment_exec_params: schedule.fragment_exec_params,
            backend_states,
            backend_num_by_instance,
            unique_hosts: schedule.unique_hosts,
            num_backends: schedule.num_backends,
            progress,
            fragment_profiles,
        };
        if self.exec_state.set(exec_state).is_err() {
            return Err(Status::internal_error("exec called twice"));
        }
        let exec_state = self.exec_state.get().expect("exec state just set");

        {
            let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            qs.num_remaining_backends = exec_state.num_backends;
        }

        info!(
            query_id = %self.query_id,
            num_fragments = exec_state.fragment_exec_params.len(),
            num_backends = exec_state.num_backends,
            num_scan_ranges = exec_state.progress.total(),
            unique_hosts = exec_state.unique_hosts.len(),
            "starting query execution"
        );
        self.print_backend_info(exec_state);

        if has_coordinator_fragment {
            let params = self.exec_plan_fragment_params(exec_state, 0, 0, -1);
            let executor = self.exec_env.local_engine().create_executor(&params)?;
            if self.executor.set(executor).is_err() {
                return Err(Status::internal_error("coordinator executor already set"));
            }
            if let Some(executor) = self.executor.get() {
                executor.prepare()?;
            }
        }

        // Launch all remote instances in parallel. Each instance's lock is
        // held across its RPC so an early report serializes after the
        // launched transition.
        thread::scope(|scope| {
            for state in &exec_state.backend_states {
                let params = self.exec_plan_fragment_params(
                    exec_state,
                    state.fragment_idx,
                    state.instance_idx,
                    state.backend_num as i32,
                );
                scope.spawn(move || self.exec_remote_fragment(state, params));
            }
        });

        let status = self.get_status();
        if status.is_ok() {
            Ok(())
        } else {
            Err(status)
        }
    }

    fn exec_plan_fragment_params(
        &self,
        exec_state: &QueryExecState,
        fragment_idx: usize,
        instance_idx: usize,
        backend_num: i32,
    ) -> ExecPlanFragmentParams {
        let fp = &exec_state.fragment_exec_params[fragment_idx];
        let host = &fp.hosts[instance_idx];
        ExecPlanFragmentParams {
            fragment: exec_state.fragments[fragment_idx].clone(),
            desc_tbl: exec_state.desc_tbl.clone(),
            params: PlanFragmentExecParams {
                query_id: self.query_id,
                fragment_instance_id: fp.instance_ids[instance_idx],
                backend_num,
                per_node_scan_ranges: fp
                    .scan_range_assignment
                    .get(host)
                    .cloned()
                    .unwrap_or_default(),
                destinations: fp.destinations.clone(),
                per_exch_num_senders: fp.per_exch_num_senders.clone(),
                coord: self.exec_env.backend_address().clone(),
            },
            query_globals: exec_state.query_globals.clone(),
            query_options: exec_state.query_options.clone(),
        }
    }

    /// Issues one `ExecPlanFragment` RPC. Called in parallel from `exec`.
    fn exec_remote_fragment(&self, state: &Arc<BackendExecState>, params: ExecPlanFragmentParams) {
        if debug_exec_params_json() {
            match serde_json::to_string(&params) {
                Ok(json) => debug!(
                    instance_id = %state.fragment_instance_id,
                    host = %state.address,
                    params = %json,
                    "launching fragment instance"
                ),
                Err(e) => debug!(error = %e, "exec params not serializable"),
            }
        } else {
            debug!(
                instance_id = %state.fragment_instance_id,
                host = %state.address,
                "launching fragment instance"
            );
        }

        let launch_status = {
            let mut inst = state.lock();
            let result = self
                .exec_env
                .backend_client()
                .exec_plan_fragment(&state.address, &params);
            match result {
                Ok(remote_status) if remote_status.is_ok() => {
                    inst.initiated = true;
                    Status::ok()
                }
                Ok(mut remote_status) => {
                    remote_status.add_error_msg(format!(
                        "fragment instance {} failed to start on {}",
                        state.fragment_instance_id, state.address
                    ));
                    inst.status = remote_status.clone();
                    inst.error_log.push(remote_status.message().to_string());
                    inst.done = true;
                    inst.completion_time_ns = state.elapsed_ns();
                    remote_status
                }
                Err(rpc_error) => {
                    let status = Status::new(
                        StatusCode::LaunchRpcFailed,
                        format!(
                            "ExecPlanFragment rpc to {} failed: {}",
                            state.address, rpc_error
                        ),
                    );
                    inst.status = status.clone();
                    inst.error_log.push(status.message().to_string());
                    inst.done = true;
                    inst.completion_time_ns = state.elapsed_ns();
                    status
                }
            }
        };

        if !launch_status.is_ok() {
            warn!(
                instance_id = %state.fragment_instance_id,
                host = %state.address,
                status = %launch_status,
                "fragment instance launch failed"
            );
            let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            qs.num_remaining_backends = qs.num_remaining_backends.saturating_sub(1);
            if qs.num_remaining_backends == 0 {
                self.backend_completion_cv.notify_all();
            }
            self.update_status_locked(
                &mut qs,
                launch_status,
                Some(state.fragment_instance_id),
            );
            return;
        }

        // The query may have failed while this launch was in flight; make
        // sure this instance still sees a cancel attempt.
        let cancelled_meanwhile = {
            let qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            !qs.query_status.is_ok()
        };
        if cancelled_meanwhile {
            self.send_cancel_rpc(state);
        }
    }

    /// Blocks until results are ready through `get_next`, or until the
    /// query finished for queries that return no rows. Idempotent;
    /// concurrent calls all observe the same status.
    pub fn wait(&self) -> Status {
        let mut has_called_wait = self.wait_lock.lock().unwrap_or_else(|e| e.into_inner());
        if *has_called_wait {
            return self.get_status();
        }
        *has_called_wait = true;
        // The guard stays held: a second wait blocks until this one is done
        // and then sees the final status.

        let Some(exec_state) = self.exec_state.get() else {
            // exec failed before scheduling; report its status.
            let status = self.get_status();
            if status.is_ok() {
                return Status::internal_error("wait called before exec");
            }
            return status;
        };

        if let Some(executor) = self.executor.get() {
            if let Err(status) = executor.open() {
                return self.update_status(status, self.coordinator_instance_id());
            }
        } else {
            let status = self.wait_for_all_backends();
            if !status.is_ok() {
                return status;
            }
        }

        if exec_state.finalize_params.is_some() {
            let status = self.wait_for_all_backends();
            if !status.is_ok() {
                return status;
            }
            if let Err(status) = self.finalize_query(exec_state) {
                return self.update_status(status, None);
            }
            let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            qs.execution_completed = true;
            drop(qs);
            self.report_query_summary();
        } else if self.executor.get().is_none() {
            let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            qs.execution_completed = true;
        }

        self.get_status()
    }

    /// Next batch of the coordinator fragment, `None` at end of stream. EOS
    /// is returned only once the local executor is drained and every
    /// backend reached a terminal state, so late remote errors still
    /// surface. Single consumer; all other entry points may run
    /// concurrently with it.
    pub fn get_next(&self) -> Result<Option<RecordBatch>, Status> {
        if self.exec_state.get().is_none() {
            let status = self.get_status();
            if status.is_ok() {
                return Err(Status::internal_error("get_next called before exec"));
            }
            return Err(status);
        }

        {
            let qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            if !qs.query_status.is_ok() {
                return Err(qs.query_status.clone());
            }
            if qs.execution_completed {
                return Ok(None);
            }
        }

        let Some(executor) = self.executor.get() else {
            // No coordinator fragment (distributed INSERT): EOS once all
            // backends finished.
            let status = self.wait_for_all_backends();
            if !status.is_ok() {
                return Err(status);
            }
            let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            qs.execution_completed = true;
            return Ok(None);
        };

        match executor.get_next() {
            Err(status) => Err(self.update_status(status, self.coordinator_instance_id())),
            Ok(Some(batch)) => Ok(Some(batch)),
            Ok(None) => {
                debug!(query_id = %self.query_id, "local executor drained");
                let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
                qs.returned_all_results = true;
                if qs.num_remaining_backends > 0 {
                    // Limit reached before the producers ran dry: stop them
                    // without failing the query.
                    self.cancel_remote_fragments_locked(&mut qs);
                }
                while qs.num_remaining_backends > 0 {
                    qs = self
                        .backend_completion_cv
                        .wait(qs)
                        .unwrap_or_else(|e| e.into_inner());
                }
                qs.execution_completed = true;
                drop(qs);
                self.report_query_summary();
                Ok(None)
            }
        }
    }

    /// Client-initiated cancellation of the local fragment and every remote
    /// instance. Level-triggered and idempotent.
    pub fn cancel(&self) {
        let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if !qs.query_status.is_ok() {
            // Already terminal; cancellation has run.
            return;
        }
        qs.query_status = Status::cancelled("Cancelled");
        qs.failed_instance = None;
        info!(query_id = %self.query_id, "cancelling query");
        self.cancel_internal_locked(&mut qs);
    }

    /// Stops remote producers of a successful query (row limit reached).
    /// The query status stays OK; errors reported after this are logged
    /// but do not fail the query.
    pub fn cancel_remote_fragments(&self) {
        let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        qs.returned_all_results = true;
        self.cancel_remote_fragments_locked(&mut qs);
    }

    /// Absorbs one `ReportExecStatus` callback. Reports for one instance
    /// are serialized by the caller; distinct instances may report
    /// concurrently. Returns the query status so backends can stop early
    /// when the query is already done.
    pub fn update_fragment_exec_status(&self, params: &ReportExecStatusParams) -> Status {
        let Some(exec_state) = self.exec_state.get() else {
            return Status::internal_error("report before exec");
        };
        let Some(&backend_num) = exec_state
            .backend_num_by_instance
            .get(&params.fragment_instance_id)
        else {
            return Status::internal_error(format!(
                "unknown fragment instance id: {}",
                params.fragment_instance_id
            ));
        };
        if params.backend_num != backend_num as i32 {
            return Status::internal_error(format!(
                "mismatched backend number for instance {}: got {}, expected {}",
                params.fragment_instance_id, params.backend_num, backend_num
            ));
        }
        let state = &exec_state.backend_states[backend_num];

        let mut progress_delta = 0i64;
        let mut new_error_lines = Vec::new();
        let became_done;
        {
            let mut inst = state.lock();
            if inst.done {
                // Terminal already; a retransmitted report changes nothing.
                debug!(
                    instance_id = %params.fragment_instance_id,
                    "ignoring report for finished fragment instance"
                );
                return self.get_status();
            }
            if let Some(tree) = &params.profile {
                state.profile.update_from_tree(tree);
                let (ranges_complete, throughput) = collect_scan_node_counters(tree);
                for (node_id, value) in ranges_complete {
                    let prev = inst.scan_ranges_complete.insert(node_id, value).unwrap_or(0);
                    progress_delta += (value - prev).max(0);
                }
                for (node_id, value) in throughput {
                    inst.scan_throughput.insert(node_id, value);
                }
            }
            for line in &params.error_log {
                inst.error_log.push(line.clone());
                new_error_lines.push(line.clone());
            }
            became_done = params.done || !params.status.is_ok();
            if became_done {
                inst.done = true;
                inst.status = params.status.clone();
                inst.completion_time_ns = state.elapsed_ns();
                let fragment = &exec_state.fragment_profiles[state.fragment_idx];
                fragment
                    .completion_times
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .update(inst.completion_time_ns);
                fragment
                    .rates
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .update(state.exec_rate(inst.completion_time_ns));
            }
        }

        if progress_delta > 0 {
            exec_state.progress.update(progress_delta);
        }
        for line in &new_error_lines {
            warn!(
                query_id = %self.query_id,
                instance_id = %params.fragment_instance_id,
                host = %state.address,
                "fragment error log: {line}"
            );
        }

        let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(insert_status) = &params.insert_exec_status {
            for (partition, rows) in &insert_status.partition_row_counts {
                *qs.partition_row_counts.entry(partition.clone()).or_insert(0) += rows;
            }
            for file_move in &insert_status.files_to_move {
                if !qs.file_move_srcs.insert(file_move.src.clone()) {
                    let status = Status::internal_error(format!(
                        "duplicate file move source reported: {}",
                        file_move.src
                    ));
                    return self.update_status_locked(
                        &mut qs,
                        status,
                        Some(params.fragment_instance_id),
                    );
                }
                qs.files_to_move.push(file_move.clone());
            }
        }
        if became_done {
            qs.num_remaining_backends = qs.num_remaining_backends.saturating_sub(1);
            debug!(
                query_id = %self.query_id,
                instance_id = %params.fragment_instance_id,
                remaining = qs.num_remaining_backends,
                "fragment instance finished"
            );
            if qs.num_remaining_backends == 0 {
                self.backend_completion_cv.notify_all();
            }
        }
        if !params.status.is_ok() {
            return self.update_status_locked(
                &mut qs,
                params.status.clone(),
                Some(params.fragment_instance_id),
            );
        }
        qs.query_status.clone()
    }

    /// Catalog changes this INSERT produced; `None` when there are none.
    /// Only meaningful after `wait`.
    pub fn prepare_catalog_update(&self) -> Option<CatalogUpdate> {
        let exec_state = self.exec_state.get()?;
        let finalize_params = exec_state.finalize_params.as_ref()?;
        let qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        build_catalog_update(finalize_params, &qs.partition_row_counts)
    }

    /// Rows written per partition; empty key is the whole table. Only
    /// meaningful after `wait`.
    pub fn partition_row_counts(&self) -> BTreeMap<String, i64> {
        let qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        qs.partition_row_counts.clone()
    }

    /// Error log of the query and all fragment instances, one block per
    /// failed or logging instance.
    pub fn get_error_log(&self) -> String {
        let mut out = String::new();
        {
            let qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            if !qs.query_status.is_ok() {
                let _ = write!(out, "Query ({}): {}", self.query_id, qs.query_status);
                if let Some(instance) = qs.failed_instance {
                    let _ = write!(out, " (failed instance: {instance})");
                }
                let _ = writeln!(out);
            }
        }
        let Some(exec_state) = self.exec_state.get() else {
            return out;
        };
        for state in &exec_state.backend_states {
            let inst = state.lock();
            if inst.status.is_ok() && inst.error_log.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "Backend {} ({}), instance {}:",
                state.backend_num, state.address, state.fragment_instance_id
            );
            if !inst.status.is_ok() {
                let _ = writeln!(out, "  status: {}", inst.status);
            }
            for line in &inst.error_log {
                let _ = writeln!(out, "  {line}");
            }
        }
        out
    }

    /// Aggregated profile snapshot: a query-level "Aggregate" node, one
    /// averaged profile per fragment, and the per-instance trees. Safe to
    /// call while reports are still streaming in.
    pub fn query_profile(&self) -> RuntimeProfile {
        let root = RuntimeProfile::new(format!("Query (id={})", self.query_id));
        let Some(exec_state) = self.exec_state.get() else {
            return root;
        };

        let aggregate = root.child("Aggregate");
        aggregate.counter_set(
            "ScanRangesTotal",
            CounterUnit::Unit,
            exec_state.progress.total(),
        );
        aggregate.counter_set(
            "ScanRangesComplete",
            CounterUnit::Unit,
            exec_state.progress.num_complete(),
        );
        for (node_id, (ranges, throughput)) in self.scan_node_totals(exec_state) {
            aggregate.counter_set(
                &format!("ScanRangesComplete (plan_node_id={node_id})"),
                CounterUnit::Unit,
                ranges,
            );
            aggregate.counter_set(
                &format!("TotalThroughput (plan_node_id={node_id})"),
                CounterUnit::BytesPerSecond,
                throughput,
            );
        }

        if let Some(executor) = self.executor.get() {
            let coordinator_fragment = root.child("Coordinator Fragment");
            coordinator_fragment.update_from_tree(&executor.profile().to_tree());
        }

        for (idx, fragment) in exec_state.fragment_profiles.iter().enumerate() {
            let instance_profiles: Vec<RuntimeProfile> = exec_state
                .backend_states
                .iter()
                .filter(|s| s.fragment_idx == idx)
                .map(|s| s.profile.clone())
                .collect();
            if let Some(averaged) = RuntimeProfile::merge_isomorphic_profiles(&instance_profiles) {
                averaged.set_name(format!("Averaged Fragment F{idx:02}"));
                averaged.add_info_string(
                    "num instances",
                    fragment.num_instances.to_string(),
                );
                averaged.add_info_string(
                    "split sizes",
                    fragment
                        .bytes_assigned
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .summary_string(),
                );
                averaged.add_info_string(
                    "completion times",
                    fragment
                        .completion_times
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .summary_string(),
                );
                averaged.add_info_string(
                    "execution rates",
                    fragment
                        .rates
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .summary_string(),
                );
                root.add_child(averaged);
            }
            // Copy, so the snapshot does not alias live instance profiles.
            let fragment_copy = root.child(fragment.root_profile.name());
            fragment_copy.update_from_tree(&fragment.root_profile.to_tree());
        }
        root
    }

    /// Total completed scan ranges for one scan node across all backends.
    pub fn compute_total_scan_ranges_complete(&self, node_id: PlanNodeId) -> i64 {
        let Some(exec_state) = self.exec_state.get() else {
            return 0;
        };
        self.scan_node_totals(exec_state)
            .get(&node_id)
            .map(|(ranges, _)| *ranges)
            .unwrap_or(0)
    }

    /// Aggregate read throughput for one scan node across all backends.
    pub fn compute_total_throughput(&self, node_id: PlanNodeId) -> i64 {
        let Some(exec_state) = self.exec_state.get() else {
            return 0;
        };
        self.scan_node_totals(exec_state)
            .get(&node_id)
            .map(|(_, throughput)| *throughput)
            .unwrap_or(0)
    }

    /// Hosts this query runs on. Valid after `exec`.
    pub fn unique_hosts(&self) -> HashSet<NetworkAddress> {
        self.exec_state
            .get()
            .map(|s| s.unique_hosts.clone())
            .unwrap_or_default()
    }

    pub fn progress(&self) -> Option<&ProgressUpdater> {
        self.exec_state.get().map(|s| &s.progress)
    }

    pub fn num_backends(&self) -> usize {
        self.exec_state.get().map(|s| s.num_backends).unwrap_or(0)
    }

    fn get_status(&self) -> Status {
        let qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        qs.query_status.clone()
    }

    fn coordinator_instance_id(&self) -> Option<UniqueId> {
        let exec_state = self.exec_state.get()?;
        if !exec_state.has_coordinator_fragment {
            return None;
        }
        exec_state
            .fragment_exec_params
            .first()
            .and_then(|fp| fp.instance_ids.first().copied())
    }

    /// Single choke point for advancing the query status: the first non-OK
    /// status sticks, is attributed to `failed_instance`, and atomically
    /// starts cancellation. Returns the (possibly unchanged) status.
    fn update_status(&self, status: Status, failed_instance: Option<UniqueId>) -> Status {
        let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.update_status_locked(&mut qs, status, failed_instance)
    }

    fn update_status_locked(
        &self,
        qs: &mut QueryState,
        status: Status,
        failed_instance: Option<UniqueId>,
    ) -> Status {
        if status.is_ok() || !qs.query_status.is_ok() {
            return qs.query_status.clone();
        }
        if qs.returned_all_results {
            // The client already has every row; keep the successful status
            // and only keep a trace of the late error.
            debug!(
                query_id = %self.query_id,
                late_status = %status,
                "ignoring error after all results were returned"
            );
            return qs.query_status.clone();
        }
        error!(
            query_id = %self.query_id,
            status = %status,
            failed_instance = failed_instance.map(|id| id.to_string()).unwrap_or_default(),
            "query entering error state"
        );
        qs.query_status = status;
        qs.failed_instance = failed_instance;
        self.cancel_internal_locked(qs);
        qs.query_status.clone()
    }

    /// Cancellation engine; runs with the global lock held. Stops the local
    /// executor, sends best-effort cancel RPCs to every non-terminal
    /// instance, and wakes all waiters.
    fn cancel_internal_locked(&self, qs: &mut QueryState) {
        if let Some(executor) = self.executor.get() {
            executor.cancel();
        }
        self.cancel_remote_fragments_locked(qs);
        self.backend_completion_cv.notify_all();
    }

    fn cancel_remote_fragments_locked(&self, _qs: &mut QueryState) {
        let Some(exec_state) = self.exec_state.get() else {
            return;
        };
        for state in &exec_state.backend_states {
            let skip = {
                let inst = state.lock();
                inst.done || !inst.initiated
            };
            if skip {
                continue;
            }
            self.send_cancel_rpc(state);
        }
    }

    /// Best effort: a failed cancel RPC is logged and never promoted to a
    /// query error.
    fn send_cancel_rpc(&self, state: &Arc<BackendExecState>) {
        debug!(
            instance_id = %state.fragment_instance_id,
            host = %state.address,
            "sending CancelPlanFragment"
        );
        match self
            .exec_env
            .backend_client()
            .cancel_plan_fragment(&state.address, state.fragment_instance_id)
        {
            Ok(status) if status.is_ok() => {}
            Ok(status) => warn!(
                instance_id = %state.fragment_instance_id,
                host = %state.address,
                status = %status,
                "CancelPlanFragment rejected"
            ),
            Err(e) => warn!(
                instance_id = %state.fragment_instance_id,
                host = %state.address,
                error = %e,
                "CancelPlanFragment rpc failed"
            ),
        }
    }

    /// Returns once every backend reported a terminal state or the query is
    /// in error. Safe to call concurrently, but only after `exec`.
    fn wait_for_all_backends(&self) -> Status {
        let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        while qs.num_remaining_backends > 0 && qs.query_status.is_ok() {
            qs = self
                .backend_completion_cv
                .wait(qs)
                .unwrap_or_else(|e| e.into_inner());
        }
        debug!(
            query_id = %self.query_id,
            remaining = qs.num_remaining_backends,
            "done waiting for backends"
        );
        qs.query_status.clone()
    }

    /// Post-query side effects for INSERTs. Runs once, from `wait`, after
    /// every backend is terminal and only when the query is still OK.
    fn finalize_query(&self, exec_state: &QueryExecState) -> Result<(), Status> {
        let Some(finalize_params) = exec_state.finalize_params.as_ref() else {
            return Ok(());
        };
        // Either the coordinator fragment wrote the side effects or the
        // remote backends did; never both.
        if let Some(executor) = self.executor.get() {
            if let Some(insert_status) = executor.insert_exec_status() {
                let mut qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
                if !qs.partition_row_counts.is_empty() || !qs.files_to_move.is_empty() {
                    return Err(Status::internal_error(
                        "both coordinator fragment and remote backends reported insert state",
                    ));
                }
                qs.partition_row_counts = insert_status.partition_row_counts;
                qs.files_to_move = insert_status.files_to_move;
            }
        }
        let files_to_move = {
            let qs = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            qs.files_to_move.clone()
        };
        info!(
            query_id = %self.query_id,
            num_moves = files_to_move.len(),
            table_db = %finalize_params.table_db,
            table_name = %finalize_params.table_name,
            "finalizing insert"
        );
        let op = build_fs_operator(&fs_root())
            .map_err(|e| Status::new(StatusCode::FinalizeFailed, format!("{e:#}")))?;
        move_insert_files(&op, finalize_params, &files_to_move)
    }

    fn scan_node_totals(
        &self,
        exec_state: &QueryExecState,
    ) -> BTreeMap<PlanNodeId, (i64, i64)> {
        let mut totals: BTreeMap<PlanNodeId, (i64, i64)> = BTreeMap::new();
        for state in &exec_state.backend_states {
            let inst = state.lock();
            for (node_id, ranges) in &inst.scan_ranges_complete {
                totals.entry(*node_id).or_insert((0, 0)).0 += ranges;
            }
            for (node_id, throughput) in &inst.scan_throughput {
                totals.entry(*node_id).or_insert((0, 0)).1 += throughput;
            }
        }
        totals
    }

    fn print_backend_info(&self, exec_state: &QueryExecState) {
        for (idx, fragment) in exec_state.fragment_profiles.iter().enumerate() {
            let stats = fragment
                .bytes_assigned
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if stats.count() == 0 {
                continue;
            }
            info!(
                query_id = %self.query_id,
                fragment = idx,
                num_instances = fragment.num_instances,
                "split sizes: {}",
                stats.summary_string()
            );
        }
    }

    /// Per-fragment execution summary, logged at the end of a successful
    /// query.
    fn report_query_summary(&self) {
        let Some(exec_state) = self.exec_state.get() else {
            return;
        };
        for (idx, fragment) in exec_state.fragment_profiles.iter().enumerate() {
            let completion = fragment
                .completion_times
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .summary_string();
            let rates = fragment
                .rates
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .summary_string();
            info!(
                query_id = %self.query_id,
                fragment = idx,
                "completion times: {completion}; execution rates: {rates}"
            );
        }
        debug!(
            query_id = %self.query_id,
            "final profile:\n{}",
            self.query_profile().pretty_print()
        );
    }
}
