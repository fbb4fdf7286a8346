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
//! Turns a `QueryExecRequest` into per-fragment execution parameters: which
//! hosts run each fragment, the instance ids, where each fragment streams
//! its output, how many senders feed each exchange, and which scan ranges
//! every instance reads.

use std::collections::{HashMap, HashSet};

use crate::common::ids::PlanNodeId;
use crate::common::status::{Status, StatusCode};
use crate::common::types::{NetworkAddress, UniqueId};
use crate::plan::inspector;
use crate::plan::{DataPartition, DataSink, PlanFragmentDestination, QueryExecRequest};
use crate::schedule::membership::ClusterMembership;
use crate::schedule::scan_range::{compute_scan_range_assignment, FragmentScanRangeAssignment};

/// Execution parameters of one fragment. `hosts` and `instance_ids` are
/// parallel vectors; read-only once the schedule is computed.
#[derive(Clone, Debug, Default)]
pub struct FragmentExecParams {
    pub hosts: Vec<NetworkAddress>,
    pub instance_ids: Vec<UniqueId>,
    pub destinations: Vec<PlanFragmentDestination>,
    pub per_exch_num_senders: HashMap<PlanNodeId, i32>,
    pub scan_range_assignment: FragmentScanRangeAssignment,
}

/// The full placement decision for a query.
#[derive(Debug, Default)]
pub struct QuerySchedule {
    pub fragment_exec_params: Vec<FragmentExecParams>,
    pub unique_hosts: HashSet<NetworkAddress>,
    /// Number of remotely executed fragment instances. The coordinator
    /// fragment, when present, runs in-process and is not counted.
    pub num_backends: usize,
    pub num_scan_ranges: i64,
}

pub fn compute_query_schedule(
    query_id: UniqueId,
    request: &QueryExecRequest,
    membership: &dyn ClusterMembership,
    coord: &NetworkAddress,
) -> Result<QuerySchedule, Status> {
    if request.fragments.is_empty() {
        return Err(Status::new(StatusCode::PlanInvalid, "request has no fragments"));
    }
    let num_fragments = request.fragments.len();
    let mut params: Vec<FragmentExecParams> = vec![FragmentExecParams::default(); num_fragments];

    compute_fragment_hosts(query_id, request, membership, coord, &mut params)?;

    // Instance ids are numbered across all fragments, coordinator instance
    // included, so an instance id identifies its query by construction.
    let mut instance_num: i64 = 0;
    for fp in params.iter_mut() {
        for _ in &fp.hosts {
            instance_num += 1;
            fp.instance_ids.push(query_id.with_instance_offset(instance_num));
        }
    }

    // Wire up the exchange edges: each sender fragment streams to every
    // instance of its consumer, and the consumer's exchange node learns how
    // many senders feed it (its termination condition).
    for idx in 1..num_fragments {
        let dest_node_id = match request.fragments[idx].output_sink {
            Some(DataSink::DataStreamSink { dest_node_id }) => dest_node_id,
            _ => continue,
        };
        let dest_idx = *request.dest_fragment_idx.get(idx - 1).ok_or_else(|| {
            Status::new(
                StatusCode::PlanInvalid,
                format!("fragment {idx} has a stream sink but no dest fragment"),
            )
        })?;
        if dest_idx >= idx {
            return Err(Status::new(
                StatusCode::PlanInvalid,
                format!("fragment {idx} streams to non-upstream fragment {dest_idx}"),
            ));
        }
        let destinations: Vec<PlanFragmentDestination> = params[dest_idx]
            .instance_ids
            .iter()
            .zip(params[dest_idx].hosts.iter())
            .map(|(id, host)| PlanFragmentDestination {
                fragment_instance_id: *id,
                server: host.clone(),
            })
            .collect();
        let num_senders = params[idx].hosts.len() as i32;
        params[idx].destinations = destinations;
        *params[dest_idx]
            .per_exch_num_senders
            .entry(dest_node_id)
            .or_insert(0) += num_senders;
    }

    // Scan ranges, fragment by fragment, preserving storage-layer order.
    let mut num_scan_ranges = 0i64;
    for (idx, fragment) in request.fragments.iter().enumerate() {
        let exec_at_coord = fragment.partition == DataPartition::Unpartitioned;
        for node_id in fragment.plan.scan_node_ids() {
            let locations = membership.scan_range_locations(query_id, node_id)?;
            num_scan_ranges += compute_scan_range_assignment(
                node_id,
                &locations,
                exec_at_coord,
                coord,
                &mut params[idx].scan_range_assignment,
            )?;
        }
    }

    let mut unique_hosts = HashSet::new();
    for fp in &params {
        for host in &fp.hosts {
            unique_hosts.insert(host.clone());
        }
    }
    let total_instances: usize = params.iter().map(|p| p.hosts.len()).sum();
    let num_backends = if request.has_coordinator_fragment() {
        total_instances - 1
    } else {
        total_instances
    };

    Ok(QuerySchedule {
        fragment_exec_params: params,
        unique_hosts,
        num_backends,
        num_scan_ranges,
    })
}

/// Host selection, leaves first: unpartitioned fragments run on the
/// coordinator, interior fragments co-locate with their leftmost input
/// (removes a network hop on the probe side), leaf fragments follow their
/// data.
fn compute_fragment_hosts(
    query_id: UniqueId,
    request: &QueryExecRequest,
    membership: &dyn ClusterMembership,
    coord: &NetworkAddress,
    params: &mut [FragmentExecParams],
) -> Result<(), Status> {
    for idx in (0..request.fragments.len()).rev() {
        let fragment = &request.fragments[idx];
        if fragment.partition == DataPartition::Unpartitioned {
            params[idx].hosts = vec![coord.clone()];
            continue;
        }
        if let Some(input_idx) = inspector::find_leftmost_input_fragment(idx, request) {
            if input_idx <= idx {
                return Err(Status::new(
                    StatusCode::PlanInvalid,
                    format!("fragment {idx} consumes downstream fragment {input_idx}"),
                ));
            }
            params[idx].hosts = params[input_idx].hosts.clone();
            continue;
        }
        if fragment.plan.scan_node_ids().is_empty() {
            return Err(Status::new(
                StatusCode::HostAssignmentFailed,
                format!("fragment {idx} has neither scan nodes nor an input exchange"),
            ));
        }
        let mut candidates = Vec::new();
        for node_id in fragment.plan.scan_node_ids() {
            for loc in membership.scan_range_locations(query_id, node_id)? {
                candidates.extend(loc.locations);
            }
        }
        let hosts = membership.hosts_for_fragment(&candidates)?;
        if hosts.is_empty() {
            return Err(Status::new(
                StatusCode::HostAssignmentFailed,
                format!("no hosts assigned for fragment {idx}"),
            ));
        }
        params[idx].hosts = hosts;
    }
    Ok(())
}
