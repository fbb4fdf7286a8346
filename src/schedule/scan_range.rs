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

use crate::common::ids::PlanNodeId;
use crate::common::status::{Status, StatusCode};
use crate::common::types::NetworkAddress;
use crate::plan::{PerNodeScanRanges, ScanRangeLocations};

/// Scan-range placement for one fragment: host -> scan node -> ranges.
pub type FragmentScanRangeAssignment = HashMap<NetworkAddress, PerNodeScanRanges>;

/// Distribute one scan node's ranges over their candidate hosts.
///
/// Ranges are walked in input order; each goes to the candidate host that has
/// the fewest bytes assigned so far for this node, ties broken by candidate
/// input order. When `exec_at_coord` is set every range is pinned to the
/// coordinator instead. Returns the number of ranges assigned.
pub fn compute_scan_range_assignment(
    node_id: PlanNodeId,
    locations: &[ScanRangeLocations],
    exec_at_coord: bool,
    coord: &NetworkAddress,
    assignment: &mut FragmentScanRangeAssignment,
) -> Result<i64, Status> {
    let mut assigned_bytes: HashMap<NetworkAddress, i64> = HashMap::new();
    for entry in locations {
        let host = if exec_at_coord {
            coord.clone()
        } else {
            let mut best: Option<&NetworkAddress> = None;
            let mut best_bytes = i64::MAX;
            for candidate in &entry.locations {
                let bytes = assigned_bytes.get(candidate).copied().unwrap_or(0);
                if bytes < best_bytes {
                    best = Some(candidate);
                    best_bytes = bytes;
                }
            }
            best.cloned().ok_or_else(|| {
                Status::new(
                    StatusCode::HostAssignmentFailed,
                    format!(
                        "scan range {} of node {} has no candidate hosts",
                        entry.scan_range.path, node_id
                    ),
                )
            })?
        };
        *assigned_bytes.entry(host.clone()).or_insert(0) += entry.scan_range.length;
        assignment
            .entry(host)
            .or_default()
            .entry(node_id)
            .or_default()
            .push(entry.scan_range.clone());
    }
    Ok(locations.len() as i64)
}

/// Total bytes of all ranges assigned to `host` in `assignment`.
pub fn assigned_bytes_for_host(
    assignment: &FragmentScanRangeAssignment,
    host: &NetworkAddress,
) -> i64 {
    assignment
        .get(host)
        .map(|per_node| {
            per_node
                .values()
                .flat_map(|ranges| ranges.iter())
                .map(|r| r.length)
                .sum()
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ScanRange;

    fn addr(name: &str) -> NetworkAddress {
        NetworkAddress::new(name, 9060)
    }

    fn range(path: &str, length: i64) -> ScanRange {
        ScanRange {
            path: path.to_string(),
            offset: 0,
            length,
        }
    }

    fn locations(ranges: &[(&str, i64)], hosts: &[&str]) -> Vec<ScanRangeLocations> {
        ranges
            .iter()
            .map(|(path, length)| ScanRangeLocations {
                scan_range: range(path, *length),
                locations: hosts.iter().map(|h| addr(h)).collect(),
            })
            .collect()
    }

    #[test]
    fn ranges_balance_by_assigned_bytes() {
        let node = PlanNodeId::new(0);
        let locs = locations(
            &[("a", 100), ("b", 10), ("c", 10), ("d", 10)],
            &["be1", "be2"],
        );
        let mut assignment = FragmentScanRangeAssignment::new();
        let n = compute_scan_range_assignment(node, &locs, false, &addr("coord"), &mut assignment)
            .expect("assign");
        assert_eq!(n, 4);
        // "a" lands on be1 (tie, input order); the rest pile onto be2 until
        // it catches up.
        assert_eq!(assigned_bytes_for_host(&assignment, &addr("be1")), 100);
        assert_eq!(assigned_bytes_for_host(&assignment, &addr("be2")), 30);
        let be2_ranges = &assignment[&addr("be2")][&node];
        assert_eq!(
            be2_ranges.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "d"]
        );
    }

    #[test]
    fn even_ranges_spread_evenly() {
        let node = PlanNodeId::new(0);
        let hosts = ["be1", "be2", "be3", "be4"];
        let ranges: Vec<(String, i64)> = (0..12).map(|i| (format!("r{i}"), 64)).collect();
        let ranges_ref: Vec<(&str, i64)> =
            ranges.iter().map(|(p, l)| (p.as_str(), *l)).collect();
        let locs = locations(&ranges_ref, &hosts);
        let mut assignment = FragmentScanRangeAssignment::new();
        compute_scan_range_assignment(node, &locs, false, &addr("coord"), &mut assignment)
            .expect("assign");
        for host in hosts {
            assert_eq!(assignment[&addr(host)][&node].len(), 3, "host {host}");
        }
    }

    #[test]
    fn exec_at_coord_pins_everything() {
        let node = PlanNodeId::new(2);
        let locs = locations(&[("a", 1), ("b", 2)], &["be1", "be2"]);
        let mut assignment = FragmentScanRangeAssignment::new();
        compute_scan_range_assignment(node, &locs, true, &addr("coord"), &mut assignment)
            .expect("assign");
        assert_eq!(assignment.len(), 1);
        assert_eq!(assignment[&addr("coord")][&node].len(), 2);
    }

    #[test]
    fn range_without_candidates_fails() {
        let node = PlanNodeId::new(0);
        let locs = vec![ScanRangeLocations {
            scan_range: range("orphan", 5),
            locations: vec![],
        }];
        let mut assignment = FragmentScanRangeAssignment::new();
        let err =
            compute_scan_range_assignment(node, &locs, false, &addr("coord"), &mut assignment)
                .expect_err("no candidates");
        assert_eq!(err.code(), StatusCode::HostAssignmentFailed);
    }
}
