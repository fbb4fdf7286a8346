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
//! Pure walks over the flattened plan tree: leftmost-node lookup and the
//! fragment-to-fragment dataflow edge it induces.

use crate::common::ids::PlanNodeId;
use crate::plan::{DataSink, Plan, PlanNodeType, QueryExecRequest};

/// Id of the leftmost node whose type is in `types`, walking the leftmost
/// spine of the plan (in the flattened pre-order, a node's first child is the
/// node right after it). `None` if the spine holds no such node.
pub fn find_leftmost_node(plan: &Plan, types: &[PlanNodeType]) -> Option<PlanNodeId> {
    let mut idx = 0;
    loop {
        let node = plan.nodes.get(idx)?;
        if types.contains(&node.node_type) {
            return Some(node.node_id);
        }
        if node.num_children < 1 {
            return None;
        }
        idx += 1;
    }
}

/// Index of the fragment that feeds `fragment_idx`'s leftmost exchange node.
/// `None` when the leftmost node is not an exchange, i.e. the fragment is a
/// leaf of the dataflow tree.
pub fn find_leftmost_input_fragment(
    fragment_idx: usize,
    request: &QueryExecRequest,
) -> Option<usize> {
    let fragment = request.fragments.get(fragment_idx)?;
    let exch_id = find_leftmost_node(&fragment.plan, &[PlanNodeType::ExchangeNode])?;
    for (idx, sender) in request.fragments.iter().enumerate().skip(1) {
        if request.dest_fragment_idx.get(idx - 1) != Some(&fragment_idx) {
            continue;
        }
        if let Some(DataSink::DataStreamSink { dest_node_id }) = sender.output_sink {
            if dest_node_id == exch_id {
                return Some(idx);
            }
        }
    }
    None
}
