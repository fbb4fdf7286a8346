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
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Plan node id in novacoord's internal representation.
///
/// This is the FE planner's node id carried on the wire; scan-range tables,
/// exchange sender counts, and per-node counters are all keyed by it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanNodeId(pub i32);

impl PlanNodeId {
    pub const fn new(value: i32) -> Self {
        Self(value)
    }

    pub const fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<PlanNodeId> for i32 {
    fn from(value: PlanNodeId) -> Self {
        value.0
    }
}

impl FromStr for PlanNodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v = s
            .parse::<i32>()
            .map_err(|e| format!("invalid plan node id string '{}': {}", s, e))?;
        Ok(Self(v))
    }
}

#[cfg(test)]
mod tests {
    use super::PlanNodeId;

    #[test]
    fn plan_node_id_display_and_parse() {
        let id: PlanNodeId = "17".parse().expect("parse");
        assert_eq!(id, PlanNodeId::new(17));
        assert_eq!(id.to_string(), "17");
    }
}
