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

use serde::{Deserialize, Serialize};

/// Wire status code, shared by RPC replies, backend reports, and the query
/// status itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    Cancelled,
    PlanInvalid,
    HostAssignmentFailed,
    LaunchRpcFailed,
    RemoteExecFailed,
    LocalExecFailed,
    FinalizeFailed,
    InternalError,
}

/// Status value carried across the coordinator boundary.
///
/// The first message in `error_msgs` is the primary error; later entries are
/// detail lines appended while the status travels.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Status {
    code: StatusCode,
    error_msgs: Vec<String>,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            error_msgs: Vec::new(),
        }
    }

    pub fn new(code: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            error_msgs: vec![msg.into()],
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::Cancelled, msg)
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::InternalError, msg)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == StatusCode::Cancelled
    }

    pub fn code(&self) -> StatusCode {
        self.code
    }

    pub fn error_msgs(&self) -> &[String] {
        &self.error_msgs
    }

    pub fn add_error_msg(&mut self, msg: impl Into<String>) {
        self.error_msgs.push(msg.into());
    }

    /// Primary error message, empty for OK.
    pub fn message(&self) -> &str {
        self.error_msgs.first().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "OK");
        }
        write!(f, "{:?}: {}", self.code, self.error_msgs.join("; "))
    }
}
