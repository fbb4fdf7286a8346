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
use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use crate::common::status::Status;
use crate::runtime::profile::RuntimeProfile;
use crate::service::backend_client::{ExecPlanFragmentParams, InsertExecStatus};

/// In-process execution of the coordinator fragment.
///
/// The engine behind this trait is the same one the backends run; the
/// coordinator only drives its lifecycle: `prepare` then `open`, `get_next`
/// until `None`, `cancel` at any point from any thread. Implementations
/// synchronize internally.
pub trait FragmentExecutor: Send + Sync {
    fn prepare(&self) -> Result<(), Status>;

    /// Starts execution. For fragments that produce no rows (the DML side
    /// of an INSERT) this runs the whole pipeline.
    fn open(&self) -> Result<(), Status>;

    /// Next batch, `None` once the fragment is drained. Blocks while rows
    /// are in flight. Single consumer.
    fn get_next(&self) -> Result<Option<RecordBatch>, Status>;

    /// Asks the fragment to stop; must unblock a concurrent `get_next`.
    fn cancel(&self);

    fn profile(&self) -> RuntimeProfile;

    /// INSERT side effects accumulated by this fragment, if any. Read once
    /// at finalization.
    fn insert_exec_status(&self) -> Option<InsertExecStatus>;
}

/// Factory for in-process fragment executors; the third narrow capability
/// next to the RPC transport and cluster membership.
pub trait LocalExecEngine: Send + Sync {
    fn create_executor(
        &self,
        params: &ExecPlanFragmentParams,
    ) -> Result<Arc<dyn FragmentExecutor>, Status>;
}
