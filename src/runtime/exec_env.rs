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

use crate::common::types::NetworkAddress;
use crate::runtime::executor::LocalExecEngine;
use crate::schedule::membership::ClusterMembership;
use crate::service::backend_client::BackendClient;

/// Process-wide execution environment handed to every coordinator at
/// construction: the backend RPC client, cluster membership, the local
/// fragment engine, and this process's own callback address.
pub struct ExecEnv {
    backend_client: Arc<dyn BackendClient>,
    membership: Arc<dyn ClusterMembership>,
    local_engine: Arc<dyn LocalExecEngine>,
    backend_address: NetworkAddress,
}

impl ExecEnv {
    pub fn new(
        backend_client: Arc<dyn BackendClient>,
        membership: Arc<dyn ClusterMembership>,
        local_engine: Arc<dyn LocalExecEngine>,
        backend_address: NetworkAddress,
    ) -> Self {
        Self {
            backend_client,
            membership,
            local_engine,
            backend_address,
        }
    }

    pub fn backend_client(&self) -> &dyn BackendClient {
        self.backend_client.as_ref()
    }

    pub fn membership(&self) -> &dyn ClusterMembership {
        self.membership.as_ref()
    }

    pub fn local_engine(&self) -> &dyn LocalExecEngine {
        self.local_engine.as_ref()
    }

    /// Address remote instances report back to.
    pub fn backend_address(&self) -> &NetworkAddress {
        &self.backend_address
    }
}
