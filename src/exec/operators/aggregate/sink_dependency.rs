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

use crate::exec::operators::aggregate::shared_state::AggSharedState;
use crate::exec::pipeline::dependency::{Dependency, DependencyHandle};

/// Readiness gate of an aggregation sink.
///
/// A blocking aggregation is always ready. A streaming one shares the gate its data
/// queue owns, which is only ever flipped under the queue lock.
#[derive(Debug)]
pub struct AggSinkDependency {
    shared: Arc<AggSharedState>,
    dependency: DependencyHandle,
}

impl AggSinkDependency {
    pub fn new(shared: Arc<AggSharedState>) -> Self {
        let dependency = match shared.data_queue() {
            Some(queue) => Arc::clone(queue.sink_dependency()),
            None => Dependency::new("agg_sink", true),
        };
        Self { shared, dependency }
    }

    /// Re-evaluate against the shared queue. Idempotent.
    pub fn refresh(&self) -> Result<(), String> {
        match self.shared.data_queue() {
            Some(queue) => queue.refresh(),
            None => {
                self.dependency.set_ready();
                Ok(())
            }
        }
    }

    /// Cached readiness; the queue keeps it current on every push and pop.
    pub fn is_ready(&self) -> bool {
        self.dependency.is_ready()
    }

    pub fn handle(&self) -> DependencyHandle {
        Arc::clone(&self.dependency)
    }
}
