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
//! Core operator traits and blocking semantics.
//!
//! Responsibilities:
//! - Defines the sink execution contract a driver pushes chunks through.
//! - Expresses suspension as a blocked reason the scheduler polls, never a blocking call.
//!
//! Key exported interfaces:
//! - Types: `BlockedReason`, `SourceState`, `Operator`, `SinkOperator`.

use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::dependency::DependencyHandle;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::OperatorProfiles;
use crate::runtime::runtime_state::RuntimeState;

/// Why a driver cannot make progress right now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockedReason {
    /// Upstream currently has no data available.
    InputEmpty,
    /// Downstream cannot accept more output at the moment.
    OutputFull,
    /// Blocked on a dependency object.
    Dependency(DependencyHandle),
}

/// Whether the upstream source has more chunks after the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    DependOnSource,
    Finished,
}

impl SourceState {
    pub fn is_eos(self) -> bool {
        self == SourceState::Finished
    }
}

pub trait Operator: Send {
    fn name(&self) -> &str;

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        let _ = tracker;
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        let _ = profiles;
    }

    fn prepare(&mut self) -> Result<(), String> {
        Ok(())
    }

    fn close(&mut self, state: &RuntimeState) -> Result<(), String> {
        let _ = state;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        false
    }

    fn as_sink_mut(&mut self) -> Option<&mut dyn SinkOperator> {
        None
    }
}

/// Operators that consume chunks and emit nothing downstream in-pipeline.
pub trait SinkOperator: Operator {
    fn need_input(&self) -> bool;

    fn push_chunk(&mut self, state: &RuntimeState, chunk: Chunk) -> Result<(), String>;

    fn set_finishing(&mut self, state: &RuntimeState) -> Result<(), String>;

    /// Gate the scheduler polls before pushing more input.
    fn sink_dependency(&self) -> Option<DependencyHandle> {
        None
    }

    fn blocked_reason(&self) -> Option<BlockedReason> {
        match self.sink_dependency() {
            Some(dep) if !dep.is_ready() => Some(BlockedReason::Dependency(dep)),
            _ => None,
        }
    }
}
