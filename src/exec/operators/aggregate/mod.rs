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
//! Hash-aggregation sink with partitioned spill.
//!
//! Responsibilities:
//! - Folds input chunks into a per-driver hash table of aggregate states.
//! - Spills the table in hash partitions when it outgrows its memory budget.
//! - Hands results to the reader side through a shared state and, when streaming,
//!   a bounded queue gated by a readiness dependency.
//!
//! Key exported interfaces:
//! - Types: `AggSinkOperatorFactory`, `AggSinkOperatorX`, `AggSinkOperator`,
//!   `AggSinkPlan`, `AggSinkOptions`, `AggSharedState`, `AggSpillRestorer`.
//!
//! Current limitations:
//! - The reader side is left to callers: `AggSharedState::build_output_chunk`,
//!   `DataQueue::pop` and `AggSpillRestorer` are the entry points.

pub mod data_queue;
pub mod shared_state;
pub mod sink_dependency;
pub mod sink_local_state;
pub mod sink_operator;
pub mod spill_restore;

pub use data_queue::DataQueue;
pub use shared_state::{AggSharedState, AggSpillContext};
pub use sink_dependency::AggSinkDependency;
pub use sink_local_state::AggSinkLocalState;
pub use sink_operator::{
    AggExecutor, AggSinkOperator, AggSinkOperatorFactory, AggSinkOperatorX, AggSinkOptions,
    AggSinkPlan,
};
pub use spill_restore::AggSpillRestorer;
