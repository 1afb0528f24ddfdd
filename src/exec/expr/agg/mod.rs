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
//! Aggregate function kernels over arena-resident state rows.
//!
//! Responsibilities:
//! - Resolves aggregate calls to typed specs and lays their states out in one row.
//! - Runs batched create/update/merge/serialize/finalize over state-row offsets.
//!
//! Key exported interfaces:
//! - Types: `AggFunction`, `AggKernelSet`, `AggKernelEntry`, `AggStateArena`, `AggStatePtr`.
//! - Functions: `build_kernel_set`, `build_agg_input_views_from_kernels`,
//!   `build_agg_merge_views_from_kernels`.
//!
//! Current limitations:
//! - Only count/sum/min/max/avg over integer and floating-point inputs.

mod arena;
pub use arena::*;
mod views;
pub use views::*;
mod spec;
pub use spec::AggSpec;
mod kernel;
pub use kernel::*;
mod functions;

use crate::exec::expr::ExprId;

/// One aggregate call as planned.
#[derive(Clone, Debug)]
pub struct AggFunction {
    pub name: String,
    /// Zero (COUNT(*)) or one argument expression.
    pub inputs: Vec<ExprId>,
    /// Arguments are intermediate states from an earlier phase.
    pub input_is_intermediate: bool,
}

impl AggFunction {
    pub fn new(name: impl Into<String>, inputs: Vec<ExprId>) -> Self {
        Self {
            name: name.into(),
            inputs,
            input_is_intermediate: false,
        }
    }

    pub fn merging(name: impl Into<String>, input: ExprId) -> Self {
        Self {
            name: name.into(),
            inputs: vec![input],
            input_is_intermediate: true,
        }
    }
}
