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
use arrow::array::ArrayRef;
use arrow::datatypes::DataType;

use super::{AggFunction, AggInputView, AggSpec, AggStateArena, AggStatePtr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(in crate::exec::expr::agg) enum AggKind {
    Count,
    SumInt,
    SumFloat,
    MinInt,
    MaxInt,
    MinFloat,
    MaxFloat,
    Avg,
}

mod avg;
mod count;
mod min_max;
mod sum;

use avg::AvgAgg;
use count::CountAgg;
use min_max::MinMaxAgg;
use sum::SumAgg;

pub(super) trait AggregateFunction {
    fn build_spec_from_type(
        &self,
        func: &AggFunction,
        input_type: Option<&DataType>,
    ) -> Result<AggSpec, String>;

    /// (size, align) of one state blob.
    fn state_layout_for(&self, kind: &AggKind) -> (usize, usize);

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String>;

    fn build_merge_view<'a>(
        &self,
        spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String>;

    fn init_state(
        &self,
        spec: &AggSpec,
        arena: &mut AggStateArena,
        at: AggStatePtr,
    ) -> Result<(), String>;

    /// Fixed-size states own nothing outside the arena.
    fn drop_state(&self, _spec: &AggSpec, _arena: &mut AggStateArena, _at: AggStatePtr) {}

    fn update_batch(
        &self,
        spec: &AggSpec,
        arena: &mut AggStateArena,
        offset: usize,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String>;

    fn merge_batch(
        &self,
        spec: &AggSpec,
        arena: &mut AggStateArena,
        offset: usize,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String>;

    fn build_array(
        &self,
        spec: &AggSpec,
        arena: &AggStateArena,
        offset: usize,
        group_states: &[AggStatePtr],
        output_intermediate: bool,
    ) -> Result<ArrayRef, String>;
}

static COUNT: CountAgg = CountAgg;
static SUM: SumAgg = SumAgg;
static MIN: MinMaxAgg = MinMaxAgg { is_max: false };
static MAX: MinMaxAgg = MinMaxAgg { is_max: true };
static AVG: AvgAgg = AvgAgg;

fn resolve_by_func(func: &AggFunction) -> Result<&'static dyn AggregateFunction, String> {
    match func.name.to_ascii_lowercase().as_str() {
        "count" => Ok(&COUNT),
        "sum" => Ok(&SUM),
        "min" => Ok(&MIN),
        "max" => Ok(&MAX),
        "avg" => Ok(&AVG),
        other => Err(format!("unsupported agg function: {}", other)),
    }
}

fn resolve_by_kind(kind: &AggKind) -> &'static dyn AggregateFunction {
    match kind {
        AggKind::Count => &COUNT,
        AggKind::SumInt | AggKind::SumFloat => &SUM,
        AggKind::MinInt | AggKind::MinFloat => &MIN,
        AggKind::MaxInt | AggKind::MaxFloat => &MAX,
        AggKind::Avg => &AVG,
    }
}

pub(super) fn build_spec_from_type(
    func: &AggFunction,
    input_type: Option<&DataType>,
) -> Result<AggSpec, String> {
    resolve_by_func(func)?.build_spec_from_type(func, input_type)
}

pub(super) fn state_layout_for_kind(kind: &AggKind) -> (usize, usize) {
    resolve_by_kind(kind).state_layout_for(kind)
}

pub(super) fn build_input_view<'a>(
    spec: &AggSpec,
    array: &'a Option<ArrayRef>,
) -> Result<AggInputView<'a>, String> {
    resolve_by_kind(&spec.kind).build_input_view(spec, array)
}

pub(super) fn build_merge_view<'a>(
    spec: &AggSpec,
    array: &'a Option<ArrayRef>,
) -> Result<AggInputView<'a>, String> {
    resolve_by_kind(&spec.kind).build_merge_view(spec, array)
}

pub(super) fn init_state(
    spec: &AggSpec,
    arena: &mut AggStateArena,
    at: AggStatePtr,
) -> Result<(), String> {
    resolve_by_kind(&spec.kind).init_state(spec, arena, at)
}

pub(super) fn drop_state(spec: &AggSpec, arena: &mut AggStateArena, at: AggStatePtr) {
    resolve_by_kind(&spec.kind).drop_state(spec, arena, at)
}

pub(super) fn update_batch(
    spec: &AggSpec,
    arena: &mut AggStateArena,
    offset: usize,
    state_ptrs: &[AggStatePtr],
    input: &AggInputView,
) -> Result<(), String> {
    resolve_by_kind(&spec.kind).update_batch(spec, arena, offset, state_ptrs, input)
}

pub(super) fn merge_batch(
    spec: &AggSpec,
    arena: &mut AggStateArena,
    offset: usize,
    state_ptrs: &[AggStatePtr],
    input: &AggInputView,
) -> Result<(), String> {
    resolve_by_kind(&spec.kind).merge_batch(spec, arena, offset, state_ptrs, input)
}

pub(super) fn build_array(
    spec: &AggSpec,
    arena: &AggStateArena,
    offset: usize,
    group_states: &[AggStatePtr],
    output_intermediate: bool,
) -> Result<ArrayRef, String> {
    resolve_by_kind(&spec.kind).build_array(spec, arena, offset, group_states, output_intermediate)
}

/// Shared input-length check for the per-function batch loops.
pub(super) fn check_rows(name: &str, rows: usize, states: usize) -> Result<(), String> {
    if rows != states {
        return Err(format!(
            "{} input rows {} do not match state pointers {}",
            name, rows, states
        ));
    }
    Ok(())
}
