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

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StructArray};
use arrow::datatypes::{DataType, Field, Fields};

use super::super::spec::numeric_class;
use super::super::views::{AvgStateView, float_view};
use super::super::*;
use super::{AggKind, AggregateFunction, check_rows};

// Layout: [sum: f64][count: i64]
const COUNT_OFFSET: usize = 8;

pub(super) struct AvgAgg;

pub(in crate::exec::expr::agg) fn avg_state_fields() -> Fields {
    Fields::from(vec![
        Field::new("sum", DataType::Float64, false),
        Field::new("count", DataType::Int64, false),
    ])
}

impl AggregateFunction for AvgAgg {
    fn build_spec_from_type(
        &self,
        func: &AggFunction,
        input_type: Option<&DataType>,
    ) -> Result<AggSpec, String> {
        let data_type = input_type.ok_or_else(|| "avg requires one argument".to_string())?;
        if !func.input_is_intermediate && numeric_class(data_type).is_none() {
            return Err(format!("unsupported avg input type: {:?}", data_type));
        }
        Ok(AggSpec {
            kind: AggKind::Avg,
            output_type: DataType::Float64,
            intermediate_type: DataType::Struct(avg_state_fields()),
            input_cast: Some(DataType::Float64),
            count_all: false,
        })
    }

    fn state_layout_for(&self, _kind: &AggKind) -> (usize, usize) {
        (16, 8)
    }

    fn build_input_view<'a>(
        &self,
        _spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        let arr = array
            .as_ref()
            .ok_or_else(|| "avg input missing".to_string())?;
        Ok(AggInputView::Float(float_view(arr)?))
    }

    fn build_merge_view<'a>(
        &self,
        _spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        let arr = array
            .as_ref()
            .ok_or_else(|| "avg merge input missing".to_string())?;
        Ok(AggInputView::AvgState(AvgStateView::new(arr)?))
    }

    fn init_state(
        &self,
        _spec: &AggSpec,
        arena: &mut AggStateArena,
        at: AggStatePtr,
    ) -> Result<(), String> {
        arena.write_f64(at, 0.0)?;
        arena.write_i64(at + COUNT_OFFSET, 0)
    }

    fn update_batch(
        &self,
        _spec: &AggSpec,
        arena: &mut AggStateArena,
        offset: usize,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String> {
        let AggInputView::Float(arr) = input else {
            return Err("avg batch input type mismatch".to_string());
        };
        check_rows("avg", arr.len(), state_ptrs.len())?;
        for (row, &base) in state_ptrs.iter().enumerate() {
            if arr.is_valid(row) {
                let at = base + offset;
                arena.write_f64(at, arena.read_f64(at)? + arr.value(row))?;
                let count = arena.read_i64(at + COUNT_OFFSET)?;
                arena.write_i64(at + COUNT_OFFSET, count + 1)?;
            }
        }
        Ok(())
    }

    fn merge_batch(
        &self,
        _spec: &AggSpec,
        arena: &mut AggStateArena,
        offset: usize,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String> {
        let AggInputView::AvgState(view) = input else {
            return Err("avg merge input type mismatch".to_string());
        };
        check_rows("avg", view.states.len(), state_ptrs.len())?;
        for (row, &base) in state_ptrs.iter().enumerate() {
            let Some((sum, count)) = view.value_at(row) else {
                continue;
            };
            let at = base + offset;
            arena.write_f64(at, arena.read_f64(at)? + sum)?;
            let current = arena.read_i64(at + COUNT_OFFSET)?;
            arena.write_i64(at + COUNT_OFFSET, current + count)?;
        }
        Ok(())
    }

    fn build_array(
        &self,
        _spec: &AggSpec,
        arena: &AggStateArena,
        offset: usize,
        group_states: &[AggStatePtr],
        output_intermediate: bool,
    ) -> Result<ArrayRef, String> {
        let mut sums = Vec::with_capacity(group_states.len());
        let mut counts = Vec::with_capacity(group_states.len());
        for &base in group_states {
            let at = base + offset;
            sums.push(arena.read_f64(at)?);
            counts.push(arena.read_i64(at + COUNT_OFFSET)?);
        }
        if output_intermediate {
            let columns: Vec<ArrayRef> = vec![
                Arc::new(Float64Array::from(sums)),
                Arc::new(Int64Array::from(counts)),
            ];
            let states = StructArray::try_new(avg_state_fields(), columns, None)
                .map_err(|e| format!("build avg state column: {e}"))?;
            return Ok(Arc::new(states));
        }
        let values: Vec<Option<f64>> = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| (count > 0).then(|| sum / count as f64))
            .collect();
        Ok(Arc::new(Float64Array::from(values)))
    }
}
