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

use arrow::array::{Array, ArrayRef, Int64Array};
use arrow::datatypes::DataType;

use super::super::views::int_view;
use super::super::*;
use super::{AggKind, AggregateFunction, check_rows};

pub(super) struct CountAgg;

impl AggregateFunction for CountAgg {
    fn build_spec_from_type(
        &self,
        func: &AggFunction,
        input_type: Option<&DataType>,
    ) -> Result<AggSpec, String> {
        Ok(AggSpec {
            kind: AggKind::Count,
            output_type: DataType::Int64,
            intermediate_type: DataType::Int64,
            input_cast: None,
            count_all: input_type.is_none() && !func.input_is_intermediate,
        })
    }

    fn state_layout_for(&self, _kind: &AggKind) -> (usize, usize) {
        (std::mem::size_of::<i64>(), std::mem::align_of::<i64>())
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        if spec.count_all {
            return Ok(AggInputView::None);
        }
        let arr = array
            .as_ref()
            .ok_or_else(|| "count input missing".to_string())?;
        Ok(AggInputView::Any(arr))
    }

    fn build_merge_view<'a>(
        &self,
        _spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        let arr = array
            .as_ref()
            .ok_or_else(|| "count merge input missing".to_string())?;
        Ok(AggInputView::Int(int_view(arr)?))
    }

    fn init_state(
        &self,
        _spec: &AggSpec,
        arena: &mut AggStateArena,
        at: AggStatePtr,
    ) -> Result<(), String> {
        arena.write_i64(at, 0)
    }

    fn update_batch(
        &self,
        _spec: &AggSpec,
        arena: &mut AggStateArena,
        offset: usize,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String> {
        match input {
            AggInputView::None => {
                for &base in state_ptrs {
                    let at = base + offset;
                    arena.write_i64(at, arena.read_i64(at)? + 1)?;
                }
                Ok(())
            }
            AggInputView::Any(array) => {
                check_rows("count", array.len(), state_ptrs.len())?;
                for (row, &base) in state_ptrs.iter().enumerate() {
                    if array.is_valid(row) {
                        let at = base + offset;
                        arena.write_i64(at, arena.read_i64(at)? + 1)?;
                    }
                }
                Ok(())
            }
            _ => Err("count batch input type mismatch".to_string()),
        }
    }

    fn merge_batch(
        &self,
        _spec: &AggSpec,
        arena: &mut AggStateArena,
        offset: usize,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String> {
        let AggInputView::Int(arr) = input else {
            return Err("count merge input type mismatch".to_string());
        };
        check_rows("count", arr.len(), state_ptrs.len())?;
        for (row, &base) in state_ptrs.iter().enumerate() {
            if arr.is_valid(row) {
                let at = base + offset;
                arena.write_i64(at, arena.read_i64(at)? + arr.value(row))?;
            }
        }
        Ok(())
    }

    fn build_array(
        &self,
        _spec: &AggSpec,
        arena: &AggStateArena,
        offset: usize,
        group_states: &[AggStatePtr],
        _output_intermediate: bool,
    ) -> Result<ArrayRef, String> {
        let values = group_states
            .iter()
            .map(|&base| arena.read_i64(base + offset))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Arc::new(Int64Array::from(values)))
    }
}
