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

use arrow::array::{Array, ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::DataType;

use super::super::spec::{NumericClass, numeric_class};
use super::super::views::{float_view, int_view};
use super::super::*;
use super::{AggKind, AggregateFunction, check_rows};

// Layout: [sum: 8 bytes][has_value: 1 byte]
const HAS_VALUE_OFFSET: usize = 8;

pub(super) struct SumAgg;

impl AggregateFunction for SumAgg {
    fn build_spec_from_type(
        &self,
        _func: &AggFunction,
        input_type: Option<&DataType>,
    ) -> Result<AggSpec, String> {
        let data_type = input_type.ok_or_else(|| "sum requires one argument".to_string())?;
        match numeric_class(data_type) {
            Some(NumericClass::Int) => Ok(AggSpec {
                kind: AggKind::SumInt,
                output_type: DataType::Int64,
                intermediate_type: DataType::Int64,
                input_cast: Some(DataType::Int64),
                count_all: false,
            }),
            Some(NumericClass::Float) => Ok(AggSpec {
                kind: AggKind::SumFloat,
                output_type: DataType::Float64,
                intermediate_type: DataType::Float64,
                input_cast: Some(DataType::Float64),
                count_all: false,
            }),
            None => Err(format!("unsupported sum input type: {:?}", data_type)),
        }
    }

    fn state_layout_for(&self, _kind: &AggKind) -> (usize, usize) {
        (16, 8)
    }

    fn build_input_view<'a>(
        &self,
        spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        let arr = array
            .as_ref()
            .ok_or_else(|| "sum input missing".to_string())?;
        match spec.kind {
            AggKind::SumInt => Ok(AggInputView::Int(int_view(arr)?)),
            _ => Ok(AggInputView::Float(float_view(arr)?)),
        }
    }

    fn build_merge_view<'a>(
        &self,
        spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        // Partial sums share the input representation.
        self.build_input_view(spec, array)
    }

    fn init_state(
        &self,
        _spec: &AggSpec,
        arena: &mut AggStateArena,
        at: AggStatePtr,
    ) -> Result<(), String> {
        arena.write_i64(at, 0)?;
        arena.write_flag(at + HAS_VALUE_OFFSET, false)
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
            AggInputView::Int(arr) => {
                check_rows("sum", arr.len(), state_ptrs.len())?;
                for (row, &base) in state_ptrs.iter().enumerate() {
                    if arr.is_valid(row) {
                        let at = base + offset;
                        let sum = arena.read_i64(at)?.wrapping_add(arr.value(row));
                        arena.write_i64(at, sum)?;
                        arena.write_flag(at + HAS_VALUE_OFFSET, true)?;
                    }
                }
                Ok(())
            }
            AggInputView::Float(arr) => {
                check_rows("sum", arr.len(), state_ptrs.len())?;
                for (row, &base) in state_ptrs.iter().enumerate() {
                    if arr.is_valid(row) {
                        let at = base + offset;
                        let sum = arena.read_f64(at)? + arr.value(row);
                        arena.write_f64(at, sum)?;
                        arena.write_flag(at + HAS_VALUE_OFFSET, true)?;
                    }
                }
                Ok(())
            }
            _ => Err("sum batch input type mismatch".to_string()),
        }
    }

    fn merge_batch(
        &self,
        spec: &AggSpec,
        arena: &mut AggStateArena,
        offset: usize,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String> {
        // A null partial sum carries no value, so merging is the same fold.
        self.update_batch(spec, arena, offset, state_ptrs, input)
    }

    fn build_array(
        &self,
        spec: &AggSpec,
        arena: &AggStateArena,
        offset: usize,
        group_states: &[AggStatePtr],
        _output_intermediate: bool,
    ) -> Result<ArrayRef, String> {
        match spec.kind {
            AggKind::SumInt => {
                let mut values = Vec::with_capacity(group_states.len());
                for &base in group_states {
                    let at = base + offset;
                    values.push(if arena.read_flag(at + HAS_VALUE_OFFSET)? {
                        Some(arena.read_i64(at)?)
                    } else {
                        None
                    });
                }
                Ok(Arc::new(Int64Array::from(values)))
            }
            _ => {
                let mut values = Vec::with_capacity(group_states.len());
                for &base in group_states {
                    let at = base + offset;
                    values.push(if arena.read_flag(at + HAS_VALUE_OFFSET)? {
                        Some(arena.read_f64(at)?)
                    } else {
                        None
                    });
                }
                Ok(Arc::new(Float64Array::from(values)))
            }
        }
    }
}
