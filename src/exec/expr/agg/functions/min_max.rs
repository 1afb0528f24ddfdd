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

// Layout: [value: 8 bytes][has_value: 1 byte]
const HAS_VALUE_OFFSET: usize = 8;

pub(super) struct MinMaxAgg {
    pub(super) is_max: bool,
}

impl MinMaxAgg {
    fn name(&self) -> &'static str {
        if self.is_max { "max" } else { "min" }
    }

    fn replaces_i64(&self, current: i64, candidate: i64) -> bool {
        if self.is_max {
            candidate > current
        } else {
            candidate < current
        }
    }

    fn replaces_f64(&self, current: f64, candidate: f64) -> bool {
        if self.is_max {
            candidate.total_cmp(&current).is_gt()
        } else {
            candidate.total_cmp(&current).is_lt()
        }
    }
}

impl AggregateFunction for MinMaxAgg {
    fn build_spec_from_type(
        &self,
        _func: &AggFunction,
        input_type: Option<&DataType>,
    ) -> Result<AggSpec, String> {
        let data_type =
            input_type.ok_or_else(|| format!("{} requires one argument", self.name()))?;
        let (kind, value_type) = match (numeric_class(data_type), self.is_max) {
            (Some(NumericClass::Int), false) => (AggKind::MinInt, DataType::Int64),
            (Some(NumericClass::Int), true) => (AggKind::MaxInt, DataType::Int64),
            (Some(NumericClass::Float), false) => (AggKind::MinFloat, DataType::Float64),
            (Some(NumericClass::Float), true) => (AggKind::MaxFloat, DataType::Float64),
            (None, _) => {
                return Err(format!(
                    "unsupported {} input type: {:?}",
                    self.name(),
                    data_type
                ));
            }
        };
        Ok(AggSpec {
            kind,
            output_type: value_type.clone(),
            intermediate_type: value_type.clone(),
            input_cast: Some(value_type),
            count_all: false,
        })
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
            .ok_or_else(|| format!("{} input missing", self.name()))?;
        match spec.kind {
            AggKind::MinInt | AggKind::MaxInt => Ok(AggInputView::Int(int_view(arr)?)),
            _ => Ok(AggInputView::Float(float_view(arr)?)),
        }
    }

    fn build_merge_view<'a>(
        &self,
        spec: &AggSpec,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
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
                check_rows(self.name(), arr.len(), state_ptrs.len())?;
                for (row, &base) in state_ptrs.iter().enumerate() {
                    if !arr.is_valid(row) {
                        continue;
                    }
                    let at = base + offset;
                    let v = arr.value(row);
                    if !arena.read_flag(at + HAS_VALUE_OFFSET)?
                        || self.replaces_i64(arena.read_i64(at)?, v)
                    {
                        arena.write_i64(at, v)?;
                        arena.write_flag(at + HAS_VALUE_OFFSET, true)?;
                    }
                }
                Ok(())
            }
            AggInputView::Float(arr) => {
                check_rows(self.name(), arr.len(), state_ptrs.len())?;
                for (row, &base) in state_ptrs.iter().enumerate() {
                    if !arr.is_valid(row) {
                        continue;
                    }
                    let at = base + offset;
                    let v = arr.value(row);
                    if !arena.read_flag(at + HAS_VALUE_OFFSET)?
                        || self.replaces_f64(arena.read_f64(at)?, v)
                    {
                        arena.write_f64(at, v)?;
                        arena.write_flag(at + HAS_VALUE_OFFSET, true)?;
                    }
                }
                Ok(())
            }
            _ => Err(format!("{} batch input type mismatch", self.name())),
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
        let int_kind = matches!(spec.kind, AggKind::MinInt | AggKind::MaxInt);
        if int_kind {
            let mut values = Vec::with_capacity(group_states.len());
            for &base in group_states {
                let at = base + offset;
                values.push(if arena.read_flag(at + HAS_VALUE_OFFSET)? {
                    Some(arena.read_i64(at)?)
                } else {
                    None
                });
            }
            return Ok(Arc::new(Int64Array::from(values)));
        }
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
