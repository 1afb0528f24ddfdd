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
use arrow::array::{Array, ArrayRef, Float64Array, Int64Array, StructArray};

use super::AggKernelEntry;

/// Typed borrow of one aggregate input column.
pub enum AggInputView<'a> {
    None,
    Any(&'a ArrayRef),
    Int(&'a Int64Array),
    Float(&'a Float64Array),
    AvgState(AvgStateView<'a>),
}

pub struct AvgStateView<'a> {
    pub(crate) states: &'a StructArray,
    pub(crate) sums: &'a Float64Array,
    pub(crate) counts: &'a Int64Array,
}

impl<'a> AvgStateView<'a> {
    pub(crate) fn new(array: &'a ArrayRef) -> Result<Self, String> {
        let states = array
            .as_any()
            .downcast_ref::<StructArray>()
            .ok_or_else(|| "avg state must be a struct column".to_string())?;
        if states.num_columns() != 2 {
            return Err(format!(
                "avg state expects 2 fields, got {}",
                states.num_columns()
            ));
        }
        let sums = states
            .column(0)
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| "avg state sum must be Float64".to_string())?;
        let counts = states
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| "avg state count must be Int64".to_string())?;
        Ok(Self {
            states,
            sums,
            counts,
        })
    }

    pub(crate) fn value_at(&self, row: usize) -> Option<(f64, i64)> {
        if self.states.is_null(row) || self.sums.is_null(row) || self.counts.is_null(row) {
            return None;
        }
        Some((self.sums.value(row), self.counts.value(row)))
    }
}

pub(crate) fn int_view(array: &ArrayRef) -> Result<&Int64Array, String> {
    array
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| format!("expected Int64 aggregate input, got {:?}", array.data_type()))
}

pub(crate) fn float_view(array: &ArrayRef) -> Result<&Float64Array, String> {
    array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| format!("expected Float64 aggregate input, got {:?}", array.data_type()))
}

pub fn build_agg_input_views_from_kernels<'a>(
    kernels: &[AggKernelEntry],
    arrays: &'a [Option<ArrayRef>],
) -> Result<Vec<AggInputView<'a>>, String> {
    let mut views = Vec::with_capacity(kernels.len());
    for (idx, kernel) in kernels.iter().enumerate() {
        let array = arrays
            .get(idx)
            .ok_or_else(|| "aggregate input missing".to_string())?;
        views.push(kernel.build_input_view(array)?);
    }
    Ok(views)
}

pub fn build_agg_merge_views_from_kernels<'a>(
    kernels: &[AggKernelEntry],
    arrays: &'a [Option<ArrayRef>],
) -> Result<Vec<AggInputView<'a>>, String> {
    let mut views = Vec::with_capacity(kernels.len());
    for (idx, kernel) in kernels.iter().enumerate() {
        let array = arrays
            .get(idx)
            .ok_or_else(|| "aggregate input missing".to_string())?;
        views.push(kernel.build_merge_view(array)?);
    }
    Ok(views)
}
