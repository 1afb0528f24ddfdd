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
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field};

use super::functions;
use super::spec::build_spec_from_type;
use super::*;

#[derive(Clone, Debug)]
pub struct AggStateDesc {
    pub offset: usize,
    pub size: usize,
    pub align: usize,
}

/// Byte layout of one state row: every function's blob at its aligned offset.
#[derive(Clone, Debug)]
pub struct AggStateLayout {
    pub total_size: usize,
    pub align: usize,
    pub descs: Vec<AggStateDesc>,
}

#[derive(Clone, Debug)]
pub struct AggKernelEntry {
    pub(super) spec: AggSpec,
    pub(super) state: AggStateDesc,
}

#[derive(Clone, Debug)]
pub struct AggKernelSet {
    pub entries: Vec<AggKernelEntry>,
    pub layout: AggStateLayout,
}

pub fn build_kernel_set(
    functions: &[AggFunction],
    input_types: &[Option<DataType>],
) -> Result<AggKernelSet, String> {
    if input_types.len() != functions.len() {
        return Err(format!(
            "aggregate input type length mismatch: functions={} types={}",
            functions.len(),
            input_types.len()
        ));
    }

    let mut entries = Vec::with_capacity(functions.len());
    let mut descs = Vec::with_capacity(functions.len());
    let mut offset = 0usize;
    let mut row_align = 1usize;

    for (func, input_type) in functions.iter().zip(input_types.iter()) {
        let spec = build_spec_from_type(func, input_type.as_ref())?;
        let (size, align) = functions::state_layout_for_kind(&spec.kind);
        let align_mask = align.saturating_sub(1);
        offset = (offset + align_mask) & !align_mask;
        let state = AggStateDesc {
            offset,
            size,
            align,
        };
        offset += size;
        row_align = row_align.max(align);
        descs.push(state.clone());
        entries.push(AggKernelEntry { spec, state });
    }

    Ok(AggKernelSet {
        entries,
        layout: AggStateLayout {
            total_size: offset.max(1),
            align: row_align,
            descs,
        },
    })
}

impl AggKernelSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Allocate one state row and run every function's `create` on it.
    pub fn create_state_row(&self, arena: &mut AggStateArena) -> Result<AggStatePtr, String> {
        let base = arena.alloc(self.layout.total_size, self.layout.align);
        for entry in &self.entries {
            entry.init_state(arena, base)?;
        }
        Ok(base)
    }

    /// Run every function's `destroy` on the given rows. Memory stays with the arena.
    pub fn destroy_state_rows(&self, arena: &mut AggStateArena, rows: &[AggStatePtr]) {
        for &base in rows {
            for entry in &self.entries {
                entry.drop_state(arena, base);
            }
        }
    }

    pub fn output_fields(&self, names: &[String], output_intermediate: bool) -> Vec<Field> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let name = names
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| format!("agg_{idx}"));
                Field::new(name, entry.output_type(output_intermediate), true)
            })
            .collect()
    }
}

impl AggKernelEntry {
    /// Cast a raw input column to the representation the function updates from.
    pub fn prepare_input(&self, array: Option<ArrayRef>) -> Result<Option<ArrayRef>, String> {
        let (Some(array), Some(target)) = (array.as_ref(), self.spec.input_cast.as_ref()) else {
            return Ok(array);
        };
        if array.data_type() == target {
            return Ok(Some(array.clone()));
        }
        cast(array, target).map(Some).map_err(|e| {
            format!(
                "aggregate input cast failed from {:?} to {:?}: {}",
                array.data_type(),
                target,
                e
            )
        })
    }

    pub fn build_input_view<'a>(
        &self,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        functions::build_input_view(&self.spec, array)
    }

    pub fn build_merge_view<'a>(
        &self,
        array: &'a Option<ArrayRef>,
    ) -> Result<AggInputView<'a>, String> {
        functions::build_merge_view(&self.spec, array)
    }

    pub fn output_type(&self, output_intermediate: bool) -> DataType {
        if output_intermediate {
            self.spec.intermediate_type.clone()
        } else {
            self.spec.output_type.clone()
        }
    }

    pub fn serialized_type(&self) -> DataType {
        self.spec.intermediate_type.clone()
    }

    pub fn count_all(&self) -> bool {
        self.spec.count_all
    }

    pub fn state_desc(&self) -> &AggStateDesc {
        &self.state
    }

    pub fn init_state(&self, arena: &mut AggStateArena, base: AggStatePtr) -> Result<(), String> {
        functions::init_state(&self.spec, arena, base + self.state.offset)
    }

    pub fn drop_state(&self, arena: &mut AggStateArena, base: AggStatePtr) {
        functions::drop_state(&self.spec, arena, base + self.state.offset);
    }

    pub fn update_batch(
        &self,
        arena: &mut AggStateArena,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String> {
        functions::update_batch(&self.spec, arena, self.state.offset, state_ptrs, input)
    }

    pub fn merge_batch(
        &self,
        arena: &mut AggStateArena,
        state_ptrs: &[AggStatePtr],
        input: &AggInputView,
    ) -> Result<(), String> {
        functions::merge_batch(&self.spec, arena, self.state.offset, state_ptrs, input)
    }

    /// Serialize (intermediate) or finalize the given rows into one column.
    pub fn build_array(
        &self,
        arena: &AggStateArena,
        group_states: &[AggStatePtr],
        output_intermediate: bool,
    ) -> Result<ArrayRef, String> {
        functions::build_array(
            &self.spec,
            arena,
            self.state.offset,
            group_states,
            output_intermediate,
        )
    }
}
