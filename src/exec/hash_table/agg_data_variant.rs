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
//! Closed set of aggregation hash-table shapes.
//!
//! The arm is fixed when the aggregation is built. Each batch matches the arm once and
//! then runs the arm's monomorphized emplace loop, so there is no per-row dispatch.

use arrow::array::ArrayRef;
use arrow::datatypes::DataType;

use crate::exec::expr::agg::{AggKernelSet, AggStateArena, AggStatePtr};
use crate::exec::hash_table::SerializedGroups;
use crate::exec::hash_table::fixed_key_table::FixedKeyHashTable;
use crate::exec::hash_table::key_strategy::{GroupKeyStrategy, pick_group_key_strategy};
use crate::exec::hash_table::serialized_key_table::SerializedKeyHashTable;

pub enum AggregatedDataVariant {
    NoKey { place: Option<AggStatePtr> },
    OneNumber8(FixedKeyHashTable<u8>),
    OneNumber16(FixedKeyHashTable<u16>),
    OneNumber32(FixedKeyHashTable<u32>),
    OneNumber64(FixedKeyHashTable<u64>),
    OneNumber128(FixedKeyHashTable<i128>),
    Serialized(SerializedKeyHashTable),
}

impl AggregatedDataVariant {
    pub fn new(key_types: &[DataType]) -> Result<Self, String> {
        let strategy = pick_group_key_strategy(key_types)?;
        let variant = match strategy {
            GroupKeyStrategy::Scalar => Self::NoKey { place: None },
            GroupKeyStrategy::OneNumber(width) => {
                let data_type = key_types[0].clone();
                match width {
                    1 => Self::OneNumber8(FixedKeyHashTable::new(data_type)),
                    2 => Self::OneNumber16(FixedKeyHashTable::new(data_type)),
                    4 => Self::OneNumber32(FixedKeyHashTable::new(data_type)),
                    8 => Self::OneNumber64(FixedKeyHashTable::new(data_type)),
                    16 => Self::OneNumber128(FixedKeyHashTable::new(data_type)),
                    other => {
                        return Err(format!("unsupported fixed group key width {}", other));
                    }
                }
            }
            GroupKeyStrategy::Serialized => {
                Self::Serialized(SerializedKeyHashTable::new(key_types.to_vec())?)
            }
        };
        Ok(variant)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NoKey { .. } => "without_key",
            Self::OneNumber8(_) => "one_number_8",
            Self::OneNumber16(_) => "one_number_16",
            Self::OneNumber32(_) => "one_number_32",
            Self::OneNumber64(_) => "one_number_64",
            Self::OneNumber128(_) => "one_number_128",
            Self::Serialized(_) => "serialized",
        }
    }

    pub fn is_no_key(&self) -> bool {
        matches!(self, Self::NoKey { .. })
    }

    /// Resolve one state row per input row.
    ///
    /// `num_rows` is only consulted by the no-key arm, which maps every row to its
    /// single state row.
    pub fn emplace_batch<F>(
        &mut self,
        keys: &[ArrayRef],
        num_rows: usize,
        max_groups: Option<usize>,
        create: &mut F,
        places: &mut Vec<AggStatePtr>,
        misses: &mut Vec<u32>,
    ) -> Result<(), String>
    where
        F: FnMut() -> Result<AggStatePtr, String>,
    {
        fn single(keys: &[ArrayRef]) -> Result<&ArrayRef, String> {
            match keys {
                [key] => Ok(key),
                _ => Err(format!(
                    "single-key hash table got {} key columns",
                    keys.len()
                )),
            }
        }

        match self {
            Self::NoKey { place } => {
                if !keys.is_empty() {
                    return Err(format!(
                        "aggregation without group by got {} key columns",
                        keys.len()
                    ));
                }
                if num_rows == 0 {
                    return Ok(());
                }
                let state = match *place {
                    Some(state) => state,
                    None => {
                        let state = create()?;
                        *place = Some(state);
                        state
                    }
                };
                places.extend(std::iter::repeat_n(state, num_rows));
                Ok(())
            }
            Self::OneNumber8(t) => t.emplace_batch(single(keys)?, max_groups, create, places, misses),
            Self::OneNumber16(t) => {
                t.emplace_batch(single(keys)?, max_groups, create, places, misses)
            }
            Self::OneNumber32(t) => {
                t.emplace_batch(single(keys)?, max_groups, create, places, misses)
            }
            Self::OneNumber64(t) => {
                t.emplace_batch(single(keys)?, max_groups, create, places, misses)
            }
            Self::OneNumber128(t) => {
                t.emplace_batch(single(keys)?, max_groups, create, places, misses)
            }
            Self::Serialized(t) => t.emplace_batch(keys, max_groups, create, places, misses),
        }
    }

    /// Distinct groups currently held, including the null-key slot.
    pub fn size(&self) -> usize {
        match self {
            Self::NoKey { place } => usize::from(place.is_some()),
            Self::OneNumber8(t) => t.size(),
            Self::OneNumber16(t) => t.size(),
            Self::OneNumber32(t) => t.size(),
            Self::OneNumber64(t) => t.size(),
            Self::OneNumber128(t) => t.size(),
            Self::Serialized(t) => t.size(),
        }
    }

    pub fn has_null_key(&self) -> bool {
        match self {
            Self::NoKey { .. } => false,
            Self::Serialized(t) => t.has_null_key_data(),
            Self::OneNumber8(t) => t.has_null_key_data(),
            Self::OneNumber16(t) => t.has_null_key_data(),
            Self::OneNumber32(t) => t.has_null_key_data(),
            Self::OneNumber64(t) => t.has_null_key_data(),
            Self::OneNumber128(t) => t.has_null_key_data(),
        }
    }

    pub fn bucket_bytes(&self) -> usize {
        match self {
            Self::NoKey { .. } => 0,
            Self::OneNumber8(t) => t.bucket_bytes(),
            Self::OneNumber16(t) => t.bucket_bytes(),
            Self::OneNumber32(t) => t.bucket_bytes(),
            Self::OneNumber64(t) => t.bucket_bytes(),
            Self::OneNumber128(t) => t.bucket_bytes(),
            Self::Serialized(t) => t.bucket_bytes(),
        }
    }

    pub fn container_bytes(&self) -> usize {
        match self {
            Self::NoKey { .. } => 0,
            Self::OneNumber8(t) => t.container_bytes(),
            Self::OneNumber16(t) => t.container_bytes(),
            Self::OneNumber32(t) => t.container_bytes(),
            Self::OneNumber64(t) => t.container_bytes(),
            Self::OneNumber128(t) => t.container_bytes(),
            Self::Serialized(t) => t.container_bytes(),
        }
    }

    /// Bytes of serialized key storage. Zero for fixed-width keys.
    pub fn key_bytes(&self) -> usize {
        match self {
            Self::Serialized(t) => t.key_bytes(),
            _ => 0,
        }
    }

    /// Materialize every group in enumeration order.
    ///
    /// Not defined for the no-key arm, whose single row has no key columns.
    pub fn serialize_groups(&mut self) -> Result<SerializedGroups, String> {
        match self {
            Self::NoKey { place } => Ok(SerializedGroups {
                key_columns: Vec::new(),
                places: place.iter().copied().collect(),
                hashes: place.iter().map(|_| 0).collect(),
                has_null_key: false,
            }),
            Self::OneNumber8(t) => t.serialize_groups(),
            Self::OneNumber16(t) => t.serialize_groups(),
            Self::OneNumber32(t) => t.serialize_groups(),
            Self::OneNumber64(t) => t.serialize_groups(),
            Self::OneNumber128(t) => t.serialize_groups(),
            Self::Serialized(t) => t.serialize_groups(),
        }
    }

    pub fn places(&self) -> Vec<AggStatePtr> {
        match self {
            Self::NoKey { place } => place.iter().copied().collect(),
            Self::OneNumber8(t) => t.places(),
            Self::OneNumber16(t) => t.places(),
            Self::OneNumber32(t) => t.places(),
            Self::OneNumber64(t) => t.places(),
            Self::OneNumber128(t) => t.places(),
            Self::Serialized(t) => t.places(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::NoKey { place } => *place = None,
            Self::OneNumber8(t) => t.reset(),
            Self::OneNumber16(t) => t.reset(),
            Self::OneNumber32(t) => t.reset(),
            Self::OneNumber64(t) => t.reset(),
            Self::OneNumber128(t) => t.reset(),
            Self::Serialized(t) => t.reset(),
        }
    }
}

/// Hash table plus the arena that owns its state rows.
///
/// The two are reset together so no table entry outlives its arena generation.
pub struct AggregatedData {
    pub variant: AggregatedDataVariant,
    pub arena: AggStateArena,
}

impl AggregatedData {
    pub fn new(key_types: &[DataType], arena_block_size: usize) -> Result<Self, String> {
        Ok(Self {
            variant: AggregatedDataVariant::new(key_types)?,
            arena: AggStateArena::new(arena_block_size),
        })
    }

    /// Find or create state rows for a batch, allocating new rows through `kernels`.
    pub fn emplace(
        &mut self,
        kernels: &AggKernelSet,
        keys: &[ArrayRef],
        num_rows: usize,
        max_groups: Option<usize>,
        places: &mut Vec<AggStatePtr>,
        misses: &mut Vec<u32>,
    ) -> Result<(), String> {
        let Self { variant, arena } = self;
        let mut create = || kernels.create_state_row(arena);
        variant.emplace_batch(keys, num_rows, max_groups, &mut create, places, misses)
    }

    pub fn size(&self) -> usize {
        self.variant.size()
    }

    pub fn hash_table_bytes(&self) -> usize {
        self.variant.bucket_bytes() + self.variant.container_bytes()
    }

    /// Bucket array, container, arena and serialized-key storage bytes.
    pub fn memory_usage(&self) -> usize {
        self.hash_table_bytes() + self.arena.allocated_bytes() + self.variant.key_bytes()
    }

    /// Destroy every state, then free the table and the arena in bulk.
    pub fn reset(&mut self, kernels: &AggKernelSet) {
        let places = self.variant.places();
        kernels.destroy_state_rows(&mut self.arena, &places);
        self.variant.reset();
        self.arena.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::ExprId;
    use crate::exec::expr::agg::{AggFunction, build_kernel_set};
    use arrow::array::{Int64Array, StringArray};
    use std::sync::Arc;

    fn count_star() -> AggKernelSet {
        build_kernel_set(&[AggFunction::new("count", vec![])], &[None]).expect("kernels")
    }

    #[test]
    fn arm_follows_key_types() {
        let cases: Vec<(Vec<DataType>, &str)> = vec![
            (vec![], "without_key"),
            (vec![DataType::Int8], "one_number_8"),
            (vec![DataType::UInt16], "one_number_16"),
            (vec![DataType::Float32], "one_number_32"),
            (vec![DataType::Int64], "one_number_64"),
            (vec![DataType::Decimal128(10, 2)], "one_number_128"),
            (vec![DataType::Utf8], "serialized"),
            (vec![DataType::Int32, DataType::Int32], "serialized"),
        ];
        for (types, expected) in cases {
            let variant = AggregatedDataVariant::new(&types).expect("variant");
            assert_eq!(variant.name(), expected, "types={types:?}");
        }
        assert!(AggregatedDataVariant::new(&[DataType::Null]).is_err());
    }

    #[test]
    fn no_key_shares_one_row_across_batches() {
        let kernels = count_star();
        let mut data = AggregatedData::new(&[], 1024).expect("data");
        let mut places = Vec::new();
        let mut misses = Vec::new();
        for _ in 0..3 {
            data.emplace(&kernels, &[], 100, None, &mut places, &mut misses)
                .expect("emplace");
        }
        assert_eq!(places.len(), 300);
        assert!(places.iter().all(|p| *p == places[0]));
        assert_eq!(data.size(), 1);
        assert_eq!(data.arena.num_rows(), 1);
    }

    #[test]
    fn memory_usage_grows_then_resets() {
        let kernels = count_star();
        let mut data = AggregatedData::new(&[DataType::Utf8], 0).expect("data");
        let empty_usage = data.memory_usage();
        let keys: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec!["a", "b", "c"]))];
        let mut places = Vec::new();
        data.emplace(&kernels, &keys, 3, None, &mut places, &mut Vec::new())
            .expect("emplace");
        assert!(data.memory_usage() > empty_usage);
        assert!(data.variant.key_bytes() > 0);
        let generation = data.arena.generation();
        data.reset(&kernels);
        assert_eq!(data.size(), 0);
        assert_eq!(data.arena.generation(), generation + 1);
        assert!(data.arena.slice(places[2], 8).is_err());
    }

    #[test]
    fn wrong_key_column_count_is_rejected() {
        let kernels = count_star();
        let mut data = AggregatedData::new(&[DataType::Int64], 64).expect("data");
        let keys: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1])),
            Arc::new(Int64Array::from(vec![2])),
        ];
        let err = data
            .emplace(&kernels, &keys, 1, None, &mut Vec::new(), &mut Vec::new())
            .expect_err("mismatch");
        assert!(err.contains("key columns"), "err={err}");
    }
}
