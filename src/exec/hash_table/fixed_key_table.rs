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
//! Hash table for a single fixed-width group key.
//!
//! Key bits are reinterpreted as an unsigned integer (or `i128`) of the column width.
//! Floating-point keys are canonicalized first, so `-0.0` groups with `0.0` and every
//! NaN groups together. A null key lives in a dedicated slot outside the table.

use arrow::array::{Array, ArrayData, ArrayRef, make_array};
use arrow::buffer::{Buffer, NullBuffer, ScalarBuffer};
use arrow::datatypes::{ArrowNativeType, DataType};
use hashbrown::HashTable;
use hashbrown::hash_table::Entry;

use crate::exec::expr::agg::AggStatePtr;
use crate::exec::hash_table::SerializedGroups;
use crate::exec::hash_table::data_container::AggregateDataContainer;
use crate::exec::hash_table::hash::{
    AGG_HASH_SEED, canonical_f32_bits, canonical_f64_bits, hash_i128_with_seed,
    hash_null_with_seed, hash_u64_with_seed,
};

pub trait FixedKey: ArrowNativeType + Eq + Default + Copy {
    fn hash_with_seed(self, seed: u64) -> u64;

    /// Map float bit patterns to one representative per value class.
    fn canonicalize_float(self) -> Self {
        self
    }
}

impl FixedKey for u8 {
    fn hash_with_seed(self, seed: u64) -> u64 {
        hash_u64_with_seed(seed, self as u64)
    }
}

impl FixedKey for u16 {
    fn hash_with_seed(self, seed: u64) -> u64 {
        hash_u64_with_seed(seed, self as u64)
    }
}

impl FixedKey for u32 {
    fn hash_with_seed(self, seed: u64) -> u64 {
        hash_u64_with_seed(seed, self as u64)
    }

    fn canonicalize_float(self) -> Self {
        canonical_f32_bits(self)
    }
}

impl FixedKey for u64 {
    fn hash_with_seed(self, seed: u64) -> u64 {
        hash_u64_with_seed(seed, self)
    }

    fn canonicalize_float(self) -> Self {
        canonical_f64_bits(self)
    }
}

impl FixedKey for i128 {
    fn hash_with_seed(self, seed: u64) -> u64 {
        hash_i128_with_seed(seed, self)
    }
}

#[derive(Clone, Copy, Debug)]
struct FixedEntry<K> {
    key: K,
    hash: u64,
    place: AggStatePtr,
}

pub struct FixedKeyHashTable<K: FixedKey> {
    data_type: DataType,
    is_float: bool,
    table: HashTable<FixedEntry<K>>,
    container: AggregateDataContainer<K>,
    null_key_data: Option<AggStatePtr>,
}

impl<K: FixedKey> FixedKeyHashTable<K> {
    pub fn new(data_type: DataType) -> Self {
        let is_float = matches!(data_type, DataType::Float32 | DataType::Float64);
        Self {
            data_type,
            is_float,
            table: HashTable::new(),
            container: AggregateDataContainer::new(),
            null_key_data: None,
        }
    }

    /// Distinct groups, counting the null-key slot.
    pub fn size(&self) -> usize {
        self.table.len() + usize::from(self.null_key_data.is_some())
    }

    pub fn has_null_key_data(&self) -> bool {
        self.null_key_data.is_some()
    }

    pub fn bucket_bytes(&self) -> usize {
        // One control byte per bucket on top of the entry.
        self.table.capacity() * (std::mem::size_of::<FixedEntry<K>>() + 1)
    }

    pub fn container_bytes(&self) -> usize {
        self.container.memory_usage()
    }

    fn key_values(&self, keys: &ArrayRef) -> Result<ScalarBuffer<K>, String> {
        let data = keys.to_data();
        let buffer = data
            .buffers()
            .first()
            .ok_or_else(|| format!("group key column {:?} has no value buffer", keys.data_type()))?;
        let needed = (data.offset() + data.len()) * std::mem::size_of::<K>();
        if buffer.len() < needed {
            return Err(format!(
                "group key column buffer too short: have {} bytes, need {}",
                buffer.len(),
                needed
            ));
        }
        Ok(ScalarBuffer::new(buffer.clone(), data.offset(), data.len()))
    }

    /// Find or create the state row of every row's key.
    ///
    /// Rows that resolve are appended to `places` in row order. With `max_groups`
    /// set, rows whose key would create a group past the cap go to `misses` instead.
    pub fn emplace_batch<F>(
        &mut self,
        keys: &ArrayRef,
        max_groups: Option<usize>,
        create: &mut F,
        places: &mut Vec<AggStatePtr>,
        misses: &mut Vec<u32>,
    ) -> Result<(), String>
    where
        F: FnMut() -> Result<AggStatePtr, String>,
    {
        if keys.data_type() != &self.data_type {
            return Err(format!(
                "group key type mismatch: table={:?} input={:?}",
                self.data_type,
                keys.data_type()
            ));
        }
        let values = self.key_values(keys)?;
        let nulls = keys.logical_nulls();
        places.reserve(values.len());

        for (row, raw) in values.iter().copied().enumerate() {
            let at_limit = max_groups.is_some_and(|m| {
                self.table.len() + usize::from(self.null_key_data.is_some()) >= m
            });
            if nulls.as_ref().is_some_and(|n| n.is_null(row)) {
                match self.null_key_data {
                    Some(place) => places.push(place),
                    None if at_limit => misses.push(row as u32),
                    None => {
                        let place = create()?;
                        self.null_key_data = Some(place);
                        places.push(place);
                    }
                }
                continue;
            }

            let key = if self.is_float {
                raw.canonicalize_float()
            } else {
                raw
            };
            let hash = key.hash_with_seed(AGG_HASH_SEED);
            match self.table.entry(hash, |e| e.key == key, |e| e.hash) {
                Entry::Occupied(entry) => places.push(entry.get().place),
                Entry::Vacant(entry) => {
                    if at_limit {
                        misses.push(row as u32);
                        continue;
                    }
                    let place = create()?;
                    entry.insert(FixedEntry { key, hash, place });
                    self.container.push(key, place);
                    places.push(place);
                }
            }
        }
        Ok(())
    }

    /// Rebuild the key column and collect state rows in container order, null key last.
    pub fn serialize_groups(&mut self) -> Result<SerializedGroups, String> {
        let rows = self.size();
        let mut keys = Vec::with_capacity(rows);
        let mut places = Vec::with_capacity(rows);
        let mut hashes = Vec::with_capacity(rows);
        self.container.init_iterator();
        while let Some((key, place)) = self.container.next_entry() {
            keys.push(key);
            places.push(place);
            hashes.push(key.hash_with_seed(AGG_HASH_SEED));
        }
        let has_null_key = if let Some(place) = self.null_key_data {
            keys.push(K::default());
            places.push(place);
            hashes.push(hash_null_with_seed(AGG_HASH_SEED));
            true
        } else {
            false
        };

        let nulls = has_null_key.then(|| {
            let mut valid = vec![true; keys.len()];
            if let Some(last) = valid.last_mut() {
                *last = false;
            }
            NullBuffer::from(valid)
        });
        let len = keys.len();
        let data = ArrayData::builder(self.data_type.clone())
            .len(len)
            .add_buffer(Buffer::from_vec(keys))
            .nulls(nulls)
            .build()
            .map_err(|e| format!("rebuild group key column: {e}"))?;

        Ok(SerializedGroups {
            key_columns: vec![make_array(data)],
            places,
            hashes,
            has_null_key,
        })
    }

    pub fn places(&self) -> Vec<AggStatePtr> {
        let mut out = self.container.places().to_vec();
        out.extend(self.null_key_data);
        out
    }

    pub fn reset(&mut self) {
        self.table = HashTable::new();
        self.container.clear();
        self.null_key_data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int32Array};
    use std::sync::Arc;

    fn counter() -> impl FnMut() -> Result<AggStatePtr, String> {
        let mut next = 0usize;
        move || {
            next += 16;
            Ok(next)
        }
    }

    #[test]
    fn equal_keys_share_one_place() {
        let mut table = FixedKeyHashTable::<u32>::new(DataType::Int32);
        let keys: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 1, 3, 2, 1]));
        let mut create = counter();
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, None, &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert!(misses.is_empty());
        assert_eq!(table.size(), 3);
        assert_eq!(places[0], places[2]);
        assert_eq!(places[0], places[5]);
        assert_eq!(places[1], places[4]);
        assert_ne!(places[0], places[1]);

        let mut again = Vec::new();
        table
            .emplace_batch(&keys, None, &mut create, &mut again, &mut misses)
            .expect("emplace again");
        assert_eq!(places, again);
        assert_eq!(table.size(), 3);
    }

    #[test]
    fn null_key_gets_single_slot_and_serializes_last() {
        let mut table = FixedKeyHashTable::<u32>::new(DataType::Int32);
        let keys: ArrayRef = Arc::new(Int32Array::from(vec![None, Some(5), None, Some(6)]));
        let mut create = counter();
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, None, &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert_eq!(table.size(), 3);
        assert_eq!(places[0], places[2]);

        let groups = table.serialize_groups().expect("serialize");
        assert!(groups.has_null_key);
        assert_eq!(groups.places.len(), 3);
        assert_eq!(groups.places[2], places[0]);
        let col = groups.key_columns[0]
            .as_any()
            .downcast_ref::<Int32Array>()
            .expect("int32");
        assert_eq!(col.value(0), 5);
        assert_eq!(col.value(1), 6);
        assert!(col.is_null(2));
    }

    #[test]
    fn limit_routes_new_keys_to_misses() {
        let mut table = FixedKeyHashTable::<u32>::new(DataType::Int32);
        let keys: ArrayRef = Arc::new(Int32Array::from(vec![1, 2, 3, 1, 4]));
        let mut create = counter();
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, Some(2), &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert_eq!(table.size(), 2);
        assert_eq!(misses, vec![2, 4]);
        assert_eq!(places.len(), 3);
    }

    #[test]
    fn float_zero_signs_group_together() {
        let mut table = FixedKeyHashTable::<u64>::new(DataType::Float64);
        let keys: ArrayRef = Arc::new(Float64Array::from(vec![0.0, -0.0, f64::NAN, 1.5]));
        let mut create = counter();
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, None, &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert_eq!(table.size(), 3);
        assert_eq!(places[0], places[1]);
    }

    #[test]
    fn reset_drops_everything() {
        let mut table = FixedKeyHashTable::<u32>::new(DataType::Int32);
        let keys: ArrayRef = Arc::new(Int32Array::from(vec![Some(1), None]));
        let mut create = counter();
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, None, &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert_eq!(table.places().len(), 2);
        table.reset();
        assert_eq!(table.size(), 0);
        assert!(!table.has_null_key_data());
        assert_eq!(table.serialize_groups().expect("empty").places.len(), 0);
    }
}
