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
//! Hash table keyed by the Arrow row encoding of all group-by columns.
//!
//! With several key columns a null value is part of the row bytes. A single key column
//! keeps its null key in a dedicated slot outside the table, serialized last.

use arrow::array::{Array, ArrayRef, new_null_array};
use arrow::datatypes::DataType;
use arrow::row::{RowConverter, SortField};
use hashbrown::HashTable;
use hashbrown::hash_table::Entry;

use crate::exec::expr::agg::AggStatePtr;
use crate::exec::hash_table::SerializedGroups;
use crate::exec::hash_table::data_container::AggregateDataContainer;
use crate::exec::hash_table::hash::{AGG_HASH_SEED, hash_bytes_with_seed, hash_null_with_seed};
use crate::exec::hash_table::key_storage::{RowKey, RowStorage};

#[derive(Clone, Copy, Debug)]
struct SerializedEntry {
    key: RowKey,
    hash: u64,
    place: AggStatePtr,
}

pub struct SerializedKeyHashTable {
    key_types: Vec<DataType>,
    converter: RowConverter,
    table: HashTable<SerializedEntry>,
    storage: RowStorage,
    container: AggregateDataContainer<RowKey>,
    null_key_data: Option<AggStatePtr>,
}

impl SerializedKeyHashTable {
    pub fn new(key_types: Vec<DataType>) -> Result<Self, String> {
        let fields = key_types
            .iter()
            .cloned()
            .map(SortField::new)
            .collect::<Vec<_>>();
        let converter = RowConverter::new(fields)
            .map_err(|e| format!("unsupported group by key types {:?}: {}", key_types, e))?;
        Ok(Self {
            key_types,
            converter,
            table: HashTable::new(),
            storage: RowStorage::new(64 * 1024),
            container: AggregateDataContainer::new(),
            null_key_data: None,
        })
    }

    /// Distinct groups, counting the null-key slot.
    pub fn size(&self) -> usize {
        self.table.len() + usize::from(self.null_key_data.is_some())
    }

    pub fn has_null_key_data(&self) -> bool {
        self.null_key_data.is_some()
    }

    pub fn bucket_bytes(&self) -> usize {
        self.table.capacity() * (std::mem::size_of::<SerializedEntry>() + 1)
    }

    pub fn container_bytes(&self) -> usize {
        self.container.memory_usage()
    }

    /// Bytes held by the serialized key storage.
    pub fn key_bytes(&self) -> usize {
        self.storage.allocated_bytes()
    }

    pub fn emplace_batch<F>(
        &mut self,
        keys: &[ArrayRef],
        max_groups: Option<usize>,
        create: &mut F,
        places: &mut Vec<AggStatePtr>,
        misses: &mut Vec<u32>,
    ) -> Result<(), String>
    where
        F: FnMut() -> Result<AggStatePtr, String>,
    {
        if keys.len() != self.key_types.len() {
            return Err(format!(
                "group key column count mismatch: expected {} got {}",
                self.key_types.len(),
                keys.len()
            ));
        }
        for (idx, (column, expected)) in keys.iter().zip(self.key_types.iter()).enumerate() {
            if column.data_type() != expected {
                return Err(format!(
                    "group key {} type mismatch: table={:?} input={:?}",
                    idx,
                    expected,
                    column.data_type()
                ));
            }
        }
        let rows = self
            .converter
            .convert_columns(keys)
            .map_err(|e| format!("encode group keys: {e}"))?;
        places.reserve(rows.num_rows());
        let nulls = match keys {
            [single] => single.logical_nulls(),
            _ => None,
        };

        let Self {
            table,
            storage,
            container,
            null_key_data,
            ..
        } = self;
        for (row, encoded) in rows.iter().enumerate() {
            let at_limit = max_groups
                .is_some_and(|m| table.len() + usize::from(null_key_data.is_some()) >= m);
            if nulls.as_ref().is_some_and(|n| n.is_null(row)) {
                match *null_key_data {
                    Some(place) => places.push(place),
                    None if at_limit => misses.push(row as u32),
                    None => {
                        let place = create()?;
                        *null_key_data = Some(place);
                        places.push(place);
                    }
                }
                continue;
            }
            let bytes = encoded.as_ref();
            let hash = hash_bytes_with_seed(AGG_HASH_SEED, bytes);
            match table.entry(hash, |e| storage.get(e.key) == bytes, |e| e.hash) {
                Entry::Occupied(entry) => places.push(entry.get().place),
                Entry::Vacant(entry) => {
                    if at_limit {
                        misses.push(row as u32);
                        continue;
                    }
                    let place = create()?;
                    let key = storage.alloc_copy(bytes);
                    entry.insert(SerializedEntry { key, hash, place });
                    container.push(key, place);
                    places.push(place);
                }
            }
        }
        Ok(())
    }

    /// Decode every stored key back into columns, in container order, null key last.
    pub fn serialize_groups(&mut self) -> Result<SerializedGroups, String> {
        let rows = self.size();
        let null_row = match self.null_key_data {
            Some(_) => Some(
                self.converter
                    .convert_columns(&[new_null_array(&self.key_types[0], 1)])
                    .map_err(|e| format!("encode null group key: {e}"))?
                    .row(0)
                    .owned(),
            ),
            None => None,
        };
        let mut encoded = Vec::with_capacity(rows);
        let mut places = Vec::with_capacity(rows);
        let mut hashes = Vec::with_capacity(rows);
        self.container.init_iterator();
        while let Some((key, place)) = self.container.next_entry() {
            let bytes = self.storage.get(key);
            hashes.push(hash_bytes_with_seed(AGG_HASH_SEED, bytes));
            encoded.push(bytes);
            places.push(place);
        }
        if let (Some(null_row), Some(place)) = (null_row.as_ref(), self.null_key_data) {
            encoded.push(null_row.as_ref());
            places.push(place);
            hashes.push(hash_null_with_seed(AGG_HASH_SEED));
        }
        let parser = self.converter.parser();
        let key_columns = self
            .converter
            .convert_rows(encoded.iter().map(|bytes| parser.parse(bytes)))
            .map_err(|e| format!("decode group keys: {e}"))?;
        Ok(SerializedGroups {
            key_columns,
            places,
            hashes,
            has_null_key: self.null_key_data.is_some(),
        })
    }

    pub fn places(&self) -> Vec<AggStatePtr> {
        let mut out = self.container.places().to_vec();
        out.extend(self.null_key_data);
        out
    }

    pub fn reset(&mut self) {
        self.table = HashTable::new();
        self.storage.clear();
        self.container.clear();
        self.null_key_data = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};
    use std::sync::Arc;

    #[test]
    fn composite_keys_resolve_and_decode() {
        let mut table =
            SerializedKeyHashTable::new(vec![DataType::Int64, DataType::Utf8]).expect("table");
        let keys: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(vec![1, 1, 2, 1])),
            Arc::new(StringArray::from(vec![Some("a"), Some("b"), None, Some("a")])),
        ];
        let mut next = 0usize;
        let mut create = || {
            next += 8;
            Ok(next)
        };
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, None, &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert_eq!(table.size(), 3);
        assert_eq!(places[0], places[3]);
        assert!(table.key_bytes() > 0);

        let groups = table.serialize_groups().expect("serialize");
        assert_eq!(groups.places, vec![places[0], places[1], places[2]]);
        let strings = groups.key_columns[1]
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8");
        assert_eq!(strings.value(0), "a");
        assert_eq!(strings.value(1), "b");
        assert!(strings.is_null(2));
        assert_eq!(groups.hashes.len(), 3);
        assert!(!groups.has_null_key);
    }

    #[test]
    fn single_string_key_keeps_null_in_own_slot() {
        let mut table = SerializedKeyHashTable::new(vec![DataType::Utf8]).expect("table");
        let keys: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec![
            None,
            Some("x"),
            None,
            Some("y"),
        ]))];
        let mut next = 0usize;
        let mut create = || {
            next += 8;
            Ok(next)
        };
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, None, &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert_eq!(table.size(), 3);
        assert!(table.has_null_key_data());
        assert_eq!(places[0], places[2]);

        let groups = table.serialize_groups().expect("serialize");
        assert!(groups.has_null_key);
        assert_eq!(groups.places, vec![places[1], places[3], places[0]]);
        let strings = groups.key_columns[0]
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("utf8");
        assert_eq!(strings.value(0), "x");
        assert_eq!(strings.value(1), "y");
        assert!(strings.is_null(2));

        table.reset();
        assert_eq!(table.size(), 0);
        assert!(!table.has_null_key_data());
    }

    #[test]
    fn null_slot_counts_toward_group_limit() {
        let mut table = SerializedKeyHashTable::new(vec![DataType::Utf8]).expect("table");
        let keys: Vec<ArrayRef> = vec![Arc::new(StringArray::from(vec![
            Some("a"),
            None,
            Some("b"),
            Some("a"),
        ]))];
        let mut create = || Ok(0usize);
        let mut places = Vec::new();
        let mut misses = Vec::new();
        table
            .emplace_batch(&keys, Some(2), &mut create, &mut places, &mut misses)
            .expect("emplace");
        assert_eq!(table.size(), 2);
        assert_eq!(misses, vec![2]);
        assert_eq!(places.len(), 3);
    }

    #[test]
    fn rejects_column_count_mismatch() {
        let mut table = SerializedKeyHashTable::new(vec![DataType::Int64, DataType::Int64])
            .expect("table");
        let keys: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![1]))];
        let mut create = || Ok(0usize);
        let err = table
            .emplace_batch(&keys, None, &mut create, &mut Vec::new(), &mut Vec::new())
            .expect_err("mismatch");
        assert!(err.contains("column count mismatch"), "err={err}");
    }
}
