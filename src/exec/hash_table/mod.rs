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
//! Group-by hash tables.
//!
//! Responsibilities:
//! - Choose a table shape from the group key types.
//! - Map each input row to the arena offset of its aggregate state row.
//! - Enumerate groups in first-seen order for spill and output.
//!
//! Key exported interfaces:
//! - `AggregatedDataVariant`, `AggregatedData`, `SerializedGroups`.
//! - `pick_group_key_strategy`.

pub mod agg_data_variant;
pub mod data_container;
pub mod fixed_key_table;
pub mod hash;
pub(crate) mod key_storage;
pub mod key_strategy;
pub mod serialized_key_table;

use arrow::array::ArrayRef;

use crate::exec::expr::agg::AggStatePtr;

pub use agg_data_variant::{AggregatedData, AggregatedDataVariant};
pub use key_strategy::{GroupKeyStrategy, pick_group_key_strategy};

/// Every group of a table, materialized in enumeration order.
///
/// `key_columns[i]` row `r` is the key whose state row is `places[r]`, and
/// `hashes[r]` is the seeded key hash used for spill partitioning. When
/// `has_null_key` is set the last row is the null key.
#[derive(Debug)]
pub struct SerializedGroups {
    pub key_columns: Vec<ArrayRef>,
    pub places: Vec<AggStatePtr>,
    pub hashes: Vec<u64>,
    pub has_null_key: bool,
}

impl SerializedGroups {
    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}
