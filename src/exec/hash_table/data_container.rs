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
use crate::exec::expr::agg::AggStatePtr;

/// Insertion-ordered `(key, state)` pairs owned next to a hash table.
///
/// Iteration order is the order groups were first seen, independent of bucket layout.
/// `init_iterator` rewinds the cursor before each full scan.
#[derive(Debug)]
pub struct AggregateDataContainer<K> {
    keys: Vec<K>,
    places: Vec<AggStatePtr>,
    cursor: usize,
}

impl<K: Copy> AggregateDataContainer<K> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            places: Vec::new(),
            cursor: 0,
        }
    }

    pub fn push(&mut self, key: K, place: AggStatePtr) {
        self.keys.push(key);
        self.places.push(place);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn places(&self) -> &[AggStatePtr] {
        &self.places
    }

    pub fn init_iterator(&mut self) {
        self.cursor = 0;
    }

    pub fn next_entry(&mut self) -> Option<(K, AggStatePtr)> {
        let key = *self.keys.get(self.cursor)?;
        let place = self.places[self.cursor];
        self.cursor += 1;
        Some((key, place))
    }

    pub fn memory_usage(&self) -> usize {
        self.keys.capacity() * std::mem::size_of::<K>()
            + self.places.capacity() * std::mem::size_of::<AggStatePtr>()
    }

    pub fn clear(&mut self) {
        self.keys = Vec::new();
        self.places = Vec::new();
        self.cursor = 0;
    }
}

impl<K: Copy> Default for AggregateDataContainer<K> {
    fn default() -> Self {
        Self::new()
    }
}
