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

/// Location of one serialized key inside a `RowStorage`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct RowKey {
    start: usize,
    len: usize,
}

impl RowKey {
    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

/// Append-only byte storage for serialized group keys.
#[derive(Debug, Default)]
pub(crate) struct RowStorage {
    bytes: Vec<u8>,
    initial_capacity: usize,
}

impl RowStorage {
    pub(crate) fn new(initial_capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(initial_capacity),
            initial_capacity,
        }
    }

    pub(crate) fn alloc_copy(&mut self, bytes: &[u8]) -> RowKey {
        let start = self.bytes.len();
        self.bytes.extend_from_slice(bytes);
        RowKey {
            start,
            len: bytes.len(),
        }
    }

    /// Keys are only produced by this storage, so the range is always in bounds
    /// until the next `clear`.
    pub(crate) fn get(&self, key: RowKey) -> &[u8] {
        self.bytes
            .get(key.start..key.start + key.len)
            .unwrap_or_default()
    }

    pub(crate) fn allocated_bytes(&self) -> usize {
        self.bytes.capacity()
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
        self.bytes.shrink_to(self.initial_capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_resolve_to_copied_bytes() {
        let mut storage = RowStorage::new(4);
        let a = storage.alloc_copy(b"alpha");
        let b = storage.alloc_copy(b"");
        let c = storage.alloc_copy(b"gamma");
        assert_eq!(storage.get(a), b"alpha");
        assert_eq!(storage.get(b), b"");
        assert_eq!(storage.get(c), b"gamma");
        assert_eq!(c.len(), 5);
        storage.clear();
        assert_eq!(storage.get(a), b"");
    }
}
