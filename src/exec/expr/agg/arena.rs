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
//! Bump arena for aggregate state rows.
//!
//! Responsibilities:
//! - Hands out state rows as byte offsets into one contiguous, growable buffer.
//! - Frees every row at once on `reset`, starting a new generation.
//!
//! Key exported interfaces:
//! - Types: `AggStateArena`, `AggStatePtr`.
//!
//! Current limitations:
//! - Offsets are only bounds-checked. An offset from an older generation that still
//!   falls inside the current buffer is not detected, so callers drop every offset
//!   they hold in the same step that resets the arena.

/// Byte offset of a state row (or of one state inside it) in an `AggStateArena`.
pub type AggStatePtr = usize;

#[derive(Debug)]
pub struct AggStateArena {
    buf: Vec<u8>,
    initial_capacity: usize,
    generation: u64,
    rows: usize,
}

impl AggStateArena {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(initial_capacity),
            initial_capacity,
            generation: 0,
            rows: 0,
        }
    }

    /// Reserve `size` zeroed bytes aligned to `align` relative to the buffer start.
    pub fn alloc(&mut self, size: usize, align: usize) -> AggStatePtr {
        let align_mask = align.max(1) - 1;
        let start = (self.buf.len() + align_mask) & !align_mask;
        self.buf.resize(start + size.max(1), 0);
        self.rows += 1;
        start
    }

    /// Drop every row and release the buffer down to its initial capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.buf.shrink_to(self.initial_capacity);
        self.rows = 0;
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn used_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Bytes held by the arena, including spare capacity.
    pub fn allocated_bytes(&self) -> usize {
        self.buf.capacity()
    }

    pub fn slice(&self, at: AggStatePtr, len: usize) -> Result<&[u8], String> {
        let end = at
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| self.out_of_range(at, len))?;
        Ok(&self.buf[at..end])
    }

    pub fn slice_mut(&mut self, at: AggStatePtr, len: usize) -> Result<&mut [u8], String> {
        let end = at
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| self.out_of_range(at, len))?;
        Ok(&mut self.buf[at..end])
    }

    fn out_of_range(&self, at: AggStatePtr, len: usize) -> String {
        format!(
            "aggregate state access out of range: offset={} len={} arena_bytes={} generation={}",
            at,
            len,
            self.buf.len(),
            self.generation
        )
    }

    pub fn read_i64(&self, at: AggStatePtr) -> Result<i64, String> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.slice(at, 8)?);
        Ok(i64::from_ne_bytes(raw))
    }

    pub fn write_i64(&mut self, at: AggStatePtr, value: i64) -> Result<(), String> {
        self.slice_mut(at, 8)?.copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    pub fn read_f64(&self, at: AggStatePtr) -> Result<f64, String> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.slice(at, 8)?);
        Ok(f64::from_ne_bytes(raw))
    }

    pub fn write_f64(&mut self, at: AggStatePtr, value: f64) -> Result<(), String> {
        self.slice_mut(at, 8)?.copy_from_slice(&value.to_ne_bytes());
        Ok(())
    }

    pub fn read_flag(&self, at: AggStatePtr) -> Result<bool, String> {
        Ok(self.slice(at, 1)?[0] != 0)
    }

    pub fn write_flag(&mut self, at: AggStatePtr, value: bool) -> Result<(), String> {
        self.slice_mut(at, 1)?[0] = u8::from(value);
        Ok(())
    }
}

impl Default for AggStateArena {
    fn default() -> Self {
        Self::new(0)
    }
}
