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
//! Spill storage seam.
//!
//! Responsibilities:
//! - Defines the sequential writer/reader streams aggregation spills through.
//! - Maps key hashes to spill partitions.
//! - Ships a local-disk stream manager over Arrow IPC files.
//!
//! Key exported interfaces:
//! - Traits: `SpillStreamManager`, `SpillStreamWriter`, `SpillStreamReader`.
//! - Types: `SpillStreamId`, `SpillProfile`, `SpillPartitionHelper`, `BlockSpillManager`.

pub mod block_spill_manager;
pub mod dir_manager;
pub mod ipc_serde;
pub mod partition;

use std::fmt;
use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::runtime::profile::{CounterRef, RuntimeProfile, TUnit};

pub use block_spill_manager::BlockSpillManager;
pub use partition::SpillPartitionHelper;

/// Opaque identity of one spilled stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpillStreamId(pub u64);

impl fmt::Display for SpillStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

pub trait SpillStreamWriter: Send {
    fn id(&self) -> SpillStreamId;
    fn write(&mut self, chunk: &Chunk) -> Result<(), String>;
    /// Flush and seal the stream. Calling it again is a no-op.
    fn close(&mut self) -> Result<(), String>;
}

pub trait SpillStreamReader: Send {
    fn id(&self) -> SpillStreamId;
    /// Next chunk in write order, `None` once the stream is exhausted.
    fn read_next(&mut self) -> Result<Option<Chunk>, String>;
}

/// Storage that hands out fresh spill streams and reads them back.
pub trait SpillStreamManager: Send + Sync {
    fn get_writer(
        &self,
        max_batch_rows: usize,
        profile: &SpillProfile,
    ) -> Result<Box<dyn SpillStreamWriter>, String>;

    fn get_reader(&self, id: SpillStreamId) -> Result<Box<dyn SpillStreamReader>, String>;

    fn remove(&self, id: SpillStreamId) -> Result<(), String>;
}

pub type SpillStreamManagerRef = Arc<dyn SpillStreamManager>;

#[derive(Clone, Debug)]
pub struct SpillProfile {
    pub spill_rows: CounterRef,
    pub spill_bytes: CounterRef,
    pub spill_time: CounterRef,
    pub spill_block_count: CounterRef,
    pub spill_stream_count: CounterRef,
    pub restore_rows: CounterRef,
    pub restore_time: CounterRef,
}

impl SpillProfile {
    /// Counters live under a `Spill` child of `profile`.
    pub fn new(profile: &RuntimeProfile) -> Self {
        let profile = profile.child("Spill");
        Self {
            spill_rows: profile.add_counter("SpillRows", TUnit::Unit),
            spill_bytes: profile.add_counter("SpillBytes", TUnit::Bytes),
            spill_time: profile.add_timer("SpillTime"),
            spill_block_count: profile.add_counter("SpillBlockCount", TUnit::Unit),
            spill_stream_count: profile.add_counter("SpillStreamCount", TUnit::Unit),
            restore_rows: profile.add_counter("RestoreRows", TUnit::Unit),
            restore_time: profile.add_timer("RestoreTime"),
        }
    }
}
