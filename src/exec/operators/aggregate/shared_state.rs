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
//! State shared between an aggregation sink and whatever reads its result.
//!
//! Responsibilities:
//! - Owns the hash table and its arena behind one mutex, so they are reset together.
//! - Keeps append-only spill bookkeeping behind a second mutex.
//! - Holds the streaming data queue and the limit-passthrough buffer.
//! - Turns the table into key + value columns for spill and for final output.
//!
//! Key exported interfaces:
//! - Types: `AggSharedState`, `AggSpillContext`, `SerializedTable`.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::datatypes::{Field, Schema, SchemaRef};

use crate::exec::chunk::Chunk;
use crate::exec::expr::agg::AggKernelSet;
use crate::exec::hash_table::AggregatedData;
use crate::exec::operators::aggregate::data_queue::DataQueue;
use crate::exec::spill::{SpillPartitionHelper, SpillProfile, SpillStreamId};
use crate::runtime::profile::RuntimeProfile;

/// Spill bookkeeping. Append-only once the first spill happened.
#[derive(Debug, Default)]
pub struct AggSpillContext {
    pub has_data: bool,
    pub stream_ids: Vec<SpillStreamId>,
    pub profile: Option<SpillProfile>,
}

impl AggSpillContext {
    /// Mark that a spill is under way and return its counters, creating them under
    /// `parent` the first time.
    pub fn start(&mut self, parent: &RuntimeProfile) -> SpillProfile {
        self.has_data = true;
        self.profile
            .get_or_insert_with(|| SpillProfile::new(parent))
            .clone()
    }
}

/// The table rendered as one chunk, plus what spill partitioning needs.
pub struct SerializedTable {
    pub chunk: Chunk,
    pub hashes: Vec<u64>,
    pub has_null_key: bool,
}

pub struct AggSharedState {
    kernels: AggKernelSet,
    num_keys: usize,
    intermediate_schema: SchemaRef,
    output_schema: SchemaRef,
    data: Mutex<AggregatedData>,
    spill_context: Mutex<AggSpillContext>,
    partition_helper: SpillPartitionHelper,
    data_queue: Option<Arc<DataQueue>>,
    limit_passthrough: Mutex<Vec<Chunk>>,
    sink_finished: AtomicBool,
}

impl fmt::Debug for AggSharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggSharedState")
            .field("num_keys", &self.num_keys)
            .field("num_functions", &self.kernels.len())
            .field("streaming", &self.data_queue.is_some())
            .field("sink_finished", &self.is_sink_finished())
            .finish()
    }
}

impl AggSharedState {
    /// `queue_capacity` set makes this a streaming aggregation.
    pub fn new(
        kernels: AggKernelSet,
        key_fields: Vec<Field>,
        agg_names: &[String],
        arena_block_size: usize,
        partition_count_bits: u32,
        queue_capacity: Option<usize>,
    ) -> Result<Self, String> {
        let key_types = key_fields
            .iter()
            .map(|f| f.data_type().clone())
            .collect::<Vec<_>>();
        let data = AggregatedData::new(&key_types, arena_block_size)?;
        let build_schema = |intermediate: bool| -> SchemaRef {
            let mut fields = key_fields.clone();
            fields.extend(kernels.output_fields(agg_names, intermediate));
            Arc::new(Schema::new(fields))
        };
        let intermediate_schema = build_schema(true);
        let output_schema = build_schema(false);
        Ok(Self {
            num_keys: key_fields.len(),
            intermediate_schema,
            output_schema,
            data: Mutex::new(data),
            spill_context: Mutex::new(AggSpillContext::default()),
            partition_helper: SpillPartitionHelper::new(partition_count_bits)?,
            data_queue: queue_capacity.map(|cap| Arc::new(DataQueue::new(cap))),
            limit_passthrough: Mutex::new(Vec::new()),
            sink_finished: AtomicBool::new(false),
            kernels,
        })
    }

    pub fn kernels(&self) -> &AggKernelSet {
        &self.kernels
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    /// Keys followed by intermediate values: the spill and streaming schema.
    pub fn intermediate_schema(&self) -> SchemaRef {
        Arc::clone(&self.intermediate_schema)
    }

    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    pub fn partition_helper(&self) -> SpillPartitionHelper {
        self.partition_helper
    }

    pub fn data_queue(&self) -> Option<&Arc<DataQueue>> {
        self.data_queue.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.data_queue.is_some()
    }

    pub fn lock_data(&self) -> Result<MutexGuard<'_, AggregatedData>, String> {
        self.data
            .lock()
            .map_err(|_| "aggregated data lock poisoned".to_string())
    }

    pub fn lock_spill_context(&self) -> Result<MutexGuard<'_, AggSpillContext>, String> {
        self.spill_context
            .lock()
            .map_err(|_| "aggregation spill context lock poisoned".to_string())
    }

    pub fn has_spilled(&self) -> Result<bool, String> {
        Ok(self.lock_spill_context()?.has_data)
    }

    pub fn spill_stream_ids(&self) -> Result<Vec<SpillStreamId>, String> {
        Ok(self.lock_spill_context()?.stream_ids.clone())
    }

    /// Rows the table could not take under a group limit, in intermediate form.
    ///
    /// A streaming aggregation forwards them through its queue; otherwise they wait
    /// in a buffer for the reader.
    pub fn push_passthrough(&self, chunk: Chunk) -> Result<(), String> {
        match self.data_queue.as_ref() {
            Some(queue) => queue.push(chunk),
            None => {
                self.limit_passthrough
                    .lock()
                    .map_err(|_| "limit passthrough lock poisoned".to_string())?
                    .push(chunk);
                Ok(())
            }
        }
    }

    pub fn take_limit_passthrough(&self) -> Result<Vec<Chunk>, String> {
        let mut buffer = self
            .limit_passthrough
            .lock()
            .map_err(|_| "limit passthrough lock poisoned".to_string())?;
        Ok(std::mem::take(&mut *buffer))
    }

    pub fn set_sink_finished(&self) {
        self.sink_finished.store(true, Ordering::Release);
        if let Some(queue) = self.data_queue.as_ref() {
            queue.set_finished();
        }
    }

    pub fn is_sink_finished(&self) -> bool {
        self.sink_finished.load(Ordering::Acquire)
    }

    /// Render every group of `data` as keys + values, in enumeration order.
    ///
    /// The table is left untouched; callers reset it once the chunk is safe.
    pub fn serialize_table(
        &self,
        data: &mut AggregatedData,
        output_intermediate: bool,
    ) -> Result<SerializedTable, String> {
        let groups = data.variant.serialize_groups()?;
        let num_rows = groups.len();
        let mut columns = groups.key_columns;
        if columns.len() != self.num_keys {
            return Err(format!(
                "internal error: serialized {} key columns, expected {}",
                columns.len(),
                self.num_keys
            ));
        }
        for entry in &self.kernels.entries {
            let values = entry.build_array(&data.arena, &groups.places, output_intermediate)?;
            if values.len() != num_rows {
                return Err(format!(
                    "internal error: aggregate value rows {} != key rows {}",
                    values.len(),
                    num_rows
                ));
            }
            columns.push(values);
        }
        let schema = if output_intermediate {
            self.intermediate_schema()
        } else {
            self.output_schema()
        };
        Ok(SerializedTable {
            chunk: Chunk::try_new(schema, columns, num_rows)?,
            hashes: groups.hashes,
            has_null_key: groups.has_null_key,
        })
    }

    /// Emit the resident groups and release their states.
    ///
    /// An aggregation without group by always yields exactly one row, even over
    /// empty input.
    pub fn build_output_chunk(&self, finalize: bool) -> Result<Chunk, String> {
        let mut data = self.lock_data()?;
        if data.variant.is_no_key() && data.size() == 0 {
            let mut places = Vec::with_capacity(1);
            data.emplace(&self.kernels, &[], 1, None, &mut places, &mut Vec::new())?;
        }
        let table = self.serialize_table(&mut data, !finalize)?;
        data.reset(&self.kernels);
        Ok(table.chunk)
    }

    /// Drop every resident state without emitting it.
    pub fn release(&self) -> Result<(), String> {
        let mut data = self.lock_data()?;
        data.reset(&self.kernels);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::ExprId;
    use crate::exec::expr::agg::{AggFunction, build_kernel_set};
    use arrow::array::{Array, ArrayRef, Int64Array};
    use arrow::datatypes::DataType;

    fn shared(keys: Vec<Field>, queue: Option<usize>) -> AggSharedState {
        let kernels = build_kernel_set(
            &[
                AggFunction::new("count", vec![]),
                AggFunction::new("sum", vec![ExprId(1)]),
            ],
            &[None, Some(DataType::Int64)],
        )
        .expect("kernels");
        AggSharedState::new(
            kernels,
            keys,
            &["cnt".to_string(), "total".to_string()],
            1024,
            2,
            queue,
        )
        .expect("shared state")
    }

    #[test]
    fn no_key_output_has_one_row_on_empty_input() {
        let state = shared(vec![], None);
        let chunk = state.build_output_chunk(true).expect("output");
        assert_eq!(chunk.len(), 1);
        let count = chunk.batch.column(0);
        let count = count.as_any().downcast_ref::<Int64Array>().expect("i64");
        assert_eq!(count.value(0), 0);
        assert!(chunk.batch.column(1).is_null(0));
    }

    #[test]
    fn schemas_put_keys_first() {
        let state = shared(vec![Field::new("k", DataType::Int32, true)], None);
        let names: Vec<String> = state
            .intermediate_schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["k", "cnt", "total"]);
        assert_eq!(state.output_schema().fields().len(), 3);
    }

    #[test]
    fn keyed_output_releases_states() {
        let state = shared(vec![Field::new("k", DataType::Int64, true)], None);
        {
            let mut data = state.lock_data().expect("data");
            let keys: Vec<ArrayRef> =
                vec![Arc::new(Int64Array::from(vec![Some(1), None, Some(1)]))];
            let mut places = Vec::new();
            data.emplace(state.kernels(), &keys, 3, None, &mut places, &mut Vec::new())
                .expect("emplace");
            let view = state.kernels().entries[0]
                .build_input_view(&None)
                .expect("view");
            state.kernels().entries[0]
                .update_batch(&mut data.arena, &places, &view)
                .expect("update");
        }
        let chunk = state.build_output_chunk(true).expect("output");
        assert_eq!(chunk.len(), 2);
        let keys = chunk.batch.column(0);
        assert!(keys.is_null(1));
        let counts = chunk.batch.column(1);
        let counts = counts.as_any().downcast_ref::<Int64Array>().expect("i64");
        assert_eq!(counts.values().to_vec(), vec![2, 1]);
        assert_eq!(state.lock_data().expect("data").size(), 0);
    }

    #[test]
    fn passthrough_goes_to_queue_when_streaming() {
        let blocking = shared(vec![Field::new("k", DataType::Int64, true)], None);
        let chunk = Chunk::empty(blocking.intermediate_schema());
        blocking.push_passthrough(chunk.clone()).expect("push");
        assert_eq!(blocking.take_limit_passthrough().expect("take").len(), 1);

        let streaming = shared(vec![Field::new("k", DataType::Int64, true)], Some(4));
        streaming.push_passthrough(chunk).expect("push");
        assert!(streaming.take_limit_passthrough().expect("take").is_empty());
        assert_eq!(
            streaming.data_queue().map(|q| q.len().expect("len")),
            Some(1)
        );
    }

    #[test]
    fn spill_context_starts_once() {
        let state = shared(vec![Field::new("k", DataType::Int64, true)], None);
        let parent = RuntimeProfile::new("agg");
        {
            let mut ctx = state.lock_spill_context().expect("ctx");
            ctx.start(&parent).spill_rows.add(5);
            ctx.start(&parent);
        }
        assert!(state.has_spilled().expect("spilled"));
        assert_eq!(parent.children().len(), 1);
        let ctx = state.lock_spill_context().expect("ctx");
        assert_eq!(ctx.profile.as_ref().map(|p| p.spill_rows.value()), Some(5));
    }

    #[test]
    fn poisoned_spill_context_is_an_error_not_unspilled() {
        let state = Arc::new(shared(vec![Field::new("k", DataType::Int64, true)], None));
        let poisoner = Arc::clone(&state);
        let _ = std::thread::spawn(move || {
            let _ctx = poisoner.lock_spill_context().expect("ctx");
            panic!("poison the spill context");
        })
        .join();
        assert!(state.has_spilled().is_err());
    }
}
