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
//! Per-driver execution state of the aggregation sink.
//!
//! Responsibilities:
//! - Evaluates group-by and aggregate inputs and folds each chunk into the shared table.
//! - Routes rows past the group limit to the passthrough path in intermediate form.
//! - Recomputes resident memory after every chunk and spills (or flushes, when
//!   streaming) once it crosses the threshold.
//!
//! Key exported interfaces:
//! - Types: `AggSinkLocalState`.
//!
//! Current limitations:
//! - An aggregation without group by never spills; its table is a single row.

use std::sync::Arc;

use arrow::array::{ArrayRef, UInt32Array};
use arrow::compute::take;

use crate::exec::chunk::{Chunk, MutableChunk};
use crate::exec::expr::agg::{AggKernelSet, AggStateArena, AggStatePtr};
use crate::exec::expr::{ExprArena, ExprId};
use crate::exec::operators::aggregate::shared_state::{AggSharedState, SerializedTable};
use crate::exec::operators::aggregate::sink_dependency::AggSinkDependency;
use crate::exec::operators::aggregate::sink_operator::{AggExecutor, AggSinkOperatorX};
use crate::exec::spill::{
    SpillPartitionHelper, SpillStreamManager, SpillStreamManagerRef, SpillStreamWriter,
};
use crate::hashagg_logging::{debug, error, info};
use crate::runtime::mem_tracker::{MemTracker, TrackedUsage};
use crate::runtime::profile::{CounterRef, RuntimeProfile, ScopedTimer, TUnit};
use crate::runtime::runtime_state::RuntimeState;

const INTERNAL_ERROR_PREFIX: &str = "internal error";

struct AggSinkCounters {
    exec_time: CounterRef,
    expr_time: CounterRef,
    hash_table_compute_time: CounterRef,
    hash_table_emplace_time: CounterRef,
    hash_table_input_count: CounterRef,
    hash_table_size: CounterRef,
    merge_time: CounterRef,
    serialize_data_time: CounterRef,
    memory_usage: CounterRef,
    hash_table_memory_usage: CounterRef,
    serialize_key_arena: CounterRef,
    passthrough_rows: CounterRef,
}

impl AggSinkCounters {
    fn new(profile: &RuntimeProfile) -> Self {
        Self {
            exec_time: profile.add_timer("ExecTime"),
            expr_time: profile.add_timer("ExprTime"),
            hash_table_compute_time: profile.add_timer("HashTableComputeTime"),
            hash_table_emplace_time: profile.add_timer("HashTableEmplaceTime"),
            hash_table_input_count: profile.add_counter("HashTableInputCount", TUnit::Unit),
            hash_table_size: profile.add_counter("HashTableSize", TUnit::Unit),
            merge_time: profile.add_timer("MergeTime"),
            serialize_data_time: profile.add_timer("SerializeDataTime"),
            memory_usage: profile.add_counter("MemoryUsage", TUnit::Bytes),
            hash_table_memory_usage: profile.add_counter("HashTableMemoryUsage", TUnit::Bytes),
            serialize_key_arena: profile.add_counter("SerializeKeyArena", TUnit::Bytes),
            passthrough_rows: profile.add_counter("PassthroughRows", TUnit::Unit),
        }
    }
}

fn to_i64(v: usize) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

pub struct AggSinkLocalState {
    op: Arc<AggSinkOperatorX>,
    shared: Arc<AggSharedState>,
    dependency: AggSinkDependency,
    spill_manager: Option<SpillStreamManagerRef>,
    profile: RuntimeProfile,
    counters: AggSinkCounters,
    mem_usage: Option<TrackedUsage>,
    memory_usage: usize,
    places: Vec<AggStatePtr>,
    misses: Vec<u32>,
    poisoned: Option<String>,
}

impl AggSinkLocalState {
    pub fn new(
        op: Arc<AggSinkOperatorX>,
        shared: Arc<AggSharedState>,
        spill_manager: Option<SpillStreamManagerRef>,
        profile: RuntimeProfile,
    ) -> Result<Self, String> {
        // fail early on an unprepared descriptor
        op.prepared()?;
        let dependency = AggSinkDependency::new(Arc::clone(&shared));
        let counters = AggSinkCounters::new(&profile);
        Ok(Self {
            op,
            shared,
            dependency,
            spill_manager,
            profile,
            counters,
            mem_usage: None,
            memory_usage: 0,
            places: Vec::new(),
            misses: Vec::new(),
            poisoned: None,
        })
    }

    /// Register the counters under `profile`.
    pub fn open(&mut self, profile: RuntimeProfile) {
        self.counters = AggSinkCounters::new(&profile);
        self.profile = profile;
    }

    pub fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        let tracker = MemTracker::new_child("AggregatedData", &tracker);
        let mut usage = TrackedUsage::new(tracker);
        usage.set(self.memory_usage);
        self.mem_usage = Some(usage);
    }

    pub fn shared(&self) -> &Arc<AggSharedState> {
        &self.shared
    }

    pub fn dependency(&self) -> &AggSinkDependency {
        &self.dependency
    }

    pub fn profile(&self) -> &RuntimeProfile {
        &self.profile
    }

    pub fn executor(&self) -> Result<AggExecutor, String> {
        self.op.executor()
    }

    /// Resident bytes as of the last recompute.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Fold one chunk into the table, then finish the input when `eos`.
    pub fn sink(&mut self, state: &RuntimeState, chunk: &Chunk, eos: bool) -> Result<(), String> {
        if let Some(err) = self.poisoned.as_ref() {
            return Err(err.clone());
        }
        if state.is_cancelled() {
            self.shared.release()?;
            self.update_memusage()?;
            return Err(format!("{} cancelled", self.op.name()));
        }
        let result = self.sink_inner(chunk, eos);
        if let Err(err) = result.as_ref()
            && err.starts_with(INTERNAL_ERROR_PREFIX)
        {
            error!("{}: {}", self.op.name(), err);
            self.poisoned = Some(err.clone());
        }
        result
    }

    fn sink_inner(&mut self, chunk: &Chunk, eos: bool) -> Result<(), String> {
        let _exec = ScopedTimer::new(Arc::clone(&self.counters.exec_time));
        if !chunk.is_empty() {
            self.execute(chunk)?;
            self.update_memusage()?;
            self.after_chunk()?;
        }
        if eos {
            self.finish_input()?;
        }
        Ok(())
    }

    fn execute(&mut self, chunk: &Chunk) -> Result<(), String> {
        let prepared = self.op.prepared()?;
        let executor = prepared.executor;
        let num_rows = chunk.len();
        let exprs = Arc::clone(&self.op.plan().exprs);

        let (keys, inputs) = {
            let _expr = ScopedTimer::new(Arc::clone(&self.counters.expr_time));
            let keys = self
                .op
                .plan()
                .group_by
                .iter()
                .map(|id| exprs.eval(*id, chunk))
                .collect::<Result<Vec<_>, String>>()?;
            let inputs = eval_agg_inputs(
                &exprs,
                self.shared.kernels(),
                &prepared.agg_inputs,
                chunk,
            )?;
            (keys, inputs)
        };

        let shared = Arc::clone(&self.shared);
        let kernels = shared.kernels();
        {
            let mut data = shared.lock_data()?;
            self.places.clear();
            self.misses.clear();
            {
                let _compute = ScopedTimer::new(Arc::clone(&self.counters.hash_table_compute_time));
                let _emplace = ScopedTimer::new(Arc::clone(&self.counters.hash_table_emplace_time));
                data.emplace(
                    kernels,
                    &keys,
                    num_rows,
                    prepared.limit,
                    &mut self.places,
                    &mut self.misses,
                )?;
            }
            self.counters.hash_table_input_count.add(to_i64(num_rows));

            let _merge = executor
                .is_merge()
                .then(|| ScopedTimer::new(Arc::clone(&self.counters.merge_time)));
            if self.misses.is_empty() {
                apply_states(kernels, &mut data.arena, &self.places, &inputs, executor)?;
            } else {
                let hits = hit_rows(num_rows, &self.misses);
                let hit_inputs = take_rows(&inputs, &hits)?;
                apply_states(kernels, &mut data.arena, &self.places, &hit_inputs, executor)?;
            }
            self.counters.hash_table_size.set(to_i64(data.size()));
        }

        if !self.misses.is_empty() {
            let misses = UInt32Array::from(std::mem::take(&mut self.misses));
            let rows = misses.len();
            self.emit_passthrough(&keys, &inputs, &misses, executor)?;
            self.counters.passthrough_rows.add(to_i64(rows));
        }
        Ok(())
    }

    /// Turn rows without a table slot into intermediate rows of their own.
    fn emit_passthrough(
        &self,
        keys: &[ArrayRef],
        inputs: &[Option<ArrayRef>],
        rows: &UInt32Array,
        executor: AggExecutor,
    ) -> Result<(), String> {
        let kernels = self.shared.kernels();
        let num_rows = rows.len();
        let mut columns = keys
            .iter()
            .map(|k| take(k.as_ref(), rows, None).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, String>>()?;
        let row_inputs = take_rows(inputs, rows)?;

        let mut arena = AggStateArena::new(num_rows * kernels.layout.total_size);
        let places = (0..num_rows)
            .map(|_| kernels.create_state_row(&mut arena))
            .collect::<Result<Vec<_>, String>>()?;
        let built = apply_states(kernels, &mut arena, &places, &row_inputs, executor).and_then(|_| {
            kernels
                .entries
                .iter()
                .map(|entry| entry.build_array(&arena, &places, true))
                .collect::<Result<Vec<_>, String>>()
        });
        kernels.destroy_state_rows(&mut arena, &places);
        columns.extend(built?);

        let chunk = Chunk::try_new(self.shared.intermediate_schema(), columns, num_rows)?;
        debug!(
            "{} passes {} rows past the group limit",
            self.op.name(),
            num_rows
        );
        self.shared.push_passthrough(chunk)
    }

    /// Recompute resident bytes and publish them.
    fn update_memusage(&mut self) -> Result<(), String> {
        let (usage, table_bytes, key_bytes) = {
            let data = self.shared.lock_data()?;
            (
                data.memory_usage(),
                data.hash_table_bytes(),
                data.variant.key_bytes(),
            )
        };
        self.counters.memory_usage.set(to_i64(usage));
        self.counters.hash_table_memory_usage.set(to_i64(table_bytes));
        self.counters.serialize_key_arena.set_max(to_i64(key_bytes));
        if let Some(tracked) = self.mem_usage.as_mut() {
            tracked.set(usage);
        }
        self.memory_usage = usage;
        Ok(())
    }

    fn over_threshold(&self) -> bool {
        self.op
            .options()
            .spill_bytes_threshold
            .is_some_and(|threshold| self.memory_usage >= threshold)
    }

    fn after_chunk(&mut self) -> Result<(), String> {
        if !self.op.executor()?.has_keys() {
            return Ok(());
        }
        if self.shared.is_streaming() {
            if self.over_threshold() {
                self.flush_streaming()?;
            }
            return Ok(());
        }
        self.try_spill_disk(false)
    }

    fn finish_input(&mut self) -> Result<(), String> {
        if self.shared.is_streaming() {
            self.flush_streaming()?;
        } else if self.op.executor()?.has_keys() && self.shared.has_spilled()? {
            self.try_spill_disk(true)?;
        }
        self.shared.set_sink_finished();
        self.dependency.refresh()?;
        debug!(
            "{} finished input, {} groups resident",
            self.op.name(),
            self.shared.lock_data()?.size()
        );
        Ok(())
    }

    /// Move the resident table into the queue as intermediate rows.
    fn flush_streaming(&mut self) -> Result<(), String> {
        let chunk = {
            let _serialize = ScopedTimer::new(Arc::clone(&self.counters.serialize_data_time));
            self.shared.build_output_chunk(false)?
        };
        if !chunk.is_empty()
            && let Some(queue) = self.shared.data_queue()
        {
            queue.push(chunk)?;
        }
        self.update_memusage()
    }

    /// Spill the whole table when it crossed the threshold, or unconditionally at `eos`.
    pub fn try_spill_disk(&mut self, eos: bool) -> Result<(), String> {
        let Some(manager) = self.spill_manager.clone() else {
            return Ok(());
        };
        if !self.op.executor()?.has_keys() {
            return Ok(());
        }
        if !eos && !self.over_threshold() {
            return Ok(());
        }
        self.spill_hash_table(manager.as_ref())?;
        self.update_memusage()
    }

    fn spill_hash_table(&mut self, manager: &dyn SpillStreamManager) -> Result<(), String> {
        let shared = Arc::clone(&self.shared);
        let mut data = shared.lock_data()?;
        let table = {
            let _serialize = ScopedTimer::new(Arc::clone(&self.counters.serialize_data_time));
            shared.serialize_table(&mut data, true)?
        };
        let table_rows = data.size();
        if table.chunk.len() != table_rows || table.hashes.len() != table_rows {
            return Err(format!(
                "{INTERNAL_ERROR_PREFIX}: serialized {} rows and {} hashes from a table of {} groups",
                table.chunk.len(),
                table.hashes.len(),
                table_rows
            ));
        }

        let profile = shared.lock_spill_context()?.start(&self.profile);
        let _spill = ScopedTimer::new(Arc::clone(&profile.spill_time));
        let mut writer = manager.get_writer(usize::MAX, &profile)?;
        let registered = shared
            .lock_spill_context()
            .map(|mut ctx| ctx.stream_ids.push(writer.id()));
        let written = registered
            .and_then(|_| write_partitions(writer.as_mut(), &table, shared.partition_helper()));
        let closed = writer.close();
        let written = written?;
        closed?;
        if written != table_rows {
            return Err(format!(
                "{INTERNAL_ERROR_PREFIX}: spilled {} rows from a table of {} groups",
                written, table_rows
            ));
        }

        data.reset(shared.kernels());
        info!(
            "{} spilled {} groups into stream {} ({} partitions)",
            self.op.name(),
            table_rows,
            writer.id(),
            shared.partition_helper().partition_count()
        );
        Ok(())
    }

    /// Release resident state when the query did not complete.
    pub fn close(&mut self, state: &RuntimeState) -> Result<(), String> {
        let failed = state.is_cancelled() || state.error_state().error().is_some();
        if failed || self.poisoned.is_some() {
            self.shared.release()?;
        }
        if let Some(tracked) = self.mem_usage.as_mut() {
            tracked.set(0);
        }
        self.memory_usage = 0;
        Ok(())
    }
}

fn eval_agg_inputs(
    exprs: &ExprArena,
    kernels: &AggKernelSet,
    agg_inputs: &[Option<ExprId>],
    chunk: &Chunk,
) -> Result<Vec<Option<ArrayRef>>, String> {
    kernels
        .entries
        .iter()
        .zip(agg_inputs)
        .map(|(entry, input)| match input {
            Some(id) if !entry.count_all() => entry.prepare_input(Some(exprs.eval(*id, chunk)?)),
            _ => Ok(None),
        })
        .collect()
}

/// Update (direct mode) or merge (merge mode) every function over `places`.
fn apply_states(
    kernels: &AggKernelSet,
    arena: &mut AggStateArena,
    places: &[AggStatePtr],
    inputs: &[Option<ArrayRef>],
    executor: AggExecutor,
) -> Result<(), String> {
    if inputs.len() != kernels.len() {
        return Err(format!(
            "aggregate inputs {} != aggregate functions {}",
            inputs.len(),
            kernels.len()
        ));
    }
    for (entry, input) in kernels.entries.iter().zip(inputs) {
        if executor.is_merge() {
            let view = entry.build_merge_view(input)?;
            entry.merge_batch(arena, places, &view)?;
        } else {
            let view = entry.build_input_view(input)?;
            entry.update_batch(arena, places, &view)?;
        }
    }
    Ok(())
}

/// Row indices not listed in the ascending `misses`.
fn hit_rows(num_rows: usize, misses: &[u32]) -> UInt32Array {
    let mut hits = Vec::with_capacity(num_rows.saturating_sub(misses.len()));
    let mut misses = misses.iter().peekable();
    for row in 0..num_rows as u32 {
        if misses.peek() == Some(&&row) {
            misses.next();
        } else {
            hits.push(row);
        }
    }
    UInt32Array::from(hits)
}

fn take_rows(
    inputs: &[Option<ArrayRef>],
    rows: &UInt32Array,
) -> Result<Vec<Option<ArrayRef>>, String> {
    inputs
        .iter()
        .map(|input| {
            input
                .as_ref()
                .map(|array| take(array.as_ref(), rows, None).map_err(|e| e.to_string()))
                .transpose()
        })
        .collect()
}

/// Write one chunk per partition, ascending, and return the rows written.
///
/// The null-key row is always last in `table` and goes to the last partition.
fn write_partitions(
    writer: &mut dyn SpillStreamWriter,
    table: &SerializedTable,
    helper: SpillPartitionHelper,
) -> Result<usize, String> {
    let partition_count = helper.partition_count();
    let num_rows = table.chunk.len();
    let mut partitions = (0..partition_count)
        .map(|_| MutableChunk::new(table.chunk.schema()))
        .collect::<Vec<_>>();
    let null_row = table.has_null_key.then(|| num_rows.saturating_sub(1));
    let partition_of = |row: usize| match null_row {
        Some(null_row) if row == null_row => helper.last_partition(),
        _ => helper.get_index(table.hashes[row]),
    };

    let mut expected = vec![0usize; partition_count];
    let mut row = 0;
    while row < num_rows {
        let partition = partition_of(row);
        let mut end = row + 1;
        while end < num_rows && partition_of(end) == partition {
            end += 1;
        }
        partitions[partition].add_rows(&table.chunk, row, end - row)?;
        expected[partition] += end - row;
        row = end;
    }

    let mut written = 0;
    for (index, partition) in partitions.iter().enumerate() {
        let chunk = if partition.is_empty() {
            table.chunk.clone_empty()
        } else {
            partition.to_chunk()?
        };
        if chunk.len() != expected[index] {
            return Err(format!(
                "{INTERNAL_ERROR_PREFIX}: spill partition {} holds {} rows, expected {}",
                index,
                chunk.len(),
                expected[index]
            ));
        }
        written += chunk.len();
        writer.write(&chunk)?;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::agg::AggFunction;
    use crate::exec::operators::aggregate::sink_operator::{AggSinkOptions, AggSinkPlan};
    use crate::exec::spill::{SpillProfile, SpillStreamId};
    use arrow::array::{Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStreams {
        written: Mutex<Vec<Vec<usize>>>,
    }

    struct MemoryWriter {
        id: SpillStreamId,
        rows: Vec<usize>,
        sink: Arc<MemoryStreams>,
    }

    impl SpillStreamWriter for MemoryWriter {
        fn id(&self) -> SpillStreamId {
            self.id
        }

        fn write(&mut self, chunk: &Chunk) -> Result<(), String> {
            self.rows.push(chunk.len());
            Ok(())
        }

        fn close(&mut self) -> Result<(), String> {
            let rows = std::mem::take(&mut self.rows);
            self.sink.written.lock().expect("lock").push(rows);
            Ok(())
        }
    }

    struct MemoryManager(Arc<MemoryStreams>);

    impl SpillStreamManager for MemoryManager {
        fn get_writer(
            &self,
            _max_batch_rows: usize,
            _profile: &SpillProfile,
        ) -> Result<Box<dyn SpillStreamWriter>, String> {
            let id = SpillStreamId(self.0.written.lock().expect("lock").len() as u64);
            Ok(Box::new(MemoryWriter {
                id,
                rows: Vec::new(),
                sink: Arc::clone(&self.0),
            }))
        }

        fn get_reader(
            &self,
            id: SpillStreamId,
        ) -> Result<Box<dyn crate::exec::spill::SpillStreamReader>, String> {
            Err(format!("no reader for {id}"))
        }

        fn remove(&self, _id: SpillStreamId) -> Result<(), String> {
            Ok(())
        }
    }

    fn input(keys: Vec<Option<i64>>) -> Chunk {
        let values = (0..keys.len() as i64).collect::<Vec<_>>();
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, true),
            Field::new("v", DataType::Int64, true),
        ]));
        Chunk::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(keys)),
                Arc::new(Int64Array::from(values)),
            ],
            6,
        )
        .expect("chunk")
    }

    fn local_state(
        plan: impl FnOnce(&mut AggSinkPlan),
        options: AggSinkOptions,
        manager: Option<SpillStreamManagerRef>,
    ) -> AggSinkLocalState {
        let mut exprs = ExprArena::default();
        let key = exprs.column_ref(0, DataType::Int64);
        let value = exprs.column_ref(1, DataType::Int64);
        let mut agg_plan = AggSinkPlan::new(
            Arc::new(exprs),
            vec![key],
            vec![AggFunction::new("sum", vec![value])],
        );
        plan(&mut agg_plan);
        let mut op = AggSinkOperatorX::new(agg_plan, options);
        op.init().expect("init");
        op.prepare().expect("prepare");
        let shared = Arc::new(op.create_shared_state().expect("shared"));
        AggSinkLocalState::new(Arc::new(op), shared, manager, RuntimeProfile::new("agg"))
            .expect("local state")
    }

    #[test]
    fn hit_rows_skip_misses() {
        let hits = hit_rows(5, &[1, 3]);
        assert_eq!(hits.values().to_vec(), vec![0, 2, 4]);
        assert_eq!(hit_rows(2, &[]).len(), 2);
    }

    #[test]
    fn limit_routes_new_keys_to_passthrough() {
        let mut local = local_state(|p| p.limit = Some(2), AggSinkOptions::default(), None);
        let state = RuntimeState::new("limit");
        let chunk = input(vec![Some(1), Some(2), Some(3), Some(1), Some(4), Some(2)]);
        local.sink(&state, &chunk, true).expect("sink");

        assert_eq!(local.shared().lock_data().expect("data").size(), 2);
        let passed = local.shared().take_limit_passthrough().expect("passthrough");
        assert_eq!(passed.len(), 1);
        let keys = passed[0].batch.column(0);
        let keys = keys.as_any().downcast_ref::<Int64Array>().expect("i64");
        assert_eq!(keys.values().to_vec(), vec![3, 4]);
        let sums = passed[0].batch.column(1);
        let sums = sums.as_any().downcast_ref::<Int64Array>().expect("i64");
        assert_eq!(sums.values().to_vec(), vec![2, 4]);

        let out = local.shared().build_output_chunk(true).expect("output");
        let sums = out.batch.column(1);
        let sums = sums.as_any().downcast_ref::<Int64Array>().expect("i64");
        assert_eq!(sums.values().to_vec(), vec![3, 6]);
    }

    #[test]
    fn zero_threshold_spills_every_chunk_into_all_partitions() {
        let streams = Arc::new(MemoryStreams::default());
        let options = AggSinkOptions {
            spill_enable: true,
            spill_partition_count_bits: 2,
            spill_bytes_threshold: Some(0),
            ..AggSinkOptions::default()
        };
        let manager: SpillStreamManagerRef = Arc::new(MemoryManager(Arc::clone(&streams)));
        let mut local = local_state(|_| {}, options, Some(manager));
        let state = RuntimeState::new("spill");
        let chunk = input(vec![Some(1), None, Some(1), Some(7), None, Some(9)]);
        local.sink(&state, &chunk, false).expect("sink");
        local.sink(&state, &chunk, true).expect("sink eos");

        let written = streams.written.lock().expect("lock").clone();
        // two thresholds crossed plus the final forced round over an empty table
        assert_eq!(written.len(), 3);
        for round in &written[..2] {
            assert_eq!(round.len(), 4);
            assert_eq!(round.iter().sum::<usize>(), 4);
        }
        assert_eq!(written[2], vec![0; 4]);
        assert!(written[0][3] >= 1);
        assert_eq!(local.shared().spill_stream_ids().expect("ids").len(), 3);
        assert_eq!(local.shared().lock_data().expect("data").size(), 0);
        assert!(local.shared().is_sink_finished());
    }

    #[test]
    fn cancelled_query_releases_and_fails() {
        let mut local = local_state(|_| {}, AggSinkOptions::default(), None);
        let state = RuntimeState::new("cancel");
        local
            .sink(&state, &input(vec![Some(1); 6]), false)
            .expect("sink");
        state.cancel();
        let err = local
            .sink(&state, &input(vec![Some(2); 6]), false)
            .expect_err("cancelled");
        assert!(err.contains("cancelled"), "{err}");
        assert_eq!(local.shared().lock_data().expect("data").size(), 0);
    }

    #[test]
    fn memory_usage_is_published() {
        let mut local = local_state(|_| {}, AggSinkOptions::default(), None);
        let tracker = MemTracker::new_root("test");
        local.set_mem_tracker(Arc::clone(&tracker));
        let state = RuntimeState::new("mem");
        local
            .sink(&state, &input(vec![Some(1), Some(2), Some(3), None, Some(5), Some(6)]), false)
            .expect("sink");
        assert!(local.memory_usage() > 0);
        let counter = local.profile().get_counter("MemoryUsage").expect("counter");
        assert_eq!(counter.value(), local.memory_usage() as i64);
        assert!(tracker.current() > 0);
        local.close(&state).expect("close");
        assert_eq!(tracker.current(), 0);
    }
}
