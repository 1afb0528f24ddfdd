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
//! Read-back of the streams an aggregation sink spilled.
//!
//! Every spill round wrote one chunk per partition in ascending order, so partition
//! `i` of a stream is simply its `i`-th chunk. Feeding all chunks of one partition
//! into a merge-phase sink rebuilds that partition's groups.

use std::sync::Arc;

use crate::exec::chunk::Chunk;
use crate::exec::operators::aggregate::shared_state::AggSharedState;
use crate::exec::spill::{SpillProfile, SpillStreamId, SpillStreamManagerRef, SpillStreamReader};
use crate::hashagg_logging::debug;
use crate::runtime::profile::ScopedTimer;

pub struct AggSpillRestorer {
    manager: SpillStreamManagerRef,
    stream_ids: Vec<SpillStreamId>,
    partition_count: usize,
    profile: Option<SpillProfile>,
}

impl AggSpillRestorer {
    /// Snapshot the streams recorded in `shared` so far.
    pub fn new(shared: &AggSharedState, manager: SpillStreamManagerRef) -> Result<Self, String> {
        let ctx = shared.lock_spill_context()?;
        Ok(Self {
            manager,
            stream_ids: ctx.stream_ids.clone(),
            partition_count: shared.partition_helper().partition_count(),
            profile: ctx.profile.clone(),
        })
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    pub fn stream_ids(&self) -> &[SpillStreamId] {
        &self.stream_ids
    }

    /// Chunks of partition `partition` across every stream, in spill order.
    pub fn restore_partition(&self, partition: usize) -> Result<Vec<Chunk>, String> {
        if partition >= self.partition_count {
            return Err(format!(
                "spill partition {} out of range, partition count is {}",
                partition, self.partition_count
            ));
        }
        let mut restored = Vec::with_capacity(self.stream_ids.len());
        for id in &self.stream_ids {
            let mut chunks = self.read_stream(*id)?;
            restored.push(chunks.swap_remove(partition));
        }
        Ok(restored)
    }

    /// Every partition at once, reading each stream a single time.
    pub fn restore_all(&self) -> Result<Vec<Vec<Chunk>>, String> {
        let mut partitions = vec![Vec::with_capacity(self.stream_ids.len()); self.partition_count];
        for id in &self.stream_ids {
            for (partition, chunk) in self.read_stream(*id)?.into_iter().enumerate() {
                partitions[partition].push(chunk);
            }
        }
        Ok(partitions)
    }

    /// Delete every recorded stream.
    pub fn remove_streams(&self) -> Result<(), String> {
        for id in &self.stream_ids {
            self.manager.remove(*id)?;
        }
        debug!("removed {} aggregation spill streams", self.stream_ids.len());
        Ok(())
    }

    fn read_stream(&self, id: SpillStreamId) -> Result<Vec<Chunk>, String> {
        let _timer = self
            .profile
            .as_ref()
            .map(|p| ScopedTimer::new(Arc::clone(&p.restore_time)));
        let mut reader: Box<dyn SpillStreamReader> = self.manager.get_reader(id)?;
        let mut chunks = Vec::with_capacity(self.partition_count);
        while let Some(chunk) = reader.read_next()? {
            chunks.push(chunk);
        }
        if chunks.len() != self.partition_count {
            return Err(format!(
                "internal error: spill stream {} holds {} chunks, expected {}",
                id,
                chunks.len(),
                self.partition_count
            ));
        }
        if let Some(profile) = self.profile.as_ref() {
            let rows = chunks.iter().map(Chunk::len).sum::<usize>();
            profile.restore_rows.add(i64::try_from(rows).unwrap_or(i64::MAX));
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::expr::agg::{AggFunction, build_kernel_set};
    use crate::exec::expr::ExprId;
    use crate::exec::spill::block_spill_manager::{BlockSpillManager, SpillStorageConfig};
    use crate::exec::spill::ipc_serde::SpillCodec;
    use crate::exec::spill::{SpillStreamManager, SpillStreamWriter};
    use crate::runtime::profile::RuntimeProfile;
    use arrow::array::{ArrayRef, Int64Array};
    use arrow::datatypes::{DataType, Field};

    fn shared() -> AggSharedState {
        let kernels = build_kernel_set(
            &[AggFunction::new("sum", vec![ExprId(1)])],
            &[Some(DataType::Int64)],
        )
        .expect("kernels");
        AggSharedState::new(
            kernels,
            vec![Field::new("k", DataType::Int64, true)],
            &["s".to_string()],
            1024,
            1,
            None,
        )
        .expect("shared")
    }

    fn chunk(state: &AggSharedState, keys: Vec<i64>) -> Chunk {
        let sums: Vec<i64> = keys.iter().map(|k| k * 10).collect();
        let rows = keys.len();
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(keys)),
            Arc::new(Int64Array::from(sums)),
        ];
        Chunk::try_new(state.intermediate_schema(), columns, rows).expect("chunk")
    }

    #[test]
    fn partitions_are_addressed_by_position() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = Arc::new(
            BlockSpillManager::new(SpillStorageConfig {
                local_dirs: vec![dir.path().to_path_buf()],
                ipc_compression: SpillCodec::None,
            })
            .expect("manager"),
        );
        let state = shared();
        let parent = RuntimeProfile::new("agg");
        for round in [vec![vec![1, 2], vec![3]], vec![vec![], vec![4, 5]]] {
            let profile = state.lock_spill_context().expect("ctx").start(&parent);
            let mut writer = manager.get_writer(usize::MAX, &profile).expect("writer");
            state
                .lock_spill_context()
                .expect("ctx")
                .stream_ids
                .push(writer.id());
            for keys in round {
                writer.write(&chunk(&state, keys)).expect("write");
            }
            writer.close().expect("close");
        }

        let restorer = AggSpillRestorer::new(&state, manager.clone()).expect("restorer");
        assert_eq!(restorer.partition_count(), 2);
        let second = restorer.restore_partition(1).expect("partition 1");
        let lens: Vec<usize> = second.iter().map(Chunk::len).collect();
        assert_eq!(lens, vec![1, 2]);

        let all = restorer.restore_all().expect("all");
        let lens: Vec<Vec<usize>> = all
            .iter()
            .map(|p| p.iter().map(Chunk::len).collect())
            .collect();
        assert_eq!(lens, vec![vec![2, 0], vec![1, 2]]);
        assert!(restorer.restore_partition(2).is_err());

        restorer.remove_streams().expect("remove");
        assert_eq!(manager.num_streams(), 0);
    }

    #[test]
    fn short_stream_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = Arc::new(
            BlockSpillManager::new(SpillStorageConfig {
                local_dirs: vec![dir.path().to_path_buf()],
                ipc_compression: SpillCodec::Lz4,
            })
            .expect("manager"),
        );
        let state = shared();
        let profile = state
            .lock_spill_context()
            .expect("ctx")
            .start(&RuntimeProfile::new("agg"));
        let mut writer = manager.get_writer(usize::MAX, &profile).expect("writer");
        writer.write(&chunk(&state, vec![1])).expect("write");
        writer.close().expect("close");
        state
            .lock_spill_context()
            .expect("ctx")
            .stream_ids
            .push(writer.id());

        let restorer = AggSpillRestorer::new(&state, manager).expect("restorer");
        let err = restorer.restore_all().expect_err("one chunk for two partitions");
        assert!(err.contains("expected 2"), "{err}");
    }
}
