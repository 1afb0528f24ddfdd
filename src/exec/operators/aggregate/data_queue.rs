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
//! Bounded chunk queue between a streaming aggregation sink and its source.
//!
//! The queue owns the sink-side readiness dependency and flips it under its own lock on
//! every push and pop, so the flag never disagrees with the queue length it was computed
//! from. The bound is soft: a push always succeeds and only closes the gate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::exec::chunk::Chunk;
use crate::exec::pipeline::dependency::{Dependency, DependencyHandle};

#[derive(Debug)]
pub struct DataQueue {
    chunks: Mutex<VecDeque<Chunk>>,
    capacity: usize,
    sink_dependency: DependencyHandle,
    finished: AtomicBool,
}

impl DataQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            chunks: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            sink_dependency: Dependency::new("agg_sink_data_queue", true),
            finished: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Chunk>>, String> {
        self.chunks
            .lock()
            .map_err(|_| "aggregation data queue lock poisoned".to_string())
    }

    fn refresh_locked(&self, len: usize) {
        if len < self.capacity {
            self.sink_dependency.set_ready();
        } else {
            self.sink_dependency.set_blocked();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> Result<usize, String> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, String> {
        Ok(self.len()? == 0)
    }

    pub fn has_enough_space_to_push(&self) -> Result<bool, String> {
        Ok(self.len()? < self.capacity)
    }

    pub fn push(&self, chunk: Chunk) -> Result<(), String> {
        let mut chunks = self.lock()?;
        chunks.push_back(chunk);
        self.refresh_locked(chunks.len());
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<Chunk>, String> {
        let mut chunks = self.lock()?;
        let chunk = chunks.pop_front();
        self.refresh_locked(chunks.len());
        Ok(chunk)
    }

    /// Re-derive the gate from the current length.
    pub fn refresh(&self) -> Result<(), String> {
        let chunks = self.lock()?;
        self.refresh_locked(chunks.len());
        Ok(())
    }

    pub fn sink_dependency(&self) -> &DependencyHandle {
        &self.sink_dependency
    }

    /// The producer will push nothing more.
    pub fn set_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Finished and fully drained.
    pub fn is_exhausted(&self) -> Result<bool, String> {
        Ok(self.is_finished() && self.is_empty()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Schema;
    use std::sync::Arc;

    fn empty_chunk() -> Chunk {
        Chunk::empty(Arc::new(Schema::empty()))
    }

    #[test]
    fn gate_closes_exactly_at_capacity() {
        let queue = DataQueue::new(2);
        assert!(queue.sink_dependency().is_ready());
        queue.push(empty_chunk()).expect("push");
        assert!(queue.sink_dependency().is_ready());
        queue.push(empty_chunk()).expect("push");
        assert!(!queue.has_enough_space_to_push().expect("space"));
        assert!(!queue.sink_dependency().is_ready());
        queue.pop().expect("pop").expect("chunk");
        assert!(queue.sink_dependency().is_ready());
        queue.pop().expect("pop").expect("chunk");
        assert!(queue.pop().expect("pop").is_none());
        assert!(queue.sink_dependency().is_ready());
    }

    #[test]
    fn exhausted_needs_finish_and_drain() {
        let queue = DataQueue::new(1);
        queue.push(empty_chunk()).expect("push");
        queue.set_finished();
        assert!(!queue.is_exhausted().expect("exhausted"));
        queue.pop().expect("pop");
        assert!(queue.is_exhausted().expect("exhausted"));
    }

    #[test]
    fn poisoned_queue_reports_an_error() {
        let queue = Arc::new(DataQueue::new(1));
        let poisoner = Arc::clone(&queue);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.chunks.lock().expect("lock");
            panic!("poison the queue lock");
        })
        .join();
        assert!(queue.len().is_err());
        assert!(queue.has_enough_space_to_push().is_err());
        queue.set_finished();
        assert!(queue.is_exhausted().is_err());
    }
}
