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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::config;
use crate::hashagg_logging::debug;
use crate::runtime::mem_tracker::{self, MemTracker};

/// Per-fragment-instance execution context shared by every driver of the fragment.
///
/// Clones share the cancellation flag and the first-error slot.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    query_label: String,
    batch_size: usize,
    error_state: Arc<RuntimeErrorState>,
    cancelled: Arc<AtomicBool>,
    mem_tracker: Arc<MemTracker>,
}

#[derive(Debug, Default)]
pub struct RuntimeErrorState {
    error: Mutex<Option<String>>,
}

impl RuntimeErrorState {
    /// Keep only the first reported error.
    pub fn set_error(&self, err: String) {
        let mut guard = self.error.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            *guard = Some(err);
        }
    }

    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Default for RuntimeState {
    fn default() -> Self {
        Self::new("query_unknown")
    }
}

impl RuntimeState {
    pub fn new(query_label: impl Into<String>) -> Self {
        let query_label = query_label.into();
        let process = mem_tracker::process_mem_tracker();
        let mem_tracker = MemTracker::new_child(query_label.clone(), &process);
        Self {
            query_label,
            batch_size: config::batch_size(),
            error_state: Arc::new(RuntimeErrorState::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
            mem_tracker,
        }
    }

    pub fn with_mem_tracker(mut self, tracker: Arc<MemTracker>) -> Self {
        self.mem_tracker = tracker;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn query_label(&self) -> &str {
        &self.query_label
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn mem_tracker(&self) -> &Arc<MemTracker> {
        &self.mem_tracker
    }

    pub fn error_state(&self) -> &Arc<RuntimeErrorState> {
        &self.error_state
    }

    pub fn set_error(&self, err: String) {
        self.error_state.set_error(err);
    }

    /// Request cancellation. Operators observe it between chunks.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("query {} cancelled", self.query_label);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
