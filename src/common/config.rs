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
use crate::hashagg_config::config as hashagg_app_config;

pub(crate) fn log_filter() -> String {
    hashagg_app_config()
        .ok()
        .map(|c| c.effective_log_filter())
        .unwrap_or_else(|| "info".to_string())
}

pub(crate) fn state_arena_block_size() -> usize {
    hashagg_app_config()
        .ok()
        .map(|c| c.runtime.state_arena_block_size)
        .unwrap_or(64 * 1024)
}

pub(crate) fn streaming_queue_capacity() -> usize {
    hashagg_app_config()
        .ok()
        .map(|c| c.runtime.streaming_queue_capacity)
        .filter(|v| *v > 0)
        .unwrap_or(8)
}

pub(crate) fn batch_size() -> usize {
    hashagg_app_config()
        .ok()
        .map(|c| c.runtime.batch_size)
        .filter(|v| *v > 0)
        .unwrap_or(4096)
}

pub(crate) fn spill_enable() -> bool {
    hashagg_app_config()
        .ok()
        .map(|c| c.spill.enable)
        .unwrap_or(false)
}

pub(crate) fn spill_local_dirs() -> Vec<String> {
    let configured = hashagg_app_config()
        .ok()
        .map(|c| c.spill.local_dirs.clone())
        .unwrap_or_default();
    if configured.is_empty() {
        let mut default_dir = std::env::temp_dir();
        default_dir.push("hashagg-spill");
        vec![default_dir.to_string_lossy().into_owned()]
    } else {
        configured
    }
}

pub(crate) fn spill_ipc_compression() -> String {
    hashagg_app_config()
        .ok()
        .map(|c| c.spill.ipc_compression.clone())
        .unwrap_or_else(|| "lz4".to_string())
}

pub(crate) fn spill_partition_count_bits() -> u32 {
    hashagg_app_config()
        .ok()
        .map(|c| c.spill.partition_count_bits)
        .unwrap_or(4)
}

pub(crate) fn spill_agg_bytes_threshold() -> Option<usize> {
    hashagg_app_config()
        .ok()
        .and_then(|c| c.spill.agg_bytes_threshold)
}
