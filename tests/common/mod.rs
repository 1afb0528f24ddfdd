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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use tempfile::TempDir;

use hashagg::exec::chunk::Chunk;
use hashagg::exec::spill::BlockSpillManager;
use hashagg::exec::spill::block_spill_manager::SpillStorageConfig;
use hashagg::exec::spill::ipc_serde::SpillCodec;
use hashagg::hashagg_config::HashAggConfig;
use hashagg::hashagg_logging;

/// Scratch directory plus a config file inside it.
pub struct TestConfig {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
}

impl TestConfig {
    pub fn new(spill_section: &str) -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_hashagg.toml");
        let spill_dir = temp_dir.path().join("spill");
        std::fs::create_dir_all(&spill_dir)?;
        let config_content = format!(
            r#"
log_level = "debug"

[runtime]
state_arena_block_size = 4096
streaming_queue_capacity = 2

[spill]
local_dirs = ["{}"]
{}
"#,
            spill_dir.display(),
            spill_section
        );
        std::fs::write(&config_path, config_content)?;
        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    pub fn init_logging(&self) {
        hashagg_logging::init_with_level("debug");
    }

    pub fn load(&self) -> anyhow::Result<HashAggConfig> {
        HashAggConfig::load_from_file(&self.config_path)
    }
}

/// Local-disk spill storage rooted in a fresh temp dir. Keep the dir alive.
pub fn spill_manager(codec: SpillCodec) -> (TempDir, Arc<BlockSpillManager>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let manager = BlockSpillManager::new(SpillStorageConfig {
        local_dirs: vec![dir.path().to_path_buf()],
        ipc_compression: codec,
    })
    .expect("spill manager");
    (dir, Arc::new(manager))
}

/// A chunk of nullable Int64 columns named by `names`.
pub fn int64_chunk(names: &[&str], columns: Vec<Vec<Option<i64>>>) -> Chunk {
    let rows = columns.first().map(Vec::len).unwrap_or(0);
    let schema = Arc::new(Schema::new(
        names
            .iter()
            .map(|name| Field::new(*name, DataType::Int64, true))
            .collect::<Vec<_>>(),
    ));
    let arrays = columns
        .into_iter()
        .map(|values| Arc::new(Int64Array::from(values)) as ArrayRef)
        .collect();
    Chunk::try_new(schema, arrays, rows).expect("chunk")
}

/// A chunk with a nullable Utf8 key `k` and a nullable Int64 value `v`.
pub fn utf8_key_chunk(keys: Vec<Option<&str>>, values: Vec<Option<i64>>) -> Chunk {
    let rows = keys.len();
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, true),
        Field::new("v", DataType::Int64, true),
    ]));
    let arrays: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from(keys)),
        Arc::new(Int64Array::from(values)),
    ];
    Chunk::try_new(schema, arrays, rows).expect("chunk")
}

pub fn utf8_column(chunk: &Chunk, index: usize) -> Vec<Option<String>> {
    let column = chunk.batch.column(index);
    let column = column
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("Utf8 column");
    (0..column.len())
        .map(|row| (!column.is_null(row)).then(|| column.value(row).to_string()))
        .collect()
}

pub fn i64_column(chunk: &Chunk, index: usize) -> Vec<Option<i64>> {
    let column = chunk.batch.column(index);
    let column = column
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("Int64 column");
    (0..column.len())
        .map(|row| (!column.is_null(row)).then(|| column.value(row)))
        .collect()
}

/// `key -> values` over every row of `chunks`, for order-insensitive comparison.
pub fn rows_by_key(chunks: &[Chunk]) -> BTreeMap<Option<i64>, Vec<Option<i64>>> {
    let mut rows = BTreeMap::new();
    for chunk in chunks {
        let columns = (0..chunk.batch.num_columns())
            .map(|i| i64_column(chunk, i))
            .collect::<Vec<_>>();
        for row in 0..chunk.len() {
            let values = columns[1..].iter().map(|c| c[row]).collect();
            let previous = rows.insert(columns[0][row], values);
            assert!(previous.is_none(), "duplicate group {:?}", columns[0][row]);
        }
    }
    rows
}

/// Like `rows_by_key`, with the first `key_count` columns forming the key.
pub fn rows_by_keys(
    chunks: &[Chunk],
    key_count: usize,
) -> BTreeMap<Vec<Option<i64>>, Vec<Option<i64>>> {
    let mut rows = BTreeMap::new();
    for chunk in chunks {
        let columns = (0..chunk.batch.num_columns())
            .map(|i| i64_column(chunk, i))
            .collect::<Vec<_>>();
        for row in 0..chunk.len() {
            let key: Vec<_> = columns[..key_count].iter().map(|c| c[row]).collect();
            let values = columns[key_count..].iter().map(|c| c[row]).collect();
            let previous = rows.insert(key.clone(), values);
            assert!(previous.is_none(), "duplicate group {:?}", key);
        }
    }
    rows
}

/// Assert that a result is Err and return the error.
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(_) => panic!("Expected Err, got Ok"),
            Err(e) => e,
        }
    };
}
