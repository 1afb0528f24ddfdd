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
//! Local-disk spill streams.
//!
//! Each stream is one file holding an Arrow IPC stream. Files are created with
//! `create_new` in a round-robin spill directory and removed explicitly.
//!
//! Current limitations:
//! - No per-directory capacity accounting.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::{IpcWriteOptions, StreamWriter};

use crate::common::config;
use crate::exec::chunk::{Chunk, record_batch_bytes};
use crate::exec::spill::dir_manager::DirManager;
use crate::exec::spill::ipc_serde::{
    SpillCodec, build_ipc_write_options, check_spill_schema, map_arrow_err,
};
use crate::exec::spill::{
    SpillProfile, SpillStreamId, SpillStreamManager, SpillStreamReader, SpillStreamWriter,
};
use crate::hashagg_logging::debug;

#[derive(Debug, Clone)]
pub struct SpillStorageConfig {
    pub local_dirs: Vec<PathBuf>,
    pub ipc_compression: SpillCodec,
}

impl SpillStorageConfig {
    pub fn from_app_config() -> Result<Self, String> {
        if !config::spill_enable() {
            return Err("spill storage is disabled in config".to_string());
        }
        Ok(Self {
            local_dirs: config::spill_local_dirs()
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            ipc_compression: config::spill_ipc_compression().parse()?,
        })
    }
}

#[derive(Debug)]
pub struct BlockSpillManager {
    dir_manager: DirManager,
    write_options: IpcWriteOptions,
    next_id: AtomicU64,
    pid: u32,
    streams: Mutex<HashMap<SpillStreamId, PathBuf>>,
}

impl BlockSpillManager {
    pub fn new(config: SpillStorageConfig) -> Result<Self, String> {
        Ok(Self {
            dir_manager: DirManager::new(config.local_dirs)?,
            write_options: build_ipc_write_options(config.ipc_compression)?,
            next_id: AtomicU64::new(0),
            pid: std::process::id(),
            streams: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_app_config() -> Result<Arc<Self>, String> {
        Ok(Arc::new(Self::new(SpillStorageConfig::from_app_config()?)?))
    }

    /// Path of a live stream.
    pub fn stream_path(&self, id: SpillStreamId) -> Result<PathBuf, String> {
        let streams = self
            .streams
            .lock()
            .map_err(|_| "spill stream registry lock poisoned".to_string())?;
        streams
            .get(&id)
            .cloned()
            .ok_or_else(|| format!("unknown spill stream {id}"))
    }

    pub fn num_streams(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn create_stream_file(&self) -> Result<(SpillStreamId, PathBuf, File), String> {
        let mut attempts = 0;
        loop {
            let id = SpillStreamId(self.next_id.fetch_add(1, Ordering::AcqRel));
            let path = self
                .dir_manager
                .next_dir()
                .join(format!("spill_{:x}_{}.ipc", self.pid, id));
            let file = OpenOptions::new().create_new(true).write(true).open(&path);
            match file {
                Ok(file) => return Ok((id, path, file)),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists && attempts < 3 => {
                    attempts += 1;
                }
                Err(err) => {
                    return Err(format!(
                        "create spill file {} failed: {err}",
                        path.display()
                    ));
                }
            }
        }
    }
}

impl SpillStreamManager for BlockSpillManager {
    fn get_writer(
        &self,
        max_batch_rows: usize,
        profile: &SpillProfile,
    ) -> Result<Box<dyn SpillStreamWriter>, String> {
        let (id, path, file) = self.create_stream_file()?;
        self.streams
            .lock()
            .map_err(|_| "spill stream registry lock poisoned".to_string())?
            .insert(id, path.clone());
        profile.spill_stream_count.add(1);
        debug!("spill stream {} created at {}", id, path.display());
        Ok(Box::new(BlockSpillWriter {
            id,
            path,
            file: Some(file),
            writer: None,
            write_options: self.write_options.clone(),
            max_batch_rows: max_batch_rows.max(1),
            profile: profile.clone(),
            closed: false,
        }))
    }

    fn get_reader(&self, id: SpillStreamId) -> Result<Box<dyn SpillStreamReader>, String> {
        let path = self.stream_path(id)?;
        let file = File::open(&path)
            .map_err(|e| format!("open spill file {} failed: {e}", path.display()))?;
        let empty = file
            .metadata()
            .map_err(|e| format!("stat spill file {} failed: {e}", path.display()))?
            .len()
            == 0;
        let reader = if empty {
            None
        } else {
            Some(StreamReader::try_new(BufReader::new(file), None).map_err(map_arrow_err)?)
        };
        Ok(Box::new(BlockSpillReader { id, reader }))
    }

    fn remove(&self, id: SpillStreamId) -> Result<(), String> {
        let path = self
            .streams
            .lock()
            .map_err(|_| "spill stream registry lock poisoned".to_string())?
            .remove(&id);
        let Some(path) = path else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(format!(
                "remove spill file {} failed: {err}",
                path.display()
            )),
        }
    }
}

struct BlockSpillWriter {
    id: SpillStreamId,
    path: PathBuf,
    file: Option<File>,
    writer: Option<StreamWriter<BufWriter<File>>>,
    write_options: IpcWriteOptions,
    max_batch_rows: usize,
    profile: SpillProfile,
    closed: bool,
}

impl BlockSpillWriter {
    fn ensure_writer(
        &mut self,
        chunk: &Chunk,
    ) -> Result<&mut StreamWriter<BufWriter<File>>, String> {
        let id = self.id;
        if self.writer.is_none() {
            let schema = chunk.schema();
            check_spill_schema(schema.as_ref())?;
            let file = self
                .file
                .take()
                .ok_or_else(|| format!("spill stream {id} has no open file"))?;
            let writer = StreamWriter::try_new_with_options(
                BufWriter::new(file),
                schema.as_ref(),
                self.write_options.clone(),
            )
            .map_err(map_arrow_err)?;
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| format!("spill stream {id} writer missing"))
    }
}

impl SpillStreamWriter for BlockSpillWriter {
    fn id(&self) -> SpillStreamId {
        self.id
    }

    /// Chunks larger than `max_batch_rows` are split into several IPC batches.
    fn write(&mut self, chunk: &Chunk) -> Result<(), String> {
        if self.closed {
            return Err(format!("spill stream {} is already closed", self.id));
        }
        let max_batch_rows = self.max_batch_rows;
        let profile = self.profile.clone();
        let writer = self.ensure_writer(chunk)?;
        let mut pieces = Vec::new();
        if chunk.len() <= max_batch_rows {
            pieces.push(chunk.batch.clone());
        } else {
            let mut offset = 0;
            while offset < chunk.len() {
                let len = max_batch_rows.min(chunk.len() - offset);
                pieces.push(chunk.batch.slice(offset, len));
                offset += len;
            }
        }
        for batch in &pieces {
            writer.write(batch).map_err(map_arrow_err)?;
            profile.spill_block_count.add(1);
            profile.spill_rows.add(batch.num_rows() as i64);
            profile.spill_bytes.add(record_batch_bytes(batch) as i64);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.file = None;
        if let Some(writer) = self.writer.take() {
            writer
                .into_inner()
                .map_err(|e| format!("close spill file {} failed: {e}", self.path.display()))?;
        }
        Ok(())
    }
}

impl Drop for BlockSpillWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct BlockSpillReader {
    id: SpillStreamId,
    reader: Option<StreamReader<BufReader<File>>>,
}

impl SpillStreamReader for BlockSpillReader {
    fn id(&self) -> SpillStreamId {
        self.id
    }

    fn read_next(&mut self) -> Result<Option<Chunk>, String> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        match reader.next() {
            Some(batch) => Ok(Some(Chunk::new(batch.map_err(map_arrow_err)?))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::profile::RuntimeProfile;
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn manager(dir: &std::path::Path, codec: SpillCodec) -> BlockSpillManager {
        BlockSpillManager::new(SpillStorageConfig {
            local_dirs: vec![dir.to_path_buf()],
            ipc_compression: codec,
        })
        .expect("manager")
    }

    fn chunk(keys: Vec<i64>, names: Vec<&str>) -> Chunk {
        let schema = Arc::new(Schema::new(vec![
            Field::new("k", DataType::Int64, true),
            Field::new("v", DataType::Utf8, true),
        ]));
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(keys)),
            Arc::new(StringArray::from(names)),
        ];
        let rows = columns[0].len();
        Chunk::try_new(schema, columns, rows).expect("chunk")
    }

    #[test]
    fn writes_and_reads_back_in_order_including_empty_chunks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), SpillCodec::Lz4);
        let profile = SpillProfile::new(&RuntimeProfile::new("test"));
        let mut writer = manager.get_writer(usize::MAX, &profile).expect("writer");
        let first = chunk(vec![1, 2], vec!["a", "b"]);
        writer.write(&first).expect("write");
        writer.write(&first.clone_empty()).expect("write empty");
        writer.write(&chunk(vec![3], vec!["c"])).expect("write");
        writer.close().expect("close");
        writer.close().expect("second close");
        assert_eq!(profile.spill_block_count.value(), 3);
        assert_eq!(profile.spill_rows.value(), 3);

        let mut reader = manager.get_reader(writer.id()).expect("reader");
        let lens: Vec<usize> = std::iter::from_fn(|| reader.read_next().expect("read"))
            .map(|c| c.len())
            .collect();
        assert_eq!(lens, vec![2, 0, 1]);
    }

    #[test]
    fn large_chunks_are_split_by_max_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), SpillCodec::None);
        let profile = SpillProfile::new(&RuntimeProfile::new("test"));
        let mut writer = manager.get_writer(2, &profile).expect("writer");
        writer
            .write(&chunk(vec![1, 2, 3, 4, 5], vec!["a", "b", "c", "d", "e"]))
            .expect("write");
        writer.close().expect("close");
        let mut reader = manager.get_reader(writer.id()).expect("reader");
        let mut lens = Vec::new();
        while let Some(c) = reader.read_next().expect("read") {
            lens.push(c.len());
        }
        assert_eq!(lens, vec![2, 2, 1]);
    }

    #[test]
    fn stream_without_writes_reads_as_empty_and_remove_deletes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), SpillCodec::Zstd);
        let profile = SpillProfile::new(&RuntimeProfile::new("test"));
        let mut writer = manager.get_writer(16, &profile).expect("writer");
        writer.close().expect("close");
        let id = writer.id();
        let path = manager.stream_path(id).expect("path");
        assert!(path.exists());
        assert!(manager.get_reader(id).expect("reader").read_next().expect("read").is_none());

        manager.remove(id).expect("remove");
        assert!(!path.exists());
        assert!(manager.get_reader(id).is_err());
        manager.remove(id).expect("remove twice");
    }

    #[test]
    fn write_after_close_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(dir.path(), SpillCodec::None);
        let profile = SpillProfile::new(&RuntimeProfile::new("test"));
        let mut writer = manager.get_writer(16, &profile).expect("writer");
        writer.close().expect("close");
        assert!(writer.write(&chunk(vec![1], vec!["a"])).is_err());
    }
}
