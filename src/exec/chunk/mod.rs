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
use std::collections::HashSet;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, RecordBatchOptions, UInt32Array};
use arrow::buffer::Buffer;
use arrow::compute::{concat_batches, take};
use arrow::datatypes::{Schema, SchemaRef};

/// A chunk of rows: a thin wrapper around an Arrow `RecordBatch`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub batch: RecordBatch,
}

impl Chunk {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// Build a chunk from columns; `num_rows` is needed when `columns` is empty.
    pub fn try_new(
        schema: SchemaRef,
        columns: Vec<ArrayRef>,
        num_rows: usize,
    ) -> Result<Self, String> {
        let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
        let batch = RecordBatch::try_new_with_options(schema, columns, &options)
            .map_err(|e| format!("build chunk failed: {e}"))?;
        Ok(Self { batch })
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            batch: RecordBatch::new_empty(schema),
        }
    }

    /// An empty chunk with this chunk's schema.
    pub fn clone_empty(&self) -> Self {
        Self::empty(self.schema())
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn len(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    pub fn columns(&self) -> &[ArrayRef] {
        self.batch.columns()
    }

    pub fn column(&self, index: usize) -> Result<ArrayRef, String> {
        self.batch.columns().get(index).cloned().ok_or_else(|| {
            format!(
                "column index {} out of range (num_columns={})",
                index,
                self.batch.num_columns()
            )
        })
    }

    pub fn slice(&self, offset: usize, length: usize) -> Self {
        Self {
            batch: self.batch.slice(offset, length),
        }
    }

    /// Gather rows by position into a new chunk.
    pub fn take(&self, indices: &UInt32Array) -> Result<Self, String> {
        let columns = self
            .batch
            .columns()
            .iter()
            .map(|c| take(c.as_ref(), indices, None).map_err(|e| format!("take rows: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        Self::try_new(self.schema(), columns, indices.len())
    }

    pub fn estimated_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    pub fn logical_bytes(&self) -> usize {
        record_batch_bytes(&self.batch)
    }
}

/// Row-range accumulator used to assemble output chunks from slices of others.
///
/// `add_rows` keeps a zero-copy slice; `to_chunk` concatenates once.
#[derive(Debug)]
pub struct MutableChunk {
    schema: SchemaRef,
    pieces: Vec<RecordBatch>,
    num_rows: usize,
}

impl MutableChunk {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            pieces: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.num_rows
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Append rows `[begin, begin + len)` of `src`.
    pub fn add_rows(&mut self, src: &Chunk, begin: usize, len: usize) -> Result<(), String> {
        if len == 0 {
            return Ok(());
        }
        if !schemas_compatible(&self.schema, src.schema().as_ref()) {
            return Err(format!(
                "add_rows schema mismatch: target={:?} source={:?}",
                self.schema,
                src.schema()
            ));
        }
        let end = begin
            .checked_add(len)
            .filter(|end| *end <= src.len())
            .ok_or_else(|| {
                format!(
                    "add_rows range out of bounds: begin={} len={} rows={}",
                    begin,
                    len,
                    src.len()
                )
            })?;
        self.pieces.push(src.batch.slice(begin, end - begin));
        self.num_rows += len;
        Ok(())
    }

    pub fn to_chunk(&self) -> Result<Chunk, String> {
        if self.pieces.is_empty() {
            return Ok(Chunk::empty(Arc::clone(&self.schema)));
        }
        let batch = concat_batches(&self.schema, &self.pieces)
            .map_err(|e| format!("concat chunk pieces: {e}"))?;
        Ok(Chunk::new(batch))
    }

    pub fn clear(&mut self) {
        self.pieces.clear();
        self.num_rows = 0;
    }
}

fn schemas_compatible(a: &Schema, b: &Schema) -> bool {
    a.fields().len() == b.fields().len()
        && a.fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(l, r)| l.data_type() == r.data_type())
}

/// Estimate RecordBatch size by summing unique buffers inside the batch.
///
/// Buffers are de-duplicated only within one batch.
pub fn record_batch_bytes(batch: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    for column in batch.columns() {
        total = total.saturating_add(array_data_bytes(&column.to_data(), &mut seen));
    }
    total
}

fn array_data_bytes(data: &arrow::array::ArrayData, seen: &mut HashSet<usize>) -> usize {
    let mut total = 0usize;
    for buffer in data.buffers() {
        total = total.saturating_add(buffer_bytes(buffer, seen));
    }
    if let Some(nulls) = data.nulls() {
        total = total.saturating_add(buffer_bytes(nulls.buffer(), seen));
    }
    for child in data.child_data() {
        total = total.saturating_add(array_data_bytes(child, seen));
    }
    total
}

fn buffer_bytes(buffer: &Buffer, seen: &mut HashSet<usize>) -> usize {
    let ptr = buffer.data_ptr().as_ptr() as usize;
    if !seen.insert(ptr) {
        return 0;
    }
    buffer.capacity().max(buffer.len())
}
