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
//! Arrow IPC options for spill streams.

use std::fmt;
use std::str::FromStr;

use arrow::datatypes::{DataType, Schema};
use arrow::error::ArrowError;
use arrow::ipc::writer::IpcWriteOptions;
use arrow::ipc::{CompressionType, MetadataVersion};

const IPC_ALIGNMENT: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpillCodec {
    None,
    Lz4,
    Zstd,
}

impl FromStr for SpillCodec {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(SpillCodec::None),
            "lz4" | "lz4_frame" => Ok(SpillCodec::Lz4),
            "zstd" => Ok(SpillCodec::Zstd),
            _ => Err(format!("unsupported spill ipc compression: {value}")),
        }
    }
}

impl fmt::Display for SpillCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpillCodec::None => write!(f, "none"),
            SpillCodec::Lz4 => write!(f, "lz4"),
            SpillCodec::Zstd => write!(f, "zstd"),
        }
    }
}

pub fn build_ipc_write_options(codec: SpillCodec) -> Result<IpcWriteOptions, String> {
    let options = IpcWriteOptions::try_new(IPC_ALIGNMENT, false, MetadataVersion::V5)
        .map_err(map_arrow_err)?;
    match codec {
        SpillCodec::None => Ok(options),
        SpillCodec::Lz4 => options
            .try_with_compression(Some(CompressionType::LZ4_FRAME))
            .map_err(map_arrow_err),
        SpillCodec::Zstd => options
            .try_with_compression(Some(CompressionType::ZSTD))
            .map_err(map_arrow_err),
    }
}

/// Spill files never carry dictionary batches.
pub fn check_spill_schema(schema: &Schema) -> Result<(), String> {
    match schema
        .fields()
        .iter()
        .find(|field| data_type_has_dictionary(field.data_type()))
    {
        Some(field) => Err(format!(
            "dictionary-encoded column {} is not supported in spill IPC",
            field.name()
        )),
        None => Ok(()),
    }
}

fn data_type_has_dictionary(data_type: &DataType) -> bool {
    match data_type {
        DataType::Dictionary(_, _) => true,
        DataType::List(field) | DataType::LargeList(field) | DataType::FixedSizeList(field, _) => {
            data_type_has_dictionary(field.data_type())
        }
        DataType::Struct(fields) => fields
            .iter()
            .any(|field| data_type_has_dictionary(field.data_type())),
        DataType::Map(field, _) => data_type_has_dictionary(field.data_type()),
        _ => false,
    }
}

pub fn map_arrow_err(err: ArrowError) -> String {
    format!("arrow ipc error: {err}")
}
