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
use arrow::datatypes::DataType;

use super::AggFunction;
use super::functions::{self, AggKind};

/// Resolved, type-specialized description of one aggregate call.
#[derive(Clone, Debug)]
pub struct AggSpec {
    pub(super) kind: AggKind,
    pub output_type: DataType,
    pub intermediate_type: DataType,
    /// Type raw inputs are cast to before update. `None` for COUNT and merge inputs.
    pub input_cast: Option<DataType>,
    pub count_all: bool,
}

pub(super) fn build_spec_from_type(
    func: &AggFunction,
    input_type: Option<&DataType>,
) -> Result<AggSpec, String> {
    let mut spec = functions::build_spec_from_type(func, input_type)?;
    if func.input_is_intermediate {
        spec.input_cast = None;
        if let Some(data_type) = input_type
            && data_type != &spec.intermediate_type
        {
            return Err(format!(
                "{} merge input type {:?} does not match intermediate type {:?}",
                func.name, data_type, spec.intermediate_type
            ));
        }
    }
    Ok(spec)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum NumericClass {
    Int,
    Float,
}

pub(super) fn numeric_class(data_type: &DataType) -> Option<NumericClass> {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => Some(NumericClass::Int),
        DataType::Float32 | DataType::Float64 => Some(NumericClass::Float),
        _ => None,
    }
}
