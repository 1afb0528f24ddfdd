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

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKeyStrategy {
    /// No grouping keys (scalar aggregation).
    Scalar,
    /// Single fixed-width key, stored as an integer of this many bytes.
    OneNumber(usize),
    /// Row-format encoding of all key columns (multiple keys or variable width).
    Serialized,
}

pub fn pick_group_key_strategy(types: &[DataType]) -> Result<GroupKeyStrategy, String> {
    for data_type in types {
        if !is_supported_key_type(data_type) {
            return Err(format!("unsupported group by key type: {:?}", data_type));
        }
    }
    if types.is_empty() {
        return Ok(GroupKeyStrategy::Scalar);
    }
    if types.len() == 1
        && let Some(width) = fixed_width_size(&types[0])
    {
        return Ok(GroupKeyStrategy::OneNumber(width));
    }
    Ok(GroupKeyStrategy::Serialized)
}

fn is_supported_key_type(data_type: &DataType) -> bool {
    !matches!(
        data_type,
        DataType::Null
            | DataType::Dictionary(_, _)
            | DataType::RunEndEncoded(_, _)
            | DataType::Union(_, _)
            | DataType::Map(_, _)
    )
}

pub fn fixed_width_size(data_type: &DataType) -> Option<usize> {
    let width = match data_type {
        DataType::Int8 | DataType::UInt8 => 1,
        DataType::Int16 | DataType::UInt16 => 2,
        DataType::Int32 | DataType::UInt32 | DataType::Float32 | DataType::Date32 => 4,
        DataType::Int64
        | DataType::UInt64
        | DataType::Float64
        | DataType::Date64
        | DataType::Timestamp(_, _) => 8,
        DataType::Decimal128(_, _) => 16,
        _ => return None,
    };
    Some(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_shape_from_key_types() {
        assert_eq!(pick_group_key_strategy(&[]), Ok(GroupKeyStrategy::Scalar));
        assert_eq!(
            pick_group_key_strategy(&[DataType::Int32]),
            Ok(GroupKeyStrategy::OneNumber(4))
        );
        assert_eq!(
            pick_group_key_strategy(&[DataType::Decimal128(20, 2)]),
            Ok(GroupKeyStrategy::OneNumber(16))
        );
        assert_eq!(
            pick_group_key_strategy(&[DataType::Utf8]),
            Ok(GroupKeyStrategy::Serialized)
        );
        assert_eq!(
            pick_group_key_strategy(&[DataType::Int8, DataType::Int8]),
            Ok(GroupKeyStrategy::Serialized)
        );
        assert_eq!(
            pick_group_key_strategy(&[DataType::Boolean]),
            Ok(GroupKeyStrategy::Serialized)
        );
    }

    #[test]
    fn null_typed_key_is_a_configuration_error() {
        let err = pick_group_key_strategy(&[DataType::Int32, DataType::Null]).expect_err("null");
        assert!(err.contains("unsupported group by key type"), "err={err}");
    }
}
