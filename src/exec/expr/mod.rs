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
pub mod agg;

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, new_null_array,
};
use arrow::compute::cast;
use arrow::datatypes::DataType;

use crate::exec::chunk::Chunk;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ExprId(pub usize);

#[derive(Clone, Debug)]
pub enum LiteralValue {
    Null,
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Utf8(String),
}

#[derive(Clone, Debug)]
pub enum ExprNode {
    Literal(LiteralValue),
    /// Input column by position in the incoming chunk.
    ColumnRef(usize),
    /// Cast child to this node's declared type.
    Cast(ExprId),
}

/// Flat storage for expression trees, addressed by `ExprId`.
#[derive(Clone, Debug, Default)]
pub struct ExprArena {
    nodes: Vec<ExprNode>,
    types: Vec<DataType>,
}

impl ExprArena {
    pub fn push_typed(&mut self, node: ExprNode, data_type: DataType) -> ExprId {
        let id = ExprId(self.nodes.len());
        self.nodes.push(node);
        self.types.push(data_type);
        id
    }

    pub fn column_ref(&mut self, index: usize, data_type: DataType) -> ExprId {
        self.push_typed(ExprNode::ColumnRef(index), data_type)
    }

    pub fn literal(&mut self, value: LiteralValue, data_type: DataType) -> ExprId {
        self.push_typed(ExprNode::Literal(value), data_type)
    }

    pub fn cast(&mut self, child: ExprId, data_type: DataType) -> ExprId {
        self.push_typed(ExprNode::Cast(child), data_type)
    }

    pub fn node(&self, id: ExprId) -> Option<&ExprNode> {
        self.nodes.get(id.0)
    }

    pub fn data_type(&self, id: ExprId) -> Option<&DataType> {
        self.types.get(id.0)
    }

    pub fn eval(&self, id: ExprId, chunk: &Chunk) -> Result<ArrayRef, String> {
        let node = self
            .nodes
            .get(id.0)
            .ok_or_else(|| "invalid ExprId".to_string())?;
        let target_type = self
            .data_type(id)
            .ok_or_else(|| "invalid ExprId".to_string())?;
        match node {
            ExprNode::Literal(v) => eval_literal(v, target_type, chunk.len()),
            ExprNode::ColumnRef(index) => {
                let column = chunk.column(*index)?;
                if column.data_type() != target_type {
                    return Err(format!(
                        "column {} type mismatch: expected {:?}, got {:?}",
                        index,
                        target_type,
                        column.data_type()
                    ));
                }
                Ok(column)
            }
            ExprNode::Cast(child) => {
                let input = self.eval(*child, chunk)?;
                if input.data_type() == target_type {
                    return Ok(input);
                }
                cast(&input, target_type).map_err(|e| {
                    format!(
                        "cast failed from {:?} to {:?}: {}",
                        input.data_type(),
                        target_type,
                        e
                    )
                })
            }
        }
    }
}

fn eval_literal(value: &LiteralValue, target_type: &DataType, len: usize) -> Result<ArrayRef, String> {
    let out: ArrayRef = match value {
        LiteralValue::Null => return Ok(new_null_array(target_type, len)),
        LiteralValue::Int64(v) => Arc::new(Int64Array::from(vec![*v; len])),
        LiteralValue::Float64(v) => Arc::new(Float64Array::from(vec![*v; len])),
        LiteralValue::Bool(v) => Arc::new(BooleanArray::from(vec![*v; len])),
        LiteralValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); len])),
    };
    if out.data_type() == target_type {
        return Ok(out);
    }
    cast(&out, target_type).map_err(|e| {
        format!(
            "literal cast failed from {:?} to {:?}: {}",
            out.data_type(),
            target_type,
            e
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int32Array};
    use arrow::datatypes::{Field, Schema};

    fn int32_chunk() -> Chunk {
        let schema = Arc::new(Schema::new(vec![Field::new("k", DataType::Int32, true)]));
        Chunk::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))], 3).expect("chunk")
    }

    #[test]
    fn column_ref_checks_declared_type() {
        let mut arena = ExprArena::default();
        let ok = arena.column_ref(0, DataType::Int32);
        let bad = arena.column_ref(0, DataType::Int64);
        let chunk = int32_chunk();
        assert_eq!(arena.eval(ok, &chunk).expect("eval").len(), 3);
        let err = arena.eval(bad, &chunk).expect_err("mismatch");
        assert!(err.contains("type mismatch"), "err={err}");
    }

    #[test]
    fn cast_and_literal_follow_row_count() {
        let mut arena = ExprArena::default();
        let col = arena.column_ref(0, DataType::Int32);
        let widened = arena.cast(col, DataType::Int64);
        let lit = arena.literal(LiteralValue::Int64(7), DataType::Int32);
        let chunk = int32_chunk();
        assert_eq!(
            arena.eval(widened, &chunk).expect("cast").data_type(),
            &DataType::Int64
        );
        let lit = arena.eval(lit, &chunk).expect("literal");
        assert_eq!(lit.len(), 3);
        assert_eq!(lit.data_type(), &DataType::Int32);
    }
}
