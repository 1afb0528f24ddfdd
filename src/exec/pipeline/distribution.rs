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
//! Input partitioning an operator asks the local exchange layer for.

use std::fmt;

use crate::exec::expr::ExprId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocalExchangeType {
    /// Keep whatever partitioning the input already has.
    Noop,
    /// Spread rows across drivers without regard to content.
    Passthrough,
    HashShuffle,
    /// Hash by the storage bucketing of a colocated table.
    BucketHashShuffle,
}

impl fmt::Display for LocalExchangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocalExchangeType::Noop => "NOOP",
            LocalExchangeType::Passthrough => "PASSTHROUGH",
            LocalExchangeType::HashShuffle => "HASH_SHUFFLE",
            LocalExchangeType::BucketHashShuffle => "BUCKET_HASH_SHUFFLE",
        };
        f.write_str(name)
    }
}

/// Exchange type plus the expressions a hash shuffle partitions by.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalExchangeDesc {
    pub exchange_type: LocalExchangeType,
    pub shuffle_exprs: Vec<ExprId>,
}
