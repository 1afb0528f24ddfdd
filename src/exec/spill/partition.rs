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
use crate::common::app_config::MAX_SPILL_PARTITION_COUNT_BITS;

/// Maps a 64-bit key hash to one of `1 << bits` spill partitions.
///
/// The top bits are used so partitioning stays independent of the low bits the
/// hash table probes with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpillPartitionHelper {
    bits: u32,
}

impl SpillPartitionHelper {
    pub fn new(bits: u32) -> Result<Self, String> {
        if bits > MAX_SPILL_PARTITION_COUNT_BITS {
            return Err(format!(
                "spill partition count bits {} exceeds {}",
                bits, MAX_SPILL_PARTITION_COUNT_BITS
            ));
        }
        Ok(Self { bits })
    }

    pub fn partition_count_bits(&self) -> u32 {
        self.bits
    }

    pub fn partition_count(&self) -> usize {
        1usize << self.bits
    }

    pub fn get_index(&self, hash: u64) -> usize {
        if self.bits == 0 {
            return 0;
        }
        (hash >> (64 - self.bits)) as usize
    }

    pub fn last_partition(&self) -> usize {
        self.partition_count() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::hash_table::hash::{AGG_HASH_SEED, hash_u64_with_seed};

    #[test]
    fn index_is_stable_and_in_range() {
        let helper = SpillPartitionHelper::new(2).expect("helper");
        assert_eq!(helper.partition_count(), 4);
        for key in 0u64..1000 {
            let hash = hash_u64_with_seed(AGG_HASH_SEED, key);
            let first = helper.get_index(hash);
            assert!(first < 4);
            assert_eq!(first, helper.get_index(hash));
            let again = SpillPartitionHelper::new(2).expect("helper");
            assert_eq!(first, again.get_index(hash));
        }
    }

    #[test]
    fn uses_top_bits() {
        let helper = SpillPartitionHelper::new(4).expect("helper");
        assert_eq!(helper.get_index(0xF000_0000_0000_0000), 15);
        assert_eq!(helper.get_index(0x0FFF_FFFF_FFFF_FFFF), 0);
        assert_eq!(helper.last_partition(), 15);
    }

    #[test]
    fn zero_bits_is_one_partition() {
        let helper = SpillPartitionHelper::new(0).expect("helper");
        assert_eq!(helper.partition_count(), 1);
        assert_eq!(helper.get_index(u64::MAX), 0);
    }

    #[test]
    fn rejects_too_many_bits() {
        assert!(SpillPartitionHelper::new(MAX_SPILL_PARTITION_COUNT_BITS + 1).is_err());
    }
}
