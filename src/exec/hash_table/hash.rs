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

/// Fixed seed for group-key hashing. Spill partitioning reads the top bits of these
/// hashes, so they must not vary between runs or spill rounds.
pub(crate) const AGG_HASH_SEED: u64 = 0x5bd1_e995_9e37_79b9;

pub(crate) fn combine_hash(acc: u64, value_hash: u64) -> u64 {
    acc ^ value_hash
        .wrapping_add(0x9e3779b97f4a7c15)
        .wrapping_add(acc << 6)
        .wrapping_add(acc >> 2)
}

pub(crate) fn hash_u64_with_seed(seed: u64, value: u64) -> u64 {
    mix_u64(seed ^ value)
}

pub(crate) fn hash_i128_with_seed(seed: u64, value: i128) -> u64 {
    let value = value as u128;
    let low_hash = hash_u64_with_seed(seed, value as u64);
    let high_hash = hash_u64_with_seed(seed, (value >> 64) as u64);
    combine_hash(low_hash, high_hash)
}

/// FNV-1a over the bytes, finished with a 64-bit mix so the high bits are usable.
pub(crate) fn hash_bytes_with_seed(seed: u64, bytes: &[u8]) -> u64 {
    let mut hash = seed ^ 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    mix_u64(hash)
}

pub(crate) fn hash_null_with_seed(seed: u64) -> u64 {
    hash_u64_with_seed(seed, 0x9e3779b97f4a7c15)
}

pub(crate) fn canonical_f64_bits(bits: u64) -> u64 {
    let value = f64::from_bits(bits);
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0f64.to_bits()
    } else {
        bits
    }
}

pub(crate) fn canonical_f32_bits(bits: u32) -> u32 {
    let value = f32::from_bits(bits);
    if value.is_nan() {
        f32::NAN.to_bits()
    } else if value == 0.0 {
        0.0f32.to_bits()
    } else {
        bits
    }
}

fn mix_u64(mut value: u64) -> u64 {
    value = value.wrapping_add(0x9e3779b97f4a7c15);
    value = (value ^ (value >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    value = (value ^ (value >> 27)).wrapping_mul(0x94d049bb133111eb);
    value ^ (value >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_zero_and_nan_are_canonical() {
        assert_eq!(
            canonical_f64_bits((-0.0f64).to_bits()),
            canonical_f64_bits(0.0f64.to_bits())
        );
        let other_nan = f64::from_bits(f64::NAN.to_bits() | 1);
        assert_eq!(canonical_f64_bits(other_nan.to_bits()), f64::NAN.to_bits());
        assert_eq!(
            canonical_f32_bits((-0.0f32).to_bits()),
            canonical_f32_bits(0.0f32.to_bits())
        );
    }

    #[test]
    fn hashes_are_stable() {
        assert_eq!(
            hash_u64_with_seed(AGG_HASH_SEED, 42),
            hash_u64_with_seed(AGG_HASH_SEED, 42)
        );
        assert_ne!(
            hash_bytes_with_seed(AGG_HASH_SEED, b"ab"),
            hash_bytes_with_seed(AGG_HASH_SEED, b"ba")
        );
        assert_ne!(hash_i128_with_seed(AGG_HASH_SEED, 1), hash_i128_with_seed(AGG_HASH_SEED, 1 << 64));
    }
}
