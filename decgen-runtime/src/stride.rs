// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Storage layout of encoded blobs.
//!
//! Blobs kept in word-addressed storage are optionally preceded by a
//! big-endian length prefix and zero padded to a whole number of slots.

use crate::{put_be_word, EncodeError, U256, WORD_SIZE};

/// Number of 32-byte slots needed to hold `length` bytes.
pub fn slot_count(length: usize) -> usize {
    length.div_ceil(WORD_SIZE)
}

/// Prepend a `prefix_size` byte length prefix to the blob, and pad
/// the result with zeros to a multiple of 32 bytes.
///
/// The prefix holds the total length of the prefixed blob, i.e.
/// `blob.len() + prefix_size`. A `prefix_size` of zero returns the
/// blob unchanged.
pub fn with_length_prefix(blob: &[u8], prefix_size: usize) -> Result<Vec<u8>, EncodeError> {
    if prefix_size == 0 {
        return Ok(blob.to_vec());
    }

    let length = blob.len() + prefix_size;
    let overflow = EncodeError::PrefixOverflow { length, width: prefix_size };
    if prefix_size > WORD_SIZE {
        return Err(overflow);
    }
    let length_word = U256::from(length);
    if length_word.bit_len() > 8 * prefix_size {
        return Err(overflow);
    }

    let mut out = Vec::with_capacity(slot_count(length) * WORD_SIZE);
    put_be_word(length_word, prefix_size, &mut out);
    out.extend_from_slice(blob);
    out.resize(slot_count(length) * WORD_SIZE, 0);
    Ok(out)
}
