// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// A counter that wraps modulo `2^bit_len_sequence`.
///
/// The counter starts at 0, so the first value handed out is 1. It is never
/// reset when the clock moves on; it only wraps.
///
/// Mutation takes `&mut self`: the generator keeps its counter behind the
/// same mutex as its last-seen tick, so every read-modify-write happens in
/// one critical section and two callers can never receive the same value
/// for the same tick.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    value: u64,
    limit: u64,
}

impl SequenceCounter {
    /// Create a counter for a sequence section of `bit_len_sequence` bits.
    pub fn new(bit_len_sequence: u8) -> Self {
        Self {
            value: 0,
            limit: 1 << bit_len_sequence,
        }
    }

    /// Advance the counter and return the new value, which is always in
    /// `[0, limit)`. A return value of 0 means the counter just wrapped.
    pub fn increment_and_wrap(&mut self) -> u64 {
        self.value = (self.value + 1) % self.limit;
        self.value
    }

    /// The last value handed out.
    pub fn current(&self) -> u64 {
        self.value
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}
