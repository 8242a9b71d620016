// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::error::Error;

/// default bit length of the whole id
pub const DEFAULT_TOTAL_BITS: u8 = 64;
/// default bit length of time
pub const DEFAULT_BIT_LEN_TIME: u8 = 41;
/// default bit length of machine id
pub const DEFAULT_BIT_LEN_MACHINE_ID: u8 = 10;

/// The division of an id into timestamp, machine id and sequence sections.
///
/// From most to least significant bit the layout is
/// `| time | machine id | sequence |`. Any bits above `total_bits` are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitLayout {
    total_bits: u8,
    bit_len_time: u8,
    bit_len_machine_id: u8,
    bit_len_sequence: u8,
}

impl Default for BitLayout {
    fn default() -> Self {
        Self {
            total_bits: DEFAULT_TOTAL_BITS,
            bit_len_time: DEFAULT_BIT_LEN_TIME,
            bit_len_machine_id: DEFAULT_BIT_LEN_MACHINE_ID,
            bit_len_sequence: DEFAULT_TOTAL_BITS - DEFAULT_BIT_LEN_TIME - DEFAULT_BIT_LEN_MACHINE_ID,
        }
    }
}

impl BitLayout {
    /// Validate the given bit lengths.
    ///
    /// When `bit_len_sequence` is `None`, the sequence section takes whatever
    /// `total_bits` leaves after the time and machine id sections.
    pub fn new(
        total_bits: u8,
        bit_len_time: u8,
        bit_len_machine_id: u8,
        bit_len_sequence: Option<u8>,
    ) -> Result<Self, Error> {
        if total_bits > 64 {
            return Err(Error::TotalBitsTooWide(total_bits));
        }
        if bit_len_time == 0 {
            return Err(Error::ZeroTimestampBits);
        }

        let invalid = || {
            Error::InvalidBitLength(
                bit_len_time,
                bit_len_machine_id,
                bit_len_sequence.unwrap_or(0),
                total_bits,
            )
        };
        let fixed = u16::from(bit_len_time) + u16::from(bit_len_machine_id);
        let bit_len_sequence = match bit_len_sequence {
            Some(bits) if fixed + u16::from(bits) == u16::from(total_bits) => bits,
            Some(_) => return Err(invalid()),
            None => u16::from(total_bits)
                .checked_sub(fixed)
                .map(|bits| bits as u8)
                .ok_or_else(invalid)?,
        };

        Ok(Self {
            total_bits,
            bit_len_time,
            bit_len_machine_id,
            bit_len_sequence,
        })
    }

    pub fn total_bits(&self) -> u8 {
        self.total_bits
    }

    pub fn bit_len_time(&self) -> u8 {
        self.bit_len_time
    }

    pub fn bit_len_machine_id(&self) -> u8 {
        self.bit_len_machine_id
    }

    pub fn bit_len_sequence(&self) -> u8 {
        self.bit_len_sequence
    }

    /// Shift of the time section, i.e. the width of everything below it.
    pub fn time_shift(&self) -> u8 {
        self.bit_len_machine_id + self.bit_len_sequence
    }

    /// Shift of the machine id section.
    pub fn machine_id_shift(&self) -> u8 {
        self.bit_len_sequence
    }

    /// Number of distinct sequence values, `2^bit_len_sequence`.
    pub fn sequence_limit(&self) -> u64 {
        1 << self.bit_len_sequence
    }

    /// Number of distinct machine ids, `2^bit_len_machine_id`.
    pub fn machine_id_limit(&self) -> u64 {
        1 << self.bit_len_machine_id
    }

    /// Largest timestamp the time section can hold.
    pub fn max_time(&self) -> u64 {
        mask(self.bit_len_time)
    }

    /// Pack the three sections into one id.
    ///
    /// Callers keep every part within its section; extra high bits are masked
    /// off rather than bleeding into the neighbouring section.
    pub fn compose(&self, time: u64, machine_id: u64, sequence: u64) -> u64 {
        ((time & self.max_time()) << self.time_shift())
            | ((machine_id & mask(self.bit_len_machine_id)) << self.machine_id_shift())
            | (sequence & mask(self.bit_len_sequence))
    }

    /// Break an id up into its parts.
    pub fn decompose(&self, id: u64) -> DecomposedSnowflake {
        DecomposedSnowflake {
            id,
            time: (id >> self.time_shift()) & self.max_time(),
            machine_id: (id >> self.machine_id_shift()) & mask(self.bit_len_machine_id),
            sequence: id & mask(self.bit_len_sequence),
        }
    }
}

/// Low `bits` bits set.
fn mask(bits: u8) -> u64 {
    match bits {
        0 => 0,
        64..=u8::MAX => u64::MAX,
        bits => u64::MAX >> (64 - bits),
    }
}

/// DecomposedSnowflake is the parts of an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecomposedSnowflake {
    pub id: u64,
    pub time: u64,
    pub machine_id: u64,
    pub sequence: u64,
}

impl DecomposedSnowflake {
    /// Returns the timestamp in milliseconds since the Unix epoch, given the
    /// epoch (also in Unix milliseconds) the id was generated against.
    /// Saturates at `i64::MAX` for time fields too wide to represent.
    pub fn timestamp_millis(&self, epoch_millis: i64) -> i64 {
        epoch_millis.saturating_add(i64::try_from(self.time).unwrap_or(i64::MAX))
    }
}
