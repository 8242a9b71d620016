// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use thiserror::Error;

/// Convenience type alias for errors returned by injected collaborators,
/// such as a [`LeaseStore`](crate::LeaseStore).
pub type BoxDynError = Box<dyn StdError + 'static + Send + Sync>;

/// The error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("start_time `{0}` is ahead of current time")]
    StartTimeAheadOfCurrentTime(DateTime<Utc>),
    #[error(
        "invalid bit length configuration: time({0}) + machine_id({1}) + sequence({2}) must be {3}"
    )]
    InvalidBitLength(u8, u8, u8, u8),
    #[error("total bit length {0} does not fit in a 64-bit id")]
    TotalBitsTooWide(u8),
    #[error("the timestamp section needs at least one bit")]
    ZeroTimestampBits,
    #[error("machine id {machine_id} is out of range, the limit is {limit}")]
    MachineIdOutOfRange { machine_id: u64, limit: u64 },
    #[error("check_machine_id returned false for machine id {0}")]
    CheckMachineIdFailed(u64),
    #[error("lease ttl of {0:?} is too short to be renewed")]
    InvalidLeaseTtl(std::time::Duration),
    #[error("a lease store is configured, use the async `finalize` instead")]
    LeaseRequiresAsync,
    #[error("coordination store failed on key `{key}`: {source}")]
    Coordination {
        key: String,
        #[source]
        source: BoxDynError,
    },
    #[error("all {limit} machine ids are already leased")]
    ResourceExhausted { limit: u64 },
    #[error("clock moved backwards: last tick {last}, current tick {now}")]
    ClockMovedBackwards { last: i64, now: i64 },
    #[error("over the time limit")]
    OverTimeLimit,
    #[error("mutex is poisoned (i.e. a panic happened while it was locked)")]
    MutexPoisoned,
}
