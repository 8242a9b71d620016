// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use chrono::prelude::*;

/// A source of wall-clock time in milliseconds since the Unix epoch.
///
/// Plug in a mocked clock in tests to pin ids to a known instant.
pub trait TimeSource: Send + Sync {
    fn current_millis(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

impl<F> TimeSource for F
where
    F: Fn() -> i64 + Send + Sync,
{
    fn current_millis(&self) -> i64 {
        self()
    }
}

/// The default epoch, 2020-01-01T00:00:00Z, in milliseconds since the Unix
/// epoch.
pub const DEFAULT_EPOCH_MILLIS: i64 = 1_577_836_800_000;

/// Convert a `DateTime<Utc>` to milliseconds since the Unix epoch.
pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert milliseconds since the Unix epoch back to a `DateTime<Utc>`,
/// saturating at the representable range.
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
