// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::builder::Builder;
use crate::clock::{from_millis, TimeSource};
use crate::error::*;
use crate::layout::{BitLayout, DecomposedSnowflake};
use crate::lease::{Lease, LeaseGuard, LeaseHealth};
use crate::machine::MachineIdSource;
use crate::sequence::SequenceCounter;
use chrono::prelude::*;
use std::{
    fmt,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};
use tokio::sync::watch;

/// Internals of Snowflake.
/// This struct is not exposed to the public.
#[derive(Debug)]
pub(crate) struct Internals {
    /// last tick an id was issued for, in milliseconds since the start time
    pub(crate) elapsed_time: i64,
    pub(crate) sequence: SequenceCounter,
}

impl Internals {
    pub(crate) fn new(layout: &BitLayout) -> Self {
        Self {
            elapsed_time: 0,
            sequence: SequenceCounter::new(layout.bit_len_sequence()),
        }
    }
}

/// SharedSnowflake is shared between Snowflake instances.
/// This struct is not exposed to the public.
pub(crate) struct SharedSnowflake {
    pub(crate) layout: BitLayout,
    pub(crate) start_time: i64,
    pub(crate) machine_id: u64,
    pub(crate) machine_id_source: MachineIdSource,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) clock_regression_tolerance: i64,
    pub(crate) internals: Mutex<Internals>,
    pub(crate) lease: Option<LeaseGuard>,
}

/// Snowflake is a distributed unique ID generator.
/// It is thread-safe and can be cloned to be used in multiple threads.
///
/// Ids from one generator are unique, and strictly increasing across calls
/// that do not overlap in time. When the sequence runs out within one
/// millisecond, `next_id` waits for the next millisecond. When the clock
/// moves backwards, ids keep using the last millisecond seen, up to the
/// configured tolerance.
///
/// If the machine id is leased, renewal runs in the background until the
/// generator is [closed](Snowflake::close) or its last clone is dropped.
pub struct Snowflake(pub(crate) Arc<SharedSnowflake>);

impl Snowflake {
    /// Create a new Snowflake with the default configuration and a random
    /// machine id.
    /// For custom configuration see [`builder`].
    ///
    /// [`builder`]: struct.Snowflake.html#method.builder
    pub fn new() -> Result<Self, Error> {
        Builder::new().finalize_local()
    }

    /// Create a new [`Builder`] to construct a Snowflake.
    ///
    /// [`Builder`]: struct.Builder.html
    pub fn builder() -> Builder {
        Builder::new()
    }

    pub(crate) fn new_inner(shared: Arc<SharedSnowflake>) -> Self {
        Self(shared)
    }

    /// Generate the next unique id.
    ///
    /// Fails once the elapsed time no longer fits in the time section, or if
    /// the clock moved backwards further than the configured tolerance.
    pub fn next_id(&self) -> Result<u64, Error> {
        let mut internals = self.0.internals.lock().map_err(|_| Error::MutexPoisoned)?;

        let current = self.current_elapsed_time();
        if current < internals.elapsed_time {
            let drift = internals.elapsed_time.saturating_sub(current);
            if drift > self.0.clock_regression_tolerance {
                return Err(Error::ClockMovedBackwards {
                    last: internals.elapsed_time,
                    now: current,
                });
            }
            tracing::debug!(drift, "clock moved backwards, reusing the last tick");
        }

        let sequence = internals.sequence.increment_and_wrap();
        if current > internals.elapsed_time {
            internals.elapsed_time = current;
        } else if sequence == 0 {
            // Every sequence value of this tick is used up.
            internals.elapsed_time += 1;
            let overtime = internals.elapsed_time - current;
            thread::sleep(sleep_time(overtime));
        }

        let time = internals.elapsed_time as u64;
        if time > self.0.layout.max_time() {
            return Err(Error::OverTimeLimit);
        }

        Ok(self.0.layout.compose(time, self.0.machine_id, sequence))
    }

    /// Break an id from this generator up into its parts.
    pub fn decompose(&self, id: u64) -> DecomposedSnowflake {
        self.0.layout.decompose(id)
    }

    /// The instant encoded in an id from this generator.
    pub fn timestamp_of(&self, id: u64) -> DateTime<Utc> {
        from_millis(self.decompose(id).timestamp_millis(self.0.start_time))
    }

    pub fn machine_id(&self) -> u64 {
        self.0.machine_id
    }

    pub fn machine_id_source(&self) -> MachineIdSource {
        self.0.machine_id_source
    }

    pub fn layout(&self) -> BitLayout {
        self.0.layout
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        from_millis(self.0.start_time)
    }

    /// The machine id lease, when the machine id was leased.
    pub fn lease(&self) -> Option<&Lease> {
        self.0.lease.as_ref().map(LeaseGuard::lease)
    }

    /// Renewal state of the machine id lease, when the machine id was leased.
    ///
    /// [`LeaseHealth::Lost`] means ids from this generator are no longer
    /// guaranteed to be unique across processes.
    pub fn lease_health(&self) -> Option<LeaseHealth> {
        self.0.lease.as_ref().map(LeaseGuard::health)
    }

    pub fn subscribe_lease_health(&self) -> Option<watch::Receiver<LeaseHealth>> {
        self.0.lease.as_ref().map(LeaseGuard::subscribe)
    }

    /// Stop renewing the machine id lease, if any. Shared by every clone.
    ///
    /// The generator keeps working, but once the lease expires another
    /// process may claim the same machine id.
    pub fn close(&self) {
        if let Some(lease) = &self.0.lease {
            lease.stop();
        }
    }

    /// Whether both handles point at the same generator state.
    pub(crate) fn same_generator(&self, other: &Snowflake) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn current_elapsed_time(&self) -> i64 {
        self.0.clock.current_millis().saturating_sub(self.0.start_time)
    }
}

/// Returns a new `Snowflake` referencing the same state as `self`.
/// This is used for concurrent use.
impl Clone for Snowflake {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl fmt::Debug for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snowflake")
            .field("layout", &self.0.layout)
            .field("start_time", &self.0.start_time)
            .field("machine_id", &self.0.machine_id)
            .field("machine_id_source", &self.0.machine_id_source)
            .field("lease", &self.lease())
            .finish_non_exhaustive()
    }
}

/// Returns the time to sleep until `overtime` milliseconds have passed.
fn sleep_time(overtime: i64) -> Duration {
    Duration::from_millis(overtime.max(0) as u64)
}
