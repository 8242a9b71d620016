// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::clock::{to_millis, SystemClock, TimeSource, DEFAULT_EPOCH_MILLIS};
use crate::error::Error;
use crate::layout::{BitLayout, DEFAULT_BIT_LEN_MACHINE_ID, DEFAULT_BIT_LEN_TIME, DEFAULT_TOTAL_BITS};
use crate::lease::{LeaseCoordinator, LeaseGuard, LeaseStore, DEFAULT_LEASE_KEY_PREFIX, DEFAULT_LEASE_TTL};
use crate::machine::{self, InterfaceHint, MachineIdSource, NetworkHint, RandSource, ThreadRandom};
use crate::snowflake::{Internals, SharedSnowflake, Snowflake};
use chrono::prelude::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// default tolerance for a clock that moves backwards
pub const DEFAULT_CLOCK_REGRESSION_TOLERANCE: Duration = Duration::from_secs(1);

type CheckMachineId = Box<dyn Fn(u64) -> bool + Send + Sync>;

/// A builder for building the ['Snowflake'] generator.
///
/// The machine id is resolved from the first input configured, in this
/// order: an explicit [`machine_id`], a [`lease_store`], a [`network_hint`],
/// and finally a random draw.
///
/// [`Snowflake`]: struct.Snowflake.html
/// [`machine_id`]: Builder::machine_id
/// [`lease_store`]: Builder::lease_store
/// [`network_hint`]: Builder::network_hint
pub struct Builder {
    start_time: Option<i64>,
    machine_id: Option<u64>,
    check_machine_id: Option<CheckMachineId>,
    total_bits: u8,
    bit_len_time: u8,
    bit_len_machine_id: u8,
    bit_len_sequence: Option<u8>,
    lease_store: Option<Arc<dyn LeaseStore>>,
    lease_ttl: Duration,
    lease_key_prefix: String,
    network_hint: Option<Arc<dyn NetworkHint>>,
    rand_source: Arc<dyn RandSource>,
    clock: Arc<dyn TimeSource>,
    clock_regression_tolerance: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Builder {
    /// Construct a new builder for the build of ['Snowflake'].
    ///
    /// [`Snowflake`]: struct.Snowflake.html
    pub fn new() -> Self {
        Self {
            start_time: None,
            machine_id: None,
            check_machine_id: None,
            total_bits: DEFAULT_TOTAL_BITS,
            bit_len_time: DEFAULT_BIT_LEN_TIME,
            bit_len_machine_id: DEFAULT_BIT_LEN_MACHINE_ID,
            bit_len_sequence: None,
            lease_store: None,
            lease_ttl: DEFAULT_LEASE_TTL,
            lease_key_prefix: DEFAULT_LEASE_KEY_PREFIX.to_owned(),
            network_hint: None,
            rand_source: Arc::new(ThreadRandom),
            clock: Arc::new(SystemClock),
            clock_regression_tolerance: DEFAULT_CLOCK_REGRESSION_TOLERANCE,
        }
    }

    /// Set the start time (the epoch ids count from).
    /// If the time is set later than the current time, 'finalize' will fail.
    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(to_millis(start_time));
        self
    }

    /// Set the start time in milliseconds since the Unix epoch.
    pub fn epoch_millis(mut self, epoch_millis: i64) -> Self {
        self.start_time = Some(epoch_millis);
        self
    }

    /// Set the machine ID explicitly.
    /// If it does not fit in the machine id section, 'finalize' will fail.
    pub fn machine_id(mut self, machine_id: u64) -> Self {
        self.machine_id = Some(machine_id);
        self
    }

    /// Set up a function to check the machine ID, whatever its source.
    /// If the function returns 'false', 'finalize' will fail. A leased
    /// machine ID is only claimed once the function accepts it.
    pub fn check_machine_id<F>(mut self, check_machine_id: F) -> Self
    where
        F: Fn(u64) -> bool + Send + Sync + 'static,
    {
        self.check_machine_id = Some(Box::new(check_machine_id));
        self
    }

    /// Set the bit length of the whole id. At most 64.
    pub fn total_bits(mut self, total_bits: u8) -> Self {
        self.total_bits = total_bits;
        self
    }

    /// Set the bit length of the timestamp section.
    pub fn bit_len_time(mut self, bit_len_time: u8) -> Self {
        self.bit_len_time = bit_len_time;
        self
    }

    /// Set the bit length of the machine ID section.
    pub fn bit_len_machine_id(mut self, bit_len_machine_id: u8) -> Self {
        self.bit_len_machine_id = bit_len_machine_id;
        self
    }

    /// Sets the bit length of the sequence section.
    /// Without it, the sequence takes the bits the other sections leave.
    pub fn bit_len_sequence(mut self, bit_len_sequence: u8) -> Self {
        self.bit_len_sequence = Some(bit_len_sequence);
        self
    }

    /// Lease the machine ID from a shared coordination store.
    pub fn lease_store(mut self, lease_store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(lease_store);
        self
    }

    /// Set the lease time-to-live. The lease is renewed every third of it.
    pub fn lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    pub fn lease_key_prefix(mut self, lease_key_prefix: impl Into<String>) -> Self {
        self.lease_key_prefix = lease_key_prefix.into();
        self
    }

    /// Derive the machine ID from a local IPv4 address when one is found.
    pub fn network_hint(mut self, network_hint: Arc<dyn NetworkHint>) -> Self {
        self.network_hint = Some(network_hint);
        self
    }

    /// Derive the machine ID from the host's network interfaces.
    pub fn interface_network_hint(self) -> Self {
        self.network_hint(Arc::new(InterfaceHint))
    }

    pub fn rand_source(mut self, rand_source: Arc<dyn RandSource>) -> Self {
        self.rand_source = rand_source;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// How far the clock may move backwards before `next_id` fails.
    pub fn clock_regression_tolerance(mut self, tolerance: Duration) -> Self {
        self.clock_regression_tolerance = tolerance;
        self
    }

    /// Finish building and create a Snowflake instance, leasing the machine
    /// ID if a lease store is configured.
    ///
    /// This method will return an error if validation fails, if the lease
    /// store cannot be reached, or if every machine ID is already leased.
    pub async fn finalize(self) -> Result<Snowflake, Error> {
        let layout = self.validate()?;

        let store = match (self.machine_id, self.lease_store.clone()) {
            (None, Some(store)) => store,
            _ => {
                let (machine_id, source) = self.resolve_machine_id(&layout)?;
                return Ok(self.assemble(layout, machine_id, source, None));
            }
        };

        let coordinator = LeaseCoordinator::new(store, self.lease_ttl)?
            .with_key_prefix(self.lease_key_prefix.clone());
        let lease = match &self.check_machine_id {
            Some(check_machine_id) => {
                coordinator
                    .acquire_matching(layout.machine_id_limit(), |candidate| {
                        check_machine_id(candidate)
                    })
                    .await?
            }
            None => coordinator.acquire(layout.machine_id_limit()).await?,
        };
        let machine_id = lease.machine_id;

        let guard = coordinator.spawn_renewal(lease);
        Ok(self.assemble(layout, machine_id, MachineIdSource::Leased, Some(guard)))
    }

    /// Finish building without touching a coordination store.
    ///
    /// Fails with [`Error::LeaseRequiresAsync`] if a lease store would be
    /// needed; use [`finalize`](Builder::finalize) for those.
    pub fn finalize_local(self) -> Result<Snowflake, Error> {
        let layout = self.validate()?;
        if self.lease_store.is_some() && self.machine_id.is_none() {
            return Err(Error::LeaseRequiresAsync);
        }
        let (machine_id, source) = self.resolve_machine_id(&layout)?;
        Ok(self.assemble(layout, machine_id, source, None))
    }

    fn validate(&self) -> Result<BitLayout, Error> {
        let layout = BitLayout::new(
            self.total_bits,
            self.bit_len_time,
            self.bit_len_machine_id,
            self.bit_len_sequence,
        )?;

        if let Some(start_time) = self.start_time {
            if start_time > self.clock.current_millis() {
                return Err(Error::StartTimeAheadOfCurrentTime(
                    crate::clock::from_millis(start_time),
                ));
            }
        }
        if self.lease_store.is_some() && self.machine_id.is_none() {
            LeaseCoordinator::validate_ttl(self.lease_ttl)?;
        }

        Ok(layout)
    }

    /// Explicit, network hint or random, in that order.
    fn resolve_machine_id(&self, layout: &BitLayout) -> Result<(u64, MachineIdSource), Error> {
        let (machine_id, source) = match self.machine_id {
            Some(machine_id) => {
                let limit = layout.machine_id_limit();
                if machine_id >= limit {
                    return Err(Error::MachineIdOutOfRange { machine_id, limit });
                }
                (machine_id, MachineIdSource::Explicit)
            }
            None => machine::resolve_unleased(
                self.network_hint.as_deref(),
                self.rand_source.as_ref(),
                layout,
            ),
        };
        self.check(machine_id)?;
        Ok((machine_id, source))
    }

    fn check(&self, machine_id: u64) -> Result<(), Error> {
        match &self.check_machine_id {
            Some(check_machine_id) if !check_machine_id(machine_id) => {
                Err(Error::CheckMachineIdFailed(machine_id))
            }
            _ => Ok(()),
        }
    }

    fn assemble(
        self,
        layout: BitLayout,
        machine_id: u64,
        machine_id_source: MachineIdSource,
        lease: Option<LeaseGuard>,
    ) -> Snowflake {
        let start_time = self.start_time.unwrap_or(DEFAULT_EPOCH_MILLIS);
        tracing::info!(
            machine_id,
            source = ?machine_id_source,
            start_time,
            bit_len_time = layout.bit_len_time(),
            bit_len_machine_id = layout.bit_len_machine_id(),
            bit_len_sequence = layout.bit_len_sequence(),
            "snowflake generator ready"
        );

        let tolerance = i64::try_from(self.clock_regression_tolerance.as_millis()).unwrap_or(i64::MAX);
        let shared = Arc::new(SharedSnowflake {
            layout,
            start_time,
            machine_id,
            machine_id_source,
            clock: self.clock,
            clock_regression_tolerance: tolerance,
            internals: Mutex::new(Internals::new(&layout)),
            lease,
        });
        Snowflake::new_inner(shared)
    }
}
