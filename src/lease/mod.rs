// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Machine id leasing.
//!
//! Processes sharing one [`LeaseStore`] claim machine ids by atomically
//! setting `<prefix>:<candidate>` with a time-to-live, lowest free candidate
//! first. The winner keeps the key alive from a background task. There is no
//! release call: once renewal stops, the key expires and the id becomes
//! available to other processes after the ttl.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryLeaseStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisLeaseStore;

use crate::error::{BoxDynError, Error};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_util::sync::CancellationToken;

/// default key prefix of machine id leases
pub const DEFAULT_LEASE_KEY_PREFIX: &str = "generator-lease";
/// default lease time-to-live
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// The minimal command surface a coordination store must offer.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Atomically set `key` if it is absent, expiring after `ttl`.
    /// Returns `false` when the key is already held.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, BoxDynError>;

    /// Reset the expiry of a key this process holds.
    /// Returns `false` when the key no longer exists.
    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, BoxDynError>;
}

/// A claimed machine id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub machine_id: u64,
    pub key: String,
    pub ttl: Duration,
}

/// Observable state of a lease's renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseHealth {
    Healthy,
    /// Renewal is failing but the ttl has not run out yet.
    Degraded { failures: u32 },
    /// The lease expired or was taken away. Ids generated from now on may
    /// collide with another process that claims the same machine id.
    Lost,
}

/// Claims machine ids from a [`LeaseStore`] and keeps them alive.
#[derive(Clone)]
pub struct LeaseCoordinator {
    store: Arc<dyn LeaseStore>,
    ttl: Duration,
    key_prefix: String,
}

impl LeaseCoordinator {
    /// The ttl must leave room for renewing at a third of it.
    pub fn new(store: Arc<dyn LeaseStore>, ttl: Duration) -> Result<Self, Error> {
        Self::validate_ttl(ttl)?;
        Ok(Self {
            store,
            ttl,
            key_prefix: DEFAULT_LEASE_KEY_PREFIX.to_owned(),
        })
    }

    pub(crate) fn validate_ttl(ttl: Duration) -> Result<(), Error> {
        if ttl < Duration::from_millis(3) {
            return Err(Error::InvalidLeaseTtl(ttl));
        }
        Ok(())
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn renew_interval(&self) -> Duration {
        self.ttl / 3
    }

    pub fn key(&self, candidate: u64) -> String {
        format!("{}:{}", self.key_prefix, candidate)
    }

    /// Claim the lowest free machine id in `[0, machine_id_limit)`.
    ///
    /// Makes exactly one pass over the id space. A store error aborts the
    /// sweep; there is no fallback to another machine id source.
    pub async fn acquire(&self, machine_id_limit: u64) -> Result<Lease, Error> {
        self.acquire_matching(machine_id_limit, |_| true).await
    }

    /// Like [`acquire`](LeaseCoordinator::acquire), but candidates rejected
    /// by `accept` are skipped without touching the store.
    ///
    /// Each claim must answer within the ttl, otherwise the sweep fails with
    /// [`Error::Coordination`].
    pub async fn acquire_matching<F>(&self, machine_id_limit: u64, accept: F) -> Result<Lease, Error>
    where
        F: Fn(u64) -> bool,
    {
        for candidate in 0..machine_id_limit {
            if !accept(candidate) {
                tracing::debug!(candidate, "machine id rejected, skipping");
                continue;
            }

            let key = self.key(candidate);
            let claimed = match timeout(self.ttl, self.store.claim(&key, self.ttl)).await {
                Ok(claimed) => claimed,
                Err(elapsed) => Err(Box::new(elapsed) as BoxDynError),
            }
            .map_err(|source| Error::Coordination {
                key: key.clone(),
                source,
            })?;

            if claimed {
                tracing::info!(machine_id = candidate, %key, ttl = ?self.ttl, "leased machine id");
                return Ok(Lease {
                    machine_id: candidate,
                    key,
                    ttl: self.ttl,
                });
            }
            tracing::debug!(candidate, %key, "machine id already leased");
        }

        Err(Error::ResourceExhausted {
            limit: machine_id_limit,
        })
    }

    /// Start renewing `lease` in the background.
    ///
    /// Must be called from within a tokio runtime. The task runs until the
    /// returned guard is stopped or dropped, or until the lease is lost.
    pub fn spawn_renewal(&self, lease: Lease) -> LeaseGuard {
        let token = CancellationToken::new();
        let (health_tx, health_rx) = watch::channel(LeaseHealth::Healthy);
        let renewal = Renewal {
            store: Arc::clone(&self.store),
            key: lease.key.clone(),
            ttl: lease.ttl,
            interval: self.renew_interval(),
            token: token.clone(),
            health: health_tx,
        };
        let task = tokio::spawn(renewal.run());

        LeaseGuard {
            lease,
            token,
            health: health_rx,
            _task: task,
        }
    }
}

/// Owns the renewal task of a [`Lease`]. Dropping the guard stops renewal.
#[derive(Debug)]
pub struct LeaseGuard {
    lease: Lease,
    token: CancellationToken,
    health: watch::Receiver<LeaseHealth>,
    _task: JoinHandle<()>,
}

impl LeaseGuard {
    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// The latest renewal state.
    pub fn health(&self) -> LeaseHealth {
        *self.health.borrow()
    }

    /// Watch renewal state changes.
    pub fn subscribe(&self) -> watch::Receiver<LeaseHealth> {
        self.health.clone()
    }

    /// Stop renewing. The key expires on its own after the ttl.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!(key = %self.lease.key, "stopping lease renewal");
            self.token.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct Renewal {
    store: Arc<dyn LeaseStore>,
    key: String,
    ttl: Duration,
    interval: Duration,
    token: CancellationToken,
    health: watch::Sender<LeaseHealth>,
}

impl Renewal {
    async fn run(self) {
        let mut last_renewed = Instant::now();

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = sleep(self.interval) => {}
            }

            match self.renew_until_deadline(last_renewed).await {
                Some(renewed_at) => last_renewed = renewed_at,
                None => return,
            }
        }
    }

    /// Renew with exponential backoff. Returns the time of the successful
    /// renewal, or `None` if the lease was lost or renewal was cancelled.
    ///
    /// No attempt may run past `last_renewed + ttl`; a store that does not
    /// answer by then counts as a failure and the lease is lost.
    async fn renew_until_deadline(&self, last_renewed: Instant) -> Option<Instant> {
        let deadline = last_renewed + self.ttl;
        let mut backoff = (self.interval / 8).max(Duration::from_millis(1));
        let mut failures = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::error!(key = %self.key, failures, "lease lost, renewal kept failing past the ttl");
                self.health.send_replace(LeaseHealth::Lost);
                return None;
            }

            let renewed = tokio::select! {
                _ = self.token.cancelled() => return None,
                renewed = timeout(remaining, self.store.renew(&self.key, self.ttl)) => renewed,
            };
            let renewed = match renewed {
                Ok(renewed) => renewed,
                Err(elapsed) => Err(Box::new(elapsed) as BoxDynError),
            };

            match renewed {
                Ok(true) => {
                    if failures > 0 {
                        tracing::info!(key = %self.key, failures, "lease renewal recovered");
                        self.health.send_replace(LeaseHealth::Healthy);
                    }
                    return Some(Instant::now());
                }
                Ok(false) => {
                    tracing::error!(key = %self.key, "lease expired before it could be renewed");
                    self.health.send_replace(LeaseHealth::Lost);
                    return None;
                }
                Err(err) => {
                    failures += 1;
                    if Instant::now() >= deadline {
                        tracing::error!(key = %self.key, failures, error = %err, "lease lost, renewal kept failing past the ttl");
                        self.health.send_replace(LeaseHealth::Lost);
                        return None;
                    }
                    tracing::warn!(key = %self.key, failures, error = %err, retry_in = ?backoff, "lease renewal failed");
                    self.health.send_replace(LeaseHealth::Degraded { failures });
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => return None,
                _ = sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.interval);
        }
    }
}
