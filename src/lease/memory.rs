// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::LeaseStore;
use crate::error::BoxDynError;
use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tokio::time::Instant;

/// An in-process [`LeaseStore`].
///
/// Keys expire lazily: an expired key is treated as absent by every
/// operation. Expiry follows tokio's clock, so paused-time tests can step
/// over a ttl without sleeping.
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    keys: Mutex<HashMap<String, Instant>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held and unexpired.
    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .get(key)
            .map_or(false, |expires_at| *expires_at > now)
    }

    /// Number of unexpired keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|expires_at| **expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, BoxDynError> {
        let now = Instant::now();
        let mut keys = self.lock();
        match keys.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                keys.insert(key.to_owned(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, BoxDynError> {
        let now = Instant::now();
        let mut keys = self.lock();
        match keys.get_mut(key) {
            Some(expires_at) if *expires_at > now => {
                *expires_at = now + ttl;
                Ok(true)
            }
            Some(_) => {
                keys.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
