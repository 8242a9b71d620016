// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::builder::Builder;
use crate::error::Error;
use crate::snowflake::Snowflake;
use std::sync::RwLock;

static GLOBAL: Registry = Registry::new();

/// Holds the current default [`Snowflake`] and controls its lifecycle.
///
/// Installing a generator stops the lease renewal of the one it replaces.
/// A generator that fails to build is never installed.
#[derive(Debug, Default)]
pub struct Registry {
    current: RwLock<Option<Snowflake>>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// The process-wide registry behind [`configure`], [`next_id`] and
    /// [`close`].
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Build a generator and install it as the default.
    pub async fn configure(&self, builder: Builder) -> Result<Snowflake, Error> {
        let snowflake = builder.finalize().await?;
        self.replace(snowflake.clone())?;
        Ok(snowflake)
    }

    /// Install `snowflake` as the default, returning the previous one after
    /// stopping its lease renewal. Reinstalling a clone of the current
    /// generator leaves its lease running.
    pub fn replace(&self, snowflake: Snowflake) -> Result<Option<Snowflake>, Error> {
        let mut current = self.current.write().map_err(|_| Error::MutexPoisoned)?;
        let previous = current.take();
        if let Some(previous) = &previous {
            // A clone of the installed generator shares its lease.
            if !previous.same_generator(&snowflake) {
                tracing::debug!(machine_id = previous.machine_id(), "replacing snowflake generator");
                previous.close();
            }
        }
        *current = Some(snowflake);
        Ok(previous)
    }

    /// The default generator, building one with the default configuration
    /// if none is installed.
    pub fn current(&self) -> Result<Snowflake, Error> {
        if let Some(snowflake) = self
            .current
            .read()
            .map_err(|_| Error::MutexPoisoned)?
            .as_ref()
        {
            return Ok(snowflake.clone());
        }

        let mut current = self.current.write().map_err(|_| Error::MutexPoisoned)?;
        match current.as_ref() {
            Some(snowflake) => Ok(snowflake.clone()),
            None => {
                let snowflake = Snowflake::new()?;
                *current = Some(snowflake.clone());
                Ok(snowflake)
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.current.read().map_or(false, |current| current.is_some())
    }

    /// Generate an id from the default generator.
    pub fn next_id(&self) -> Result<u64, Error> {
        self.current()?.next_id()
    }

    /// Remove the default generator and stop its lease renewal.
    pub fn close(&self) -> Result<Option<Snowflake>, Error> {
        let previous = self
            .current
            .write()
            .map_err(|_| Error::MutexPoisoned)?
            .take();
        if let Some(previous) = &previous {
            previous.close();
        }
        Ok(previous)
    }
}

/// Build a generator and install it as the process-wide default.
pub async fn configure(builder: Builder) -> Result<Snowflake, Error> {
    Registry::global().configure(builder).await
}

/// Generate an id from the process-wide default generator.
pub fn next_id() -> Result<u64, Error> {
    Registry::global().next_id()
}

/// Remove the process-wide default generator.
pub fn close() -> Result<Option<Snowflake>, Error> {
    Registry::global().close()
}
