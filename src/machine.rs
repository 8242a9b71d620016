// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::layout::BitLayout;
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};

/// Where a generator's machine id came from.
///
/// When several inputs are configured the first applicable one wins, in the
/// order the variants are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineIdSource {
    /// Supplied by the caller.
    Explicit,
    /// Leased from a shared coordination store. This is the only source
    /// that guarantees distinct machine ids across processes.
    Leased,
    /// Derived from the low bits of a local IPv4 address.
    NetworkHint,
    /// Drawn at random. Safe for single-instance deployments and tests only.
    Random,
}

/// Provides the first non-loopback IPv4 address of the host, if any.
pub trait NetworkHint: Send + Sync {
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

impl<F> NetworkHint for F
where
    F: Fn() -> Option<Ipv4Addr> + Send + Sync,
{
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        self()
    }
}

/// A [`NetworkHint`] that walks the host's network interfaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceHint;

impl NetworkHint for InterfaceHint {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        pnet_datalink::interfaces()
            .iter()
            .filter(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
            .flat_map(|iface| iface.ips.iter())
            .find_map(|network| match network.ip() {
                IpAddr::V4(ipv4) if !ipv4.is_loopback() => Some(ipv4),
                _ => None,
            })
    }
}

/// A source of uniformly distributed integers.
///
/// Inject a fixed source in tests to make random machine ids deterministic.
pub trait RandSource: Send + Sync {
    /// Returns a value in `[0, limit)`. `limit` is never 0.
    fn rand_below(&self, limit: u64) -> u64;
}

impl<F> RandSource for F
where
    F: Fn(u64) -> u64 + Send + Sync,
{
    fn rand_below(&self, limit: u64) -> u64 {
        self(limit)
    }
}

/// A [`RandSource`] backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandSource for ThreadRandom {
    fn rand_below(&self, limit: u64) -> u64 {
        rand::rng().random_range(0..limit)
    }
}

/// Take the low `bit_len_machine_id` bits of the 32-bit address.
pub fn machine_id_from_ipv4(ip: Ipv4Addr, layout: &BitLayout) -> u64 {
    u64::from(u32::from(ip)) & (layout.machine_id_limit() - 1)
}

/// Resolve a machine id without a coordination store: the network hint when
/// it yields an address, otherwise a random draw.
pub(crate) fn resolve_unleased(
    hint: Option<&dyn NetworkHint>,
    rand: &dyn RandSource,
    layout: &BitLayout,
) -> (u64, MachineIdSource) {
    if let Some(ip) = hint.and_then(|hint| hint.local_ipv4()) {
        tracing::debug!(%ip, "deriving machine id from network address");
        return (machine_id_from_ipv4(ip, layout), MachineIdSource::NetworkHint);
    }
    // Clamp in case a custom source ignores the limit.
    let limit = layout.machine_id_limit();
    (rand.rand_below(limit) % limit, MachineIdSource::Random)
}
