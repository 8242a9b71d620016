//! A distributed unique ID generator inspired by [Twitter's Snowflake], able
//! to lease its machine id from a shared coordination store.
//!
//! An id packs, from most to least significant bit, the milliseconds since a
//! start time, a machine id and a per-millisecond sequence. The widths are
//! configurable; by default 41 bits of time, 10 bits of machine id and 13
//! bits of sequence make up a 64-bit id.
//!
//! ## Quickstart
//!
//! ```
//! use snowflake_lease::Snowflake;
//!
//! let sf = Snowflake::builder().machine_id(5).finalize_local().unwrap();
//! let next_id = sf.next_id().unwrap();
//! assert_eq!(sf.decompose(next_id).machine_id, 5);
//! ```
//!
//! ## Machine ids
//!
//! The machine id comes from the first of these that is configured:
//!
//! 1. an explicit value,
//! 2. a lease from a [`LeaseStore`], the only source that keeps machine ids
//!    distinct across processes,
//! 3. the low bits of a local IPv4 address, via a [`NetworkHint`],
//! 4. a random draw.
//!
//! ```
//! use snowflake_lease::{MachineIdSource, MemoryLeaseStore, Snowflake};
//! use std::{sync::Arc, time::Duration};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), snowflake_lease::Error> {
//! let store = Arc::new(MemoryLeaseStore::new());
//! let sf = Snowflake::builder()
//!     .lease_store(store)
//!     .lease_ttl(Duration::from_secs(30))
//!     .finalize()
//!     .await?;
//! assert_eq!(sf.machine_id_source(), MachineIdSource::Leased);
//! assert_eq!(sf.machine_id(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrent use
//!
//! Snowflake is thread safe. `clone` it before moving to another thread:
//! ```
//! use snowflake_lease::Snowflake;
//! use std::thread;
//!
//! let sf = Snowflake::new().unwrap();
//!
//! let mut children = Vec::new();
//! for _ in 0..10 {
//!     let thread_sf = sf.clone();
//!     children.push(thread::spawn(move || {
//!         println!("{}", thread_sf.next_id().unwrap());
//!     }));
//! }
//!
//! for child in children {
//!     child.join().unwrap();
//! }
//! ```
//!
//! ## Process-wide default
//!
//! [`configure`] installs a generator in the global [`Registry`], and
//! [`next_id`] draws from it, building a default generator on first use.
//!
//! [Twitter's Snowflake]: https://blog.twitter.com/2010/announcing-snowflake

mod builder;
mod clock;
mod error;
mod layout;
mod lease;
mod machine;
mod registry;
mod sequence;
mod snowflake;
#[cfg(test)]
mod tests;

pub use crate::snowflake::*;
pub use builder::*;
pub use clock::{SystemClock, TimeSource, DEFAULT_EPOCH_MILLIS};
pub use error::*;
pub use layout::*;
pub use lease::*;
pub use machine::*;
pub use registry::*;
pub use sequence::*;
