// Copyright 2022 houseme
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::LeaseStore;
use crate::error::{BoxDynError, Error};
use async_trait::async_trait;
use rand::Rng;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

/// Only extend the expiry when the key still belongs to this store's owner.
const RENEW_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

/// A [`LeaseStore`] backed by Redis.
///
/// Claims use `SET key owner NX PX ttl`, a single atomic command. Each
/// store carries a random owner token so renewal never extends a key some
/// other process claimed after ours expired.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: MultiplexedConnection,
    owner: String,
}

impl RedisLeaseStore {
    /// Connect to the Redis server at `uri`, e.g. `redis://127.0.0.1/`.
    pub async fn connect(uri: &str) -> Result<Self, Error> {
        let coordination = |source: redis::RedisError| Error::Coordination {
            key: uri.to_owned(),
            source: Box::new(source),
        };
        let client = redis::Client::open(uri).map_err(coordination)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(coordination)?;
        Ok(Self::with_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            owner: format!("{:016x}", rand::rng().random::<u64>()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, BoxDynError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew(&self, key: &str, ttl: Duration) -> Result<bool, BoxDynError> {
        let mut conn = self.conn.clone();
        let renewed: i64 = redis::Script::new(RENEW_SCRIPT)
            .key(key)
            .arg(&self.owner)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }
}
