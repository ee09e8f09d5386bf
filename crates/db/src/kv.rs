//! Redis key-value cache used for query embeddings and search responses.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;

use crate::Result;

/// Thin wrapper over a multiplexed Redis connection.
///
/// Callers own their key namespaces (`embed:`, `search:`); this type only
/// provides TTL'd string storage and a liveness probe.
#[derive(Clone)]
pub struct RedisKv {
  manager: ConnectionManager,
}

impl std::fmt::Debug for RedisKv {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RedisKv").finish_non_exhaustive()
  }
}

impl RedisKv {
  pub async fn connect(url: &str) -> Result<Self> {
    let client = redis::Client::open(url)?;
    let manager = client.get_connection_manager().await?;
    Ok(Self { manager })
  }

  pub async fn get(&self, key: &str) -> Result<Option<String>> {
    let mut connection = self.manager.clone();
    Ok(connection.get(key).await?)
  }

  pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
    let mut connection = self.manager.clone();
    let seconds = ttl.as_secs().max(1);
    connection.set_ex::<_, _, ()>(key, value, seconds).await?;
    Ok(())
  }

  pub async fn ping(&self) -> Result<()> {
    let mut connection = self.manager.clone();
    let _pong: String = redis::cmd("PING").query_async(&mut connection).await?;
    Ok(())
  }
}
