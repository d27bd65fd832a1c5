//! Process-wide Redis handle.
//!
//! The connection manager is created lazily by the first caller and shared by
//! every store afterwards; concurrent first callers wait on the same
//! initialisation instead of each opening a connection.

use redis::{aio::ConnectionManager, Client, RedisError};
use tokio::sync::OnceCell;

pub struct SharedRedis {
    client: Client,
    manager: OnceCell<ConnectionManager>,
}

impl SharedRedis {
    /// Parses the URL eagerly; no connection is opened until first use.
    pub fn new(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            manager: OnceCell::new(),
        })
    }

    /// Returns a cheap clone of the shared connection manager, connecting on
    /// first use. A failed attempt leaves the cell empty so the next caller
    /// retries.
    pub async fn connection(&self) -> Result<ConnectionManager, RedisError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                tracing::info!("Connecting to Redis");
                let manager = self.client.get_connection_manager().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to get Redis connection manager");
                    e
                })?;
                tracing::info!("Successfully connected to Redis");
                Ok::<_, RedisError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.manager.initialized()
    }

    pub async fn health_check(&self) -> Result<(), RedisError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await
    }
}

impl std::fmt::Debug for SharedRedis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRedis")
            .field("connected", &self.is_connected())
            .finish()
    }
}
