use super::config::ConnectionConfig;
use crate::core::{DbError, Result};
use lazy_static::lazy_static;
use mongodb::Client;
use tokio::sync::Mutex;

// Global singleton instance of ConnectionManager
lazy_static! {
    static ref GLOBAL_MANAGER: ConnectionManager = ConnectionManager::new();
}

/// Memoizes one client for every caller.
///
/// The slot lock is held across "check the cache, else establish", so
/// concurrent first callers observe a single establishment.
pub struct ConnectionManager {
    slot: Mutex<Option<Client>>,
}

impl ConnectionManager {
    /// Get the process-wide manager
    pub fn global() -> &'static ConnectionManager {
        &GLOBAL_MANAGER
    }

    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Return the cached client, or establish one from `config`.
    ///
    /// Once a client is cached, later configs are ignored. A failed
    /// establishment leaves the slot empty so the next call retries.
    pub async fn connect(&self, config: Option<&ConnectionConfig>) -> Result<Client> {
        tracing::debug!("Connection request received");

        let Some(config) = config else {
            return Err(DbError::Configuration(
                "Connection config. was not provided.".into(),
            ));
        };

        let mut slot = self.slot.lock().await;

        if let Some(client) = slot.as_ref() {
            tracing::debug!("Delivering previously made connection");
            return Ok(client.clone());
        }

        tracing::debug!(url = %config.to_url(), "Making a new connection");

        match super::connect(config).await {
            Ok(client) => {
                tracing::debug!("Connection done");
                *slot = Some(client.clone());
                Ok(client)
            }
            Err(e) => {
                tracing::debug!(error = %e, "Connection attempt error");
                Err(e)
            }
        }
    }

    /// Shut down and forget the cached client; no-op when there is none.
    pub async fn close(&self) {
        tracing::debug!("Closing connection");

        let client = self.slot.lock().await.take();
        if let Some(client) = client {
            client.shutdown().await;
        }
    }

    pub async fn get_client(&self) -> Option<Client> {
        self.slot.lock().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
