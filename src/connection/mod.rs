pub mod config;
pub mod manager;

use crate::core::{DbError, Result};
use mongodb::Client;
use mongodb::bson::doc;

pub use config::{ConnectionConfig, ConnectionOptions};
pub use manager::ConnectionManager;

/// Build a client for `config` and make sure a server answers.
///
/// The driver connects lazily, so a `ping` is issued against `admin` before
/// the client is handed out.
pub async fn connect(config: &ConnectionConfig) -> Result<Client> {
    let options = config.client_options().await?;
    let client = Client::with_options(options)
        .map_err(|e| DbError::Connection(format!("Unable to create client: {}", e)))?;

    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await
        .map_err(|e| DbError::Connection(e.to_string()))?;

    Ok(client)
}
