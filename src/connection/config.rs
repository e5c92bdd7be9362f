use crate::core::{DbError, Result};
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const URL_SCHEMES: [&str; 2] = ["mongodb://", "mongodb+srv://"];

const PEM_CERTIFICATE_HEADER: &str = "-----BEGIN CERTIFICATE-----";

/// Options that travel next to the connection string.
///
/// Anything left unset keeps the value from the connection string, or the
/// driver default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Application name reported with every connection
    #[serde(default, alias = "appName")]
    pub app_name: Option<String>,

    /// Maximum number of connections in pool
    #[serde(default, alias = "maxPoolSize", alias = "poolSize")]
    pub max_pool_size: Option<u32>,

    /// Connection timeout in milliseconds
    #[serde(default, alias = "connectTimeoutMS")]
    pub connect_timeout_ms: Option<u64>,

    #[serde(default, alias = "serverSelectionTimeoutMS")]
    pub server_selection_timeout_ms: Option<u64>,

    /// PEM file with the certificate authorities to trust; enables TLS
    #[serde(default, alias = "sslCA", alias = "tlsCAFile")]
    pub tls_ca_file: Option<PathBuf>,

    /// Database returned by `Client::default_database`
    #[serde(default, alias = "defaultDatabase")]
    pub default_database: Option<String>,
}

/// Database connection configuration
///
/// A connection string plus client options, as loaded from JSON or the
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub url: String,

    #[serde(default)]
    pub options: ConnectionOptions,
}

impl ConnectionConfig {
    /// Create a new connection configuration
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: ConnectionOptions::default(),
        }
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn app_name(mut self, app_name: &str) -> Self {
        self.options.app_name = Some(app_name.to_string());
        self
    }

    /// Set maximum connections
    pub fn max_pool_size(mut self, max: u32) -> Self {
        self.options.max_pool_size = Some(max);
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.options.server_selection_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn tls_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.tls_ca_file = Some(path.into());
        self
    }

    pub fn default_database(mut self, database: &str) -> Self {
        self.options.default_database = Some(database.to_string());
        self
    }

    /// Parse a `{ "url": ..., "options": { ... } }` document
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| DbError::Configuration(format!("Invalid connection config: {}", e)))
    }

    /// Read the configuration from an environment variable holding either a
    /// bare connection string or a JSON document
    pub fn from_env(var: &str) -> Result<Self> {
        let value = std::env::var(var).map_err(|_| {
            DbError::Configuration(format!("Environment variable {} is not set", var))
        })?;

        let trimmed = value.trim();
        if trimmed.starts_with('{') {
            Self::from_json(trimmed)
        } else {
            Ok(Self::new(trimmed))
        }
    }

    /// Driver options: the parsed connection string with these options on top.
    ///
    /// A configured CA file is read first, so a missing or non-PEM file fails
    /// here rather than at the first handshake.
    pub async fn client_options(&self) -> Result<ClientOptions> {
        self.validate()?;

        let mut options = ClientOptions::parse(&self.url)
            .await
            .map_err(|e| DbError::Connection(format!("Invalid connection string: {}", e)))?;

        let opts = &self.options;
        if let Some(app_name) = &opts.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(max) = opts.max_pool_size {
            options.max_pool_size = Some(max);
        }
        if let Some(ms) = opts.connect_timeout_ms {
            options.connect_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = opts.server_selection_timeout_ms {
            options.server_selection_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(database) = &opts.default_database {
            options.default_database = Some(database.clone());
        }
        if let Some(path) = &opts.tls_ca_file {
            check_ca_file(path).await?;
            options.tls = Some(Tls::Enabled(
                TlsOptions::builder().ca_file_path(path.clone()).build(),
            ));
        }

        Ok(options)
    }

    /// Convert to connection string with the password masked
    pub fn to_url(&self) -> String {
        mask_password(&self.url)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !URL_SCHEMES.iter().any(|scheme| self.url.starts_with(scheme)) {
            return Err(DbError::Connection(format!(
                "Invalid connection string: URL must start with one of {:?}",
                URL_SCHEMES
            )));
        }

        let opts = &self.options;
        if opts.max_pool_size == Some(0) {
            return Err(DbError::Configuration("maxPoolSize must be > 0".into()));
        }

        if opts.connect_timeout_ms == Some(0) {
            return Err(DbError::Configuration("connectTimeoutMS must be > 0".into()));
        }

        if opts.app_name.as_deref() == Some("") {
            return Err(DbError::Configuration("appName cannot be empty".into()));
        }

        if let Some(database) = &opts.default_database {
            validate_database_name(database)?;
        }

        Ok(())
    }
}

/// Database names follow the usual namespace restrictions.
pub fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(|c| matches!(c, '/' | '\\' | '.' | ' ' | '"' | '$')) {
        return Err(DbError::Configuration(format!(
            "Invalid database name: '{}'",
            name
        )));
    }
    Ok(())
}

async fn check_ca_file(path: &Path) -> Result<()> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        DbError::Connection(format!("Unable to read TLS CA file {}: {}", path.display(), e))
    })?;

    if !contents.contains(PEM_CERTIFICATE_HEADER) {
        return Err(DbError::Connection(format!(
            "TLS CA file {} does not contain a PEM certificate",
            path.display()
        )));
    }
    Ok(())
}

fn mask_password(url: &str) -> String {
    let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
        return url.to_string();
    };
    let rest = &url[scheme_end..];
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());

    let Some(at) = rest[..authority_end].rfind('@') else {
        return url.to_string();
    };
    let Some(colon) = rest[..at].find(':') else {
        return url.to_string();
    };

    // Don't expose password
    format!(
        "{}{}:***{}",
        &url[..scheme_end],
        &rest[..colon],
        &rest[at..]
    )
}
