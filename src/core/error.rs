use mongodb::bson;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database must be provided.")]
    DatabaseRequired,

    #[error("{0}")]
    Validation(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Inserted record {0} could not be read back")]
    InsertNotVisible(String),

    /// Failure reported by the database driver, passed through as is
    #[error(transparent)]
    Driver(#[from] mongodb::error::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl DbError {
    /// Caller-side precondition failures: nothing was sent to the database.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DatabaseRequired | Self::Validation(_) | Self::InvalidId(_)
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Unique index violation reported by the server (code 11000)
    pub fn is_duplicate_key(&self) -> bool {
        use mongodb::error::{ErrorKind, WriteFailure};

        let Self::Driver(err) = self else {
            return false;
        };
        match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == 11000,
            ErrorKind::Command(command) => command.code == 11000,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<bson::ser::Error> for DbError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for DbError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::oid::Error> for DbError {
    fn from(err: bson::oid::Error) -> Self {
        Self::InvalidId(err.to_string())
    }
}
