use bundle_metadata_store::MetadataError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoadManagerError>;

#[derive(Error, Debug)]
pub enum LoadManagerError {
    #[error("Metadata store error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Conflicting configuration: {0}")]
    ConfigConflict(String),

    #[error("Unknown {kind} strategy: {name}")]
    UnknownStrategy { kind: &'static str, name: String },

    #[error("Concurrent modification of local broker data: {0}")]
    ConcurrentModification(String),

    #[error("Load manager not started")]
    NotStarted,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid bundle name: {0}")]
    InvalidBundle(String),
}

/// Failure of a broker filter; the candidate set of the current placement is restored.
#[derive(Error, Debug)]
pub enum BrokerFilterError {
    #[error("Bad broker version {version} for broker {broker}")]
    BadVersion { broker: String, version: String },

    #[error("Broker filter failed: {0}")]
    Other(String),
}
