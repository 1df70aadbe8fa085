use thiserror::Error;

use crate::DeviceAddress;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Message recipient must be a non-device address, got {0}")]
    InvalidDestination(DeviceAddress),

    #[error("Failed to marshal {what}: {source}")]
    Marshal {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{query} request returned error: {text}")]
    RemoteProtocol { query: &'static str, text: String },

    #[error("Malformed {query} response: {reason}")]
    MalformedResponse { query: &'static str, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Group cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("None of the {attempted} resolved devices could be encrypted for")]
    NoDeliverableDevices { attempted: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-device failure of the cipher engine. Never escalated past the fanout,
/// except on the group sender-key path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("No session established")]
    NoSession,

    #[error("Failed to process key bundle: {0}")]
    InvalidBundle(String),

    #[error("Cipher encryption failed: {0}")]
    Encryption(String),

    #[error("Sender key error: {0}")]
    SenderKey(String),
}

/// Per-device failure of a key bundle fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Server returned error {code}: {text}")]
    Remote { code: String, text: String },

    #[error("No bundle returned")]
    Missing,

    #[error("Malformed bundle: {0}")]
    Malformed(String),
}

/// The operating system could not supply randomness for a message id.
#[derive(Error, Debug)]
#[error("Out of entropy: {0}")]
pub struct EntropyError(pub String);
