use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on either side of the job link.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no reply after {0:?}")]
    Timeout(Duration),

    #[error("unknown token: {0}")]
    UnknownToken(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}
