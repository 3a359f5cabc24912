use thiserror::Error;

/// Failures that callers may want to distinguish. They travel inside `anyhow::Error` and can be
///  recovered with `err.downcast_ref::<LinkError>()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("payload of {len} bytes exceeds the maximum of {max} bytes per datagram")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("buffer of {available} bytes is too small for an encoded packet of {required} bytes")]
    BufferTooSmall { required: usize, available: usize },

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("endpoint is closed")]
    Closed,

    #[error("peer #{0} was removed")]
    RemovedPeer(u64),
}
