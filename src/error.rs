use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("name already taken: {0}")]
    NameTaken(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("unknown frame tag: {0:?}")]
    UnknownFrameTag(char),

    #[error("frame exceeds {0} bytes")]
    FrameTooLong(usize),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed for {0}")]
    WriteFailure(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}
