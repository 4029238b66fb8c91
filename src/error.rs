//! Error types for Lys

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LysError {
    /// A structural problem with a message being encoded or decoded, or with
    /// caller-supplied arguments: unknown tag, wrong length, zero-length
    /// string/array, over-long frame, nested composite, tag mismatch.
    #[error("invalid param: {0}")]
    InvalidParam(String),

    /// The requested operation is incompatible with the current session
    /// state, or the handshake partner replied with an unexpected op.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The underlying transport failed while sending or receiving bytes.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LysError>;
