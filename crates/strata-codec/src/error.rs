use thiserror::Error;

use strata_tree::TreeError;
use strata_types::TreePath;

use crate::format::StreamKind;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stream magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported stream version: {0}")]
    UnsupportedVersion(u32),

    #[error("unexpected stream kind: expected {expected}, got byte {actual}")]
    UnexpectedKind { expected: StreamKind, actual: u8 },

    #[error("corrupt stream: {reason}")]
    Corrupt { reason: String },

    #[error("stream checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    /// A payload in the stream could not be decoded.
    #[error("payload at {path}: {reason}")]
    Payload { path: TreePath, reason: String },

    /// A payload could not be encoded while writing.
    #[error("cannot encode payload at {path}: {reason}")]
    Unencodable { path: TreePath, reason: String },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl CodecError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        CodecError::Corrupt {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the stream itself is malformed, as opposed to an
    /// I/O failure, a payload the writer could not encode or a tree
    /// precondition the caller violated.
    pub fn is_corrupt(&self) -> bool {
        !matches!(
            self,
            CodecError::Io(_) | CodecError::Unencodable { .. } | CodecError::Tree(_)
        )
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
