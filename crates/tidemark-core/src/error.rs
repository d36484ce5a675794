//! Core error types.

use crate::catalog::SchemaError;
use thiserror::Error;

/// Core storage errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A schema operation was inconsistent with the store's catalog.
    #[error("{0}")]
    Schema(#[from] SchemaError),

    /// The store refused a statement because of the data it holds.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Invalid data format.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Copy bytes into an aligned buffer before handing them to rkyv.
///
/// sled hands out values without alignment guarantees.
pub(crate) fn aligned(bytes: &[u8]) -> rkyv::util::AlignedVec {
    let mut buf = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    buf.extend_from_slice(bytes);
    buf
}
