//! Parse errors for the fundamental types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("invalid outpoint: {0}")]
    InvalidOutPoint(String),

    #[error("unknown network: {0}")]
    UnknownNetwork(String),

    #[error("unexpected end of data: need {need} bytes at offset {offset}")]
    UnexpectedEof { need: usize, offset: usize },

    #[error("{0}")]
    Other(String),
}
