//! Errors of the image sink.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    /// Opening, creating or writing the file failed.
    #[error("{0}")]
    Io(#[from] io::Error),

    /// PNG layout this crate does not expand to RGBA8.
    #[error("unsupported PNG layout: {0}")]
    UnsupportedFormat(String),

    #[error("PNG decode failed: {0}")]
    DecodeError(String),

    #[error("PNG encode failed: {0}")]
    EncodeError(String),

    /// Pixel buffer length disagrees with width * height * 4.
    #[error("pixel buffer holds {actual} bytes, expected {expected} bytes for the stated size")]
    DimensionMismatch { expected: usize, actual: usize },
}

pub type IoResult<T> = Result<T, IoError>;
