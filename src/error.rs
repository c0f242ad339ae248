// vim: tw=80
//! Error variants produced by the shredding core.
//!
//! Each variant corresponds to a row of the error-handling table: the
//! core never panics or unwraps across a target boundary, it returns one of
//! these instead and lets the driver decide how to report it and whether to
//! move on to the next target.

use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShredError {
    #[error("invalid file type")]
    InvalidFileType,

    #[error("cannot shred append-only file descriptor")]
    AppendOnly,

    #[error("{path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("cannot rewind: {source}")]
    Rewind { source: io::Error },

    #[error("fstat: {source}")]
    Stat { source: io::Error },

    #[error("file has negative size")]
    NegativeSize,

    #[error("error writing at offset {offset}: {source}")]
    Write { offset: u64, source: io::Error },

    #[error("file too large")]
    FileTooLarge,

    #[error("fsync: {source}")]
    Sync { source: io::Error },

    #[error("error truncating: {source}")]
    Truncate { source: io::Error },

    #[error("cannot remove: {source}")]
    Unlink { source: io::Error },

    #[error("invalid number of passes")]
    InvalidPassCount,

    #[error("invalid file size: {0}")]
    InvalidSize(String),
}

pub type Result<T> = std::result::Result<T, ShredError>;
