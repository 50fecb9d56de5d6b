// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    Checksum,
};
use std::path::PathBuf;

/// Schema or configuration defect, fatal at open
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Journal has no columns
    NoColumns,

    /// Two columns share a name
    DuplicateColumn(String),

    /// Referenced column does not exist
    UnknownColumn(String),

    /// `distinct_count_hint` must be a power of two >= 2
    BadDistinctHint {
        /// Offending column
        column: String,
        /// Supplied hint
        hint: u64,
    },

    /// Timestamp column must be DATE or LONG
    BadTimestampColumn(String),

    /// Column type cannot carry an inverted index
    Unindexable(String),

    /// On-disk schema does not match the supplied configuration
    MetaMismatch(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfigError({self:?})")
    }
}

impl std::error::Error for ConfigError {}

/// Represents errors that can occur in the journal engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Invalid schema or configuration, fatal at open
    Config(ConfigError),

    /// Memory mapping failed
    Mapping {
        /// File that failed to map
        path: PathBuf,
        /// Window start
        offset: u64,
        /// Window length
        len: u64,
    },

    /// A contiguous run larger than one mapping window was requested
    WindowOverrun {
        /// Requested run length
        requested: u64,
        /// Window size of the file
        window: u64,
    },

    /// Index key outside the configured key space
    IndexKeyOutOfRange {
        /// Offending key
        key: i64,
        /// Configured key space
        key_space: u64,
    },

    /// Transaction record with a bad CRC or truncated tail
    TxCorruption,

    /// Invalid or unparsable data format version
    InvalidFormatVersion(u16),

    /// Invalid checksum value (got, expected)
    ChecksumMismatch {
        /// Computed value
        got: Checksum,
        /// Stored value
        expected: Checksum,
    },

    /// Appended timestamp is older than the latest committed one
    TimestampOutOfOrder {
        /// Appended timestamp (epoch millis)
        timestamp: i64,
        /// Latest timestamp seen by the writer
        latest: i64,
    },

    /// Record value does not match the column's type
    TypeMismatch {
        /// Offending column
        column: String,
        /// Type the schema declares
        expected: crate::ColumnType,
    },

    /// Operation on a closed partition
    ClosedPartition,

    /// A second writer tried to acquire the journal lock
    ConcurrentWriter(PathBuf),

    /// Journal no longer accepts writes after a failed commit
    Degraded,

    /// Engine invariant violated; the journal should be closed
    Unrecoverable,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JournalError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<ConfigError> for Error {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Journal result
pub type Result<T> = std::result::Result<T, Error>;
