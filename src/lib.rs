// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embedded, append-optimized, columnar time-series storage engine.
//!
//! ##### NOTE
//!
//! > This crate only provides the storage engine, not a query language.
//! > It stores homogeneous records (a fixed schema of typed columns) into a
//! > directory tree of time-range partitions, each partition holding one
//! > memory-mapped file per column.
//!
//! ##### About
//!
//! A journal is an ordered collection of partitions; each partition covers a
//! time interval (a day, month or year, or everything when unpartitioned)
//! and holds one column file per schema column, plus inverted-index files
//! for indexed columns. Low-cardinality string columns ("symbols") are
//! dictionary-encoded through a journal-wide symbol table.
//!
//! There is a single writer per journal (enforced by a file lock) and any
//! number of readers. Writers publish data by appending a transaction
//! record; readers poll the transaction log and clamp their view to the
//! last valid record, so they never observe uncommitted rows.
//!
//! # Example usage
//!
//! ```
//! use nfsdb::{ColumnType, JournalConfig, PartitionType, Record, Value};
//! #
//! # let folder = tempfile::tempdir()?;
//!
//! let config = JournalConfig::new(folder.path().join("quotes"))
//!     .column("sym", ColumnType::Symbol)
//!     .column("bid", ColumnType::Double)
//!     .column("ts", ColumnType::Date)
//!     .partition_by(PartitionType::Day)
//!     .timestamp_column("ts");
//!
//! let mut writer = config.clone().open_writer()?;
//! writer.append(&Record::from(vec![
//!     Value::Sym("AAPL".into()),
//!     Value::Double(120.5),
//!     Value::Date(1_420_070_400_000),
//! ]))?;
//! writer.commit()?;
//!
//! let mut journal = config.open()?;
//! journal.refresh()?;
//! assert_eq!(1, journal.size()?);
//! #
//! # Ok::<(), nfsdb::Error>(())
//! ```

#![doc(html_logo_url = "https://raw.githubusercontent.com/fjall-rs/nfsdb/main/logo.png")]
#![doc(html_favicon_url = "https://raw.githubusercontent.com/fjall-rs/nfsdb/main/logo.png")]
#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

macro_rules! fail_iter {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return Some(Err(e)),
        }
    };
}

mod checksum;

#[doc(hidden)]
pub mod coding;

pub mod column;

mod config;
mod error;

#[doc(hidden)]
pub mod file;

mod hash;

#[doc(hidden)]
pub mod index;

mod interval;
mod journal;

#[doc(hidden)]
pub mod memory;

mod meta;
mod mmap;
mod partition;
mod record;

#[doc(hidden)]
pub mod rows;

mod symbol;
mod time;

#[doc(hidden)]
pub mod tx;

#[doc(hidden)]
pub use {
    checksum::Checksum,
    coding::{DecodeError, EncodeError},
    memory::MemoryFile,
    tx::{Tx, TxLog},
};

pub use {
    column::{
        fixed::{BsearchEdge, FixedColumn},
        variable::{FlyweightStr, VariableColumn},
        ColumnType,
    },
    config::{ColumnConfig, JournalConfig},
    error::{ConfigError, Error, Result},
    index::KvIndex,
    interval::{Interval, PartitionType},
    journal::{writer::JournalWriter, BufferedRows, Journal, Rows},
    meta::{ColumnMeta, JournalMeta},
    partition::Partition,
    record::{Record, RecordCodec, Value},
    symbol::{SymbolTable, VALUE_IS_NULL, VALUE_NOT_FOUND},
};
