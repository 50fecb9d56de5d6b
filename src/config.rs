// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    column::ColumnType,
    error::ConfigError,
    interval::PartitionType,
    meta::{ColumnMeta, JournalMeta},
    Journal, JournalWriter,
};
use std::path::{Path, PathBuf};

const DEFAULT_RECORD_HINT: u64 = 100_000;
const DEFAULT_TX_COUNT_HINT: u64 = 1_000;
const DEFAULT_OPEN_FILE_TTL_MS: u64 = 60_000;
const DEFAULT_DISTINCT_HINT: u64 = 256;

/// One column of a journal under construction
#[derive(Clone, Debug)]
pub struct ColumnConfig {
    pub(crate) name: String,
    pub(crate) kind: ColumnType,
    pub(crate) avg_size: u64,
    pub(crate) bit_hint: Option<u8>,
    pub(crate) index_bit_hint: Option<u8>,
    pub(crate) indexed: bool,
    pub(crate) distinct_count_hint: u64,
}

/// Journal configuration builder
///
/// ```
/// use nfsdb::{ColumnType, JournalConfig, PartitionType};
///
/// let config = JournalConfig::new("/tmp/quotes")
///     .column("sym", ColumnType::Symbol)
///     .indexed(true)
///     .column("bid", ColumnType::Double)
///     .column("ts", ColumnType::Date)
///     .partition_by(PartitionType::Day)
///     .timestamp_column("ts");
/// ```
#[derive(Clone, Debug)]
pub struct JournalConfig {
    path: PathBuf,
    columns: Vec<ColumnConfig>,
    timestamp_column: Option<String>,
    key_column: Option<String>,
    partition_type: PartitionType,
    record_hint: u64,
    tx_count_hint: u64,
    open_file_ttl_ms: u64,
    lag_hours: u32,
}

impl JournalConfig {
    /// Starts a configuration for the journal directory at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().into(),
            columns: Vec::new(),
            timestamp_column: None,
            key_column: None,
            partition_type: PartitionType::None,
            record_hint: DEFAULT_RECORD_HINT,
            tx_count_hint: DEFAULT_TX_COUNT_HINT,
            open_file_ttl_ms: DEFAULT_OPEN_FILE_TTL_MS,
            lag_hours: 0,
        }
    }

    /// The journal directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a schema was supplied; a schemaless config opens whatever
    /// the on-disk `_meta` describes.
    pub(crate) fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Appends a column to the schema.
    #[must_use]
    pub fn column(mut self, name: &str, kind: ColumnType) -> Self {
        self.columns.push(ColumnConfig {
            name: name.to_owned(),
            kind,
            avg_size: 12,
            bit_hint: None,
            index_bit_hint: None,
            indexed: false,
            distinct_count_hint: if kind == ColumnType::Symbol {
                DEFAULT_DISTINCT_HINT
            } else {
                0
            },
        });
        self
    }

    /// Marks the most recently added column as indexed.
    #[must_use]
    pub fn indexed(mut self, indexed: bool) -> Self {
        if let Some(column) = self.columns.last_mut() {
            column.indexed = indexed;
            if indexed && column.distinct_count_hint == 0 {
                column.distinct_count_hint = DEFAULT_DISTINCT_HINT;
            }
        }
        self
    }

    /// Sets the distinct-value hint of the most recently added column;
    /// sizes the index key space, so it must be a power of two.
    #[must_use]
    pub fn distinct_count_hint(mut self, hint: u64) -> Self {
        if let Some(column) = self.columns.last_mut() {
            column.distinct_count_hint = hint;
        }
        self
    }

    /// Sets the average value size hint of the most recently added column.
    #[must_use]
    pub fn avg_size(mut self, avg_size: u64) -> Self {
        if let Some(column) = self.columns.last_mut() {
            column.avg_size = avg_size;
        }
        self
    }

    /// Overrides the mapping window of the most recently added column's
    /// data file (log2 bytes).
    #[must_use]
    pub fn bit_hint(mut self, bit_hint: u8) -> Self {
        if let Some(column) = self.columns.last_mut() {
            column.bit_hint = Some(bit_hint);
        }
        self
    }

    /// Overrides the mapping window of the most recently added column's
    /// offsets file (log2 bytes).
    #[must_use]
    pub fn index_bit_hint(mut self, bit_hint: u8) -> Self {
        if let Some(column) = self.columns.last_mut() {
            column.index_bit_hint = Some(bit_hint);
        }
        self
    }

    /// Splits rows into time-range partitions.
    #[must_use]
    pub fn partition_by(mut self, partition_type: PartitionType) -> Self {
        self.partition_type = partition_type;
        self
    }

    /// Names the non-decreasing timestamp column.
    #[must_use]
    pub fn timestamp_column(mut self, name: &str) -> Self {
        self.timestamp_column = Some(name.to_owned());
        self
    }

    /// Names the column with a unique secondary index.
    #[must_use]
    pub fn key_column(mut self, name: &str) -> Self {
        self.key_column = Some(name.to_owned());
        self
    }

    /// Expected rows per partition; sizes mapping windows and row chunks.
    #[must_use]
    pub fn record_hint(mut self, record_hint: u64) -> Self {
        self.record_hint = record_hint.max(1);
        self
    }

    /// Expected transactions over the journal's lifetime.
    #[must_use]
    pub fn tx_count_hint(mut self, tx_count_hint: u64) -> Self {
        self.tx_count_hint = tx_count_hint.max(1);
        self
    }

    /// Idle partitions older than this get their files unmapped.
    #[must_use]
    pub fn open_file_ttl(mut self, ttl: std::time::Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        {
            self.open_file_ttl_ms = ttl.as_millis() as u64;
        }
        self
    }

    /// Bounded late-data window in hours; 0 disables lag partitions.
    #[must_use]
    pub fn lag_hours(mut self, lag_hours: u32) -> Self {
        self.lag_hours = lag_hours;
        self
    }

    /// Validates the configuration into a schema.
    pub fn build_meta(&self) -> crate::Result<JournalMeta> {
        if self.columns.is_empty() {
            return Err(ConfigError::NoColumns.into());
        }

        for (i, column) in self.columns.iter().enumerate() {
            if self
                .columns
                .iter()
                .skip(i + 1)
                .any(|other| other.name == column.name)
            {
                return Err(ConfigError::DuplicateColumn(column.name.clone()).into());
            }

            if column.indexed && !column.kind.is_indexable() {
                return Err(ConfigError::Unindexable(column.name.clone()).into());
            }

            let needs_hint = column.indexed || column.kind == ColumnType::Symbol;
            if needs_hint
                && (column.distinct_count_hint < 2
                    || !column.distinct_count_hint.is_power_of_two())
            {
                return Err(ConfigError::BadDistinctHint {
                    column: column.name.clone(),
                    hint: column.distinct_count_hint,
                }
                .into());
            }
        }

        let timestamp_column = match &self.timestamp_column {
            None => None,
            Some(name) => {
                let i = self
                    .columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| ConfigError::UnknownColumn(name.clone()))?;

                let kind = self.columns.get(i).map(|c| c.kind);
                if !matches!(kind, Some(ColumnType::Date | ColumnType::Long)) {
                    return Err(ConfigError::BadTimestampColumn(name.clone()).into());
                }
                Some(i)
            }
        };

        if self.partition_type != PartitionType::None && timestamp_column.is_none() {
            return Err(ConfigError::BadTimestampColumn(
                "time partitioning requires a timestamp column".to_owned(),
            )
            .into());
        }

        let mut columns: Vec<ColumnMeta> = self
            .columns
            .iter()
            .map(|c| ColumnMeta {
                name: c.name.clone(),
                kind: c.kind,
                avg_size: c.avg_size,
                bit_hint: c.bit_hint,
                index_bit_hint: c.index_bit_hint,
                indexed: c.indexed,
                distinct_count_hint: c.distinct_count_hint,
            })
            .collect();

        let key_column = match &self.key_column {
            None => None,
            Some(name) => {
                let i = columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| ConfigError::UnknownColumn(name.clone()))?;

                let column = columns.get_mut(i).ok_or(crate::Error::Unrecoverable)?;
                if !column.kind.is_indexable() {
                    return Err(ConfigError::Unindexable(name.clone()).into());
                }
                // A unique key needs its inverted index
                if !column.indexed {
                    column.indexed = true;
                    if column.distinct_count_hint < 2 {
                        column.distinct_count_hint = DEFAULT_DISTINCT_HINT;
                    }
                }
                Some(i)
            }
        };

        Ok(JournalMeta {
            columns,
            timestamp_column,
            partition_type: self.partition_type,
            record_hint: self.record_hint,
            tx_count_hint: self.tx_count_hint,
            open_file_ttl_ms: self.open_file_ttl_ms,
            lag_hours: self.lag_hours,
            key_column,
        })
    }

    /// Opens a read view of the journal.
    pub fn open(self) -> crate::Result<Journal> {
        Journal::open_reader(self)
    }

    /// Opens the journal for writing, taking the exclusive writer lock.
    pub fn open_writer(self) -> crate::Result<JournalWriter> {
        JournalWriter::open(self)
    }
}
