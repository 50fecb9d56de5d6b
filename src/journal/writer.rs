// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Journal;
use crate::{
    error::ConfigError,
    file,
    interval::Interval,
    meta::JournalMeta,
    partition::Partition,
    record::RecordCodec,
    rows, time,
    tx::Tx,
};
use fs2::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::PathBuf,
    sync::Arc,
};

/// The single writer of a journal.
///
/// Holds the exclusive `lock.lock` file lock for its lifetime. Appends go
/// to the active (newest) partition; nothing is visible to readers until
/// [`Self::commit`] publishes a transaction record.
pub struct JournalWriter {
    journal: Journal,
    _lock: File,
    next_tx_number: u64,
    append_ts: i64,
    degraded: bool,
}

impl JournalWriter {
    /// Opens (or creates) the journal for writing.
    ///
    /// Recovery runs here: column files, indexes and symbol tables are
    /// clamped back to the last transaction with a valid CRC, and
    /// partition directories no transaction ever named are deleted.
    pub(crate) fn open(config: crate::JournalConfig) -> crate::Result<Self> {
        let path: PathBuf = config.path().into();
        std::fs::create_dir_all(&path)?;

        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(file::LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            log::warn!("{path:?}: journal is locked by another writer");
            return Err(crate::Error::ConcurrentWriter(path));
        }

        let stored = if path.join(file::META_FILE).exists() {
            let stored = JournalMeta::read_from(&path)?;
            if config.has_columns() {
                super::check_compat(&stored, &config.build_meta()?)?;
            }
            stored
        } else {
            if !config.has_columns() {
                return Err(ConfigError::NoColumns.into());
            }
            let meta = config.build_meta()?;
            meta.write_to(&path)?;
            log::debug!("{path:?}: created journal");
            meta
        };

        let journal = Journal::open_with(stored, path, true)?;
        let mut writer = Self {
            next_tx_number: journal.tx.tx_number + 1,
            journal,
            _lock: lock,
            append_ts: i64::MIN,
            degraded: false,
        };
        writer.recover()?;
        Ok(writer)
    }

    /// Reconciles the on-disk state with the last valid transaction.
    fn recover(&mut self) -> crate::Result<()> {
        let tx = self.journal.tx.clone();
        let visible = Journal::visible_partitions(&tx);

        let found = self.journal.scan_partition_dirs()?;
        let mut live = Vec::new();
        for (interval, lag, dir) in found {
            // Lag partitions are never committed by this engine; any left
            // behind are a dead writer's residue
            if lag || live.len() >= visible {
                log::debug!("removing uncommitted partition {dir:?}");
                std::fs::remove_dir_all(&dir)?;
            } else {
                live.push(interval);
            }
        }

        if live.len() < visible {
            log::warn!(
                "{:?}: tx #{} names {visible} partitions but only {} exist",
                self.journal.location,
                tx.tx_number,
                live.len()
            );
            return Err(crate::Error::TxCorruption);
        }

        for (index, interval) in live.into_iter().enumerate() {
            self.journal.partitions.push(Partition::new(
                Arc::clone(&self.journal.meta),
                &self.journal.location,
                interval,
                index,
                false,
                true,
            )?);
        }

        self.clamp_to_tx(&tx)?;

        if visible > 0 {
            log::debug!(
                "{:?}: recovered to tx #{} ({} partitions, {} rows in last)",
                self.journal.location,
                tx.tx_number,
                visible,
                tx.last_partition_row_count()
            );
        }
        Ok(())
    }

    /// Truncates the newest partition, its indexes and the symbol tables
    /// back to `tx`, then re-derives the append timestamp.
    fn clamp_to_tx(&mut self, tx: &Tx) -> crate::Result<()> {
        let addresses = self.journal.per_column_addresses(tx);
        if let Some(partition) = self.journal.partitions.last_mut() {
            partition.recover(tx.last_partition_row_count(), &addresses)?;
        }

        let sizes = tx.symbol_sizes.clone();
        let columns: Vec<usize> = self.journal.meta.symbol_columns().collect();
        for (column, size) in columns.into_iter().zip(sizes) {
            if let Some(table) = self.journal.symbols.get_mut(column).and_then(Option::as_mut) {
                table.truncate(size)?;
            }
        }

        self.reset_append_ts()
    }

    fn reset_append_ts(&mut self) -> crate::Result<()> {
        self.append_ts = i64::MIN;
        if self.journal.meta.timestamp_column.is_some() {
            if let Some(partition) = self.journal.partitions.last_mut() {
                let size = partition.size()?;
                if size > 0 {
                    self.append_ts = partition.timestamp_at(size - 1)?;
                }
            }
        }
        Ok(())
    }

    /// The journal view of this writer (includes its own uncommitted
    /// appends).
    pub fn journal(&mut self) -> &mut Journal {
        &mut self.journal
    }

    /// Total row count, including uncommitted appends.
    pub fn size(&mut self) -> crate::Result<u64> {
        self.journal.size()
    }

    /// Appends one record to the partition its timestamp selects,
    /// returning the new row's global row id.
    ///
    /// Fails with [`crate::Error::TimestampOutOfOrder`] before touching any
    /// file if the record's timestamp runs backwards; any error during the
    /// actual write rolls the journal back to the last commit.
    pub fn append<R: RecordCodec>(&mut self, codec: &R) -> crate::Result<u64> {
        if self.degraded {
            return Err(crate::Error::Degraded);
        }

        let timestamp = match self.journal.meta.timestamp_column {
            None => i64::MIN,
            Some(column) => {
                let value = codec.get(column);
                let Some(timestamp) = value.as_i64() else {
                    return Err(crate::Error::TypeMismatch {
                        column: self
                            .journal
                            .meta
                            .columns
                            .get(column)
                            .map_or_else(String::new, |c| c.name.clone()),
                        expected: crate::ColumnType::Date,
                    });
                };
                if timestamp < self.append_ts {
                    return Err(crate::Error::TimestampOutOfOrder {
                        timestamp,
                        latest: self.append_ts,
                    });
                }
                timestamp
            }
        };

        self.locate_partition(timestamp)?;

        let result = match self.journal.partitions.last_mut() {
            None => Err(crate::Error::Unrecoverable),
            Some(partition) => partition
                .append(codec, &mut self.journal.symbols)
                .map(|local| rows::to_row_id(partition.partition_index(), local)),
        };

        match result {
            Ok(row_id) => {
                self.append_ts = timestamp.max(self.append_ts);
                Ok(row_id)
            }
            Err(e) => {
                log::warn!("append failed, rolling back: {e}");
                self.rollback()?;
                Err(e)
            }
        }
    }

    /// Ensures the active partition covers `timestamp`, sealing the
    /// previous one when rolling forward.
    fn locate_partition(&mut self, timestamp: i64) -> crate::Result<()> {
        if self
            .journal
            .partitions
            .last()
            .is_some_and(|p| p.interval().contains(timestamp))
        {
            return Ok(());
        }

        // Seal the previous partition: readers derive its final size from
        // the file lengths, so those must be exact before any transaction
        // can name a newer partition as last
        if let Some(previous) = self.journal.partitions.last_mut() {
            previous.commit()?;
            previous.compact()?;
        }

        let interval = Interval::containing(timestamp, self.journal.meta.partition_type)?;
        let index = self.journal.partitions.len();
        let mut partition = Partition::new(
            Arc::clone(&self.journal.meta),
            &self.journal.location,
            interval,
            index,
            false,
            true,
        )?;
        partition.open()?;
        self.journal.partitions.push(partition);
        Ok(())
    }

    /// Publishes everything appended since the last commit.
    ///
    /// A failed commit leaves the journal degraded; reopen to recover.
    pub fn commit(&mut self) -> crate::Result<()> {
        if self.degraded {
            return Err(crate::Error::Degraded);
        }
        match self.commit_inner() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("commit failed, journal degraded: {e}");
                self.degraded = true;
                Err(e)
            }
        }
    }

    fn commit_inner(&mut self) -> crate::Result<()> {
        for table in self.journal.symbols.iter_mut().flatten() {
            table.commit()?;
        }

        let (max_row_id, last_partition_ts, index_addresses) =
            match self.journal.partitions.last_mut() {
                None => (0, i64::MIN, Vec::new()),
                Some(partition) => {
                    partition.commit()?;
                    let size = partition.size()?;
                    (
                        rows::to_row_id(partition.partition_index(), size),
                        partition.interval().start_ms(),
                        partition.index_tx_addresses(),
                    )
                }
            };

        let symbol_sizes = {
            let columns: Vec<usize> = self.journal.meta.symbol_columns().collect();
            columns
                .into_iter()
                .map(|column| {
                    self.journal
                        .symbols
                        .get(column)
                        .and_then(Option::as_ref)
                        .map_or(0, |table| table.size())
                })
                .collect()
        };

        let tx = Tx {
            tx_number: self.next_tx_number,
            commit_millis: time::unix_millis(),
            max_row_id,
            last_partition_ts,
            lag_name: None,
            index_addresses,
            symbol_sizes,
            key_hash: self.journal.meta.key_hash(),
        };

        self.journal.tx_log.append(&tx)?;
        self.journal.tx = tx;
        self.next_tx_number += 1;
        Ok(())
    }

    /// Discards everything appended since the last commit.
    pub fn rollback(&mut self) -> crate::Result<()> {
        let tx = self.journal.tx.clone();
        let visible = Journal::visible_partitions(&tx);

        while self.journal.partitions.len() > visible {
            if let Some(partition) = self.journal.partitions.pop() {
                partition.delete()?;
            }
        }

        self.clamp_to_tx(&tx)?;
        log::debug!("rolled back to tx #{}", tx.tx_number);
        Ok(())
    }

    /// Drops every row and symbol and publishes an empty transaction.
    pub fn truncate(&mut self) -> crate::Result<()> {
        if self.degraded {
            return Err(crate::Error::Degraded);
        }

        while let Some(partition) = self.journal.partitions.pop() {
            partition.delete()?;
        }
        for table in self.journal.symbols.iter_mut().flatten() {
            table.truncate(0)?;
        }
        self.append_ts = i64::MIN;

        log::debug!("truncated journal {:?}", self.journal.location);
        self.commit()
    }

    /// Flushes everything and fsyncs.
    pub fn force(&mut self) -> crate::Result<()> {
        for partition in &mut self.journal.partitions {
            if partition.is_open() {
                partition.force()?;
            }
        }
        for table in self.journal.symbols.iter_mut().flatten() {
            table.force()?;
        }
        Ok(())
    }

    /// Closes all files. Uncommitted appends are discarded by the next
    /// open's recovery.
    pub fn close(self) -> crate::Result<()> {
        self.journal.close()
    }
}
