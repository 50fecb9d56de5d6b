// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    rows, Checksum,
};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

const TX_MAGIC: u16 = 0xFACE;
const TX_FORMAT_VERSION: u16 = 1;

/// Records larger than this are treated as corruption
const MAX_TX_BYTES: usize = 1 << 20;

/// One committed transaction: the new visible end of the journal plus the
/// per-index and per-symbol-table snapshots readers need to clamp their
/// views
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tx {
    /// Monotonic transaction number
    pub tx_number: u64,

    /// Commit wall-clock time, epoch milliseconds
    pub commit_millis: u64,

    /// Global row id one past the last committed row
    pub max_row_id: u64,

    /// Interval start of the last partition, epoch milliseconds
    pub last_partition_ts: i64,

    /// Directory name of the lag partition, if one exists
    pub lag_name: Option<String>,

    /// Tx addresses of the active partition's indexes, schema-ordered
    /// over indexed columns
    pub index_addresses: Vec<u64>,

    /// Symbol table sizes, schema-ordered over SYMBOL columns
    pub symbol_sizes: Vec<u64>,

    /// Identity hash of the key column (0 when unset)
    pub key_hash: u64,
}

impl Tx {
    /// The empty journal's transaction.
    #[must_use]
    pub fn genesis(key_hash: u64, symbol_count: usize) -> Self {
        Self {
            tx_number: 0,
            commit_millis: 0,
            max_row_id: 0,
            last_partition_ts: i64::MIN,
            lag_name: None,
            index_addresses: Vec::new(),
            symbol_sizes: vec![0; symbol_count],
            key_hash,
        }
    }

    /// Index of the last partition with committed rows.
    #[must_use]
    pub fn last_partition_index(&self) -> usize {
        rows::partition_index(self.max_row_id)
    }

    /// Committed row count of the last partition.
    #[must_use]
    pub fn last_partition_row_count(&self) -> u64 {
        rows::local_row_id(self.max_row_id)
    }
}

impl Encode for Tx {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u16::<BigEndian>(TX_FORMAT_VERSION)?;
        writer.write_u64::<BigEndian>(self.tx_number)?;
        writer.write_u64::<BigEndian>(self.commit_millis)?;
        writer.write_u64::<BigEndian>(self.max_row_id)?;
        writer.write_i64::<BigEndian>(self.last_partition_ts)?;

        match &self.lag_name {
            None => writer.write_u8(0)?,
            Some(name) => {
                let units: Vec<u16> = name.encode_utf16().collect();
                #[allow(clippy::cast_possible_truncation)]
                writer.write_u8(units.len() as u8)?;
                for unit in units {
                    writer.write_u16::<BigEndian>(unit)?;
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.index_addresses.len() as u32)?;
        for address in &self.index_addresses {
            writer.write_u64::<BigEndian>(*address)?;
        }

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.symbol_sizes.len() as u32)?;
        for size in &self.symbol_sizes {
            writer.write_u64::<BigEndian>(*size)?;
        }

        writer.write_u64::<BigEndian>(self.key_hash)?;
        Ok(())
    }
}

impl Decode for Tx {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let version = reader.read_u16::<BigEndian>().map_err(DecodeError::from)?;
        if version != TX_FORMAT_VERSION {
            return Err(crate::Error::InvalidFormatVersion(version));
        }

        let tx_number = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        let commit_millis = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        let max_row_id = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        let last_partition_ts = reader.read_i64::<BigEndian>().map_err(DecodeError::from)?;

        let lag_len = reader.read_u8().map_err(DecodeError::from)?;
        let lag_name = if lag_len == 0 {
            None
        } else {
            let mut units = Vec::with_capacity(usize::from(lag_len));
            for _ in 0..lag_len {
                units.push(reader.read_u16::<BigEndian>().map_err(DecodeError::from)?);
            }
            Some(
                char::decode_utf16(units)
                    .collect::<Result<String, _>>()
                    .map_err(|_| DecodeError::Utf16)?,
            )
        };

        let count = reader.read_u32::<BigEndian>().map_err(DecodeError::from)?;
        let mut index_addresses = Vec::with_capacity(count as usize);
        for _ in 0..count {
            index_addresses.push(reader.read_u64::<BigEndian>().map_err(DecodeError::from)?);
        }

        let count = reader.read_u32::<BigEndian>().map_err(DecodeError::from)?;
        let mut symbol_sizes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            symbol_sizes.push(reader.read_u64::<BigEndian>().map_err(DecodeError::from)?);
        }

        let key_hash = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;

        Ok(Self {
            tx_number,
            commit_millis,
            max_row_id,
            last_partition_ts,
            lag_name,
            index_addresses,
            symbol_sizes,
            key_hash,
        })
    }
}

/// The append-only transaction log of one journal.
///
/// The writer appends records and fsyncs; readers re-scan the tail on
/// every refresh. A truncated record or one with a bad CRC ends the scan -
/// the previous good record stays the visible transaction.
pub struct TxLog {
    file: File,
    path: PathBuf,
    tail: u64,
    last: Option<Tx>,
}

impl TxLog {
    /// Opens the log, scanning it for the last valid record.
    ///
    /// Writers additionally chop off any corrupt tail bytes.
    pub fn open(path: &Path, writable: bool) -> crate::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .open(path)?;

        let mut log = Self {
            file,
            path: path.into(),
            tail: 0,
            last: None,
        };
        log.scan()?;

        if writable && log.file.metadata()?.len() > log.tail {
            log::warn!(
                "{:?}: dropping corrupt tail past offset {}",
                log.path,
                log.tail
            );
            log.file.set_len(log.tail)?;
        }

        Ok(log)
    }

    /// The last valid transaction seen so far.
    #[must_use]
    pub fn last(&self) -> Option<&Tx> {
        self.last.as_ref()
    }

    /// Re-reads the tail; `true` if a newer valid record was found.
    pub fn refresh(&mut self) -> crate::Result<bool> {
        self.scan()
    }

    fn scan(&mut self) -> crate::Result<bool> {
        self.file.seek(SeekFrom::Start(self.tail))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;

        let mut at = 0usize;
        let mut advanced = false;

        loop {
            let Some(header) = buf.get(at..at + 6) else {
                break;
            };
            let magic = BigEndian::read_u16(header.get(0..2).unwrap_or(&[0, 0]));
            if magic != TX_MAGIC {
                log::warn!("{:?}: bad record magic at {}", self.path, self.tail + at as u64);
                break;
            }

            let size = BigEndian::read_u32(header.get(2..6).unwrap_or(&[0; 4])) as usize;
            if size > MAX_TX_BYTES {
                log::warn!("{:?}: oversized record at {}", self.path, self.tail + at as u64);
                break;
            }

            let Some(body) = buf.get(at + 6..at + 6 + size) else {
                break; // partial tail
            };
            let Some(crc) = buf.get(at + 6 + size..at + 6 + size + 4) else {
                break; // partial tail
            };

            let stored = Checksum::from_raw(BigEndian::read_u32(crc));
            if Checksum::of(body).check(stored).is_err() {
                log::warn!("{:?}: bad crc at {}", self.path, self.tail + at as u64);
                break;
            }

            match Tx::decode_from(&mut &*body) {
                Ok(tx) => {
                    self.last = Some(tx);
                    at += 6 + size + 4;
                    advanced = true;
                }
                Err(e) => {
                    log::warn!("{:?}: undecodable record: {e}", self.path);
                    break;
                }
            }
        }

        self.tail += at as u64;
        Ok(advanced)
    }

    /// Appends a record and fsyncs the log.
    pub fn append(&mut self, tx: &Tx) -> crate::Result<()> {
        let body = tx.encode_into_vec();

        let mut record = Vec::with_capacity(body.len() + 10);
        record.extend_from_slice(&TX_MAGIC.to_be_bytes());
        #[allow(clippy::cast_possible_truncation)]
        record.extend_from_slice(&(body.len() as u32).to_be_bytes());
        record.extend_from_slice(&body);
        record.extend_from_slice(&Checksum::of(&body).into_u32().to_be_bytes());

        self.file.seek(SeekFrom::Start(self.tail))?;
        self.file.write_all(&record)?;
        self.file.sync_data()?;

        self.tail += record.len() as u64;
        self.last = Some(tx.clone());
        log::debug!("{:?}: committed tx #{}", self.path, tx.tx_number);
        Ok(())
    }
}
