// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{Decode, DecodeError, Encode, EncodeError},
    column::ColumnType,
    file,
    interval::PartitionType,
    memory::bit_hint_for,
    Checksum,
};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::{
    io::{Read, Write},
    path::Path,
};

pub(crate) const META_MAGIC: [u8; 4] = [b'N', b'F', b'S', 1];

/// Schema-level description of one column
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column (and file) name
    pub name: String,

    /// Column type
    pub kind: ColumnType,

    /// Average value size hint in bytes (variable types)
    pub avg_size: u64,

    /// Mapping window override for the data file (log2 bytes)
    pub bit_hint: Option<u8>,

    /// Mapping window override for the offsets file (log2 bytes)
    pub index_bit_hint: Option<u8>,

    /// Whether the column carries an inverted index
    pub indexed: bool,

    /// Expected distinct value count; sizes the index key space and the
    /// symbol hash. Must be a power of two where it applies.
    pub distinct_count_hint: u64,
}

/// Schema-level description of a journal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalMeta {
    /// Ordered column list
    pub columns: Vec<ColumnMeta>,

    /// Index of the timestamp column, if any
    pub timestamp_column: Option<usize>,

    /// How rows split into partitions
    pub partition_type: PartitionType,

    /// Expected rows per partition; sizes mapping windows and row chunks
    pub record_hint: u64,

    /// Expected transactions over the journal's lifetime
    pub tx_count_hint: u64,

    /// Idle partitions older than this get their files unmapped
    pub open_file_ttl_ms: u64,

    /// Bounded late-data window (hours); 0 disables lag partitions
    pub lag_hours: u32,

    /// Column with a unique secondary index, if any
    pub key_column: Option<usize>,
}

impl JournalMeta {
    /// Looks a column up by name.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Mapping window size for a column's data file.
    #[must_use]
    pub fn data_bit_hint(&self, column: &ColumnMeta) -> u8 {
        column.bit_hint.unwrap_or_else(|| {
            let avg = column
                .kind
                .fixed_size()
                .unwrap_or(column.avg_size * 2 + 4);
            bit_hint_for(avg, self.record_hint)
        })
    }

    /// Mapping window size for a variable column's offsets file.
    #[must_use]
    pub fn offsets_bit_hint(&self, column: &ColumnMeta) -> u8 {
        column
            .index_bit_hint
            .unwrap_or_else(|| bit_hint_for(8, self.record_hint))
    }

    /// Indexes of columns carrying an inverted index, schema-ordered.
    pub fn indexed_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.indexed)
            .map(|(i, _)| i)
    }

    /// Indexes of SYMBOL columns, schema-ordered.
    pub fn symbol_columns(&self) -> impl Iterator<Item = usize> + '_ {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnType::Symbol)
            .map(|(i, _)| i)
    }

    /// Identity hash of the key column, stored in every tx record.
    #[must_use]
    pub fn key_hash(&self) -> u64 {
        self.key_column
            .and_then(|i| self.columns.get(i))
            .map_or(0, |c| crate::hash::hash64(c.name.as_bytes()))
    }

    /// Writes the `_meta` file atomically.
    pub fn write_to(&self, directory: &Path) -> crate::Result<()> {
        let body = self.encode_into_vec();

        let mut bytes = Vec::with_capacity(body.len() + 8);
        bytes.extend_from_slice(&META_MAGIC);
        bytes.extend_from_slice(&body);
        bytes.extend_from_slice(&Checksum::of(&body).into_u32().to_be_bytes());

        file::rewrite_atomic(&directory.join(file::META_FILE), &bytes)?;
        Ok(())
    }

    /// Reads and validates the `_meta` file.
    pub fn read_from(directory: &Path) -> crate::Result<Self> {
        let bytes = std::fs::read(directory.join(file::META_FILE))?;

        let Some((magic, rest)) = bytes.split_at_checked(4) else {
            return Err(DecodeError::InvalidHeader("meta truncated").into());
        };
        if magic != META_MAGIC {
            return Err(DecodeError::InvalidHeader("bad meta magic").into());
        }
        let Some((body, crc)) = rest.split_at_checked(rest.len().saturating_sub(4)) else {
            return Err(DecodeError::InvalidHeader("meta truncated").into());
        };

        let expected = u32::from_be_bytes(crc.try_into().map_err(|_| crate::Error::Unrecoverable)?);
        Checksum::of(body).check(Checksum::from_raw(expected))?;

        let mut reader = body;
        Self::decode_from(&mut reader)
    }
}

fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<(), EncodeError> {
    #[allow(clippy::cast_possible_truncation)]
    writer.write_u16::<BigEndian>(value.len() as u16)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(reader: &mut R) -> crate::Result<String> {
    let len = reader.read_u16::<BigEndian>().map_err(DecodeError::from)?;
    let mut buf = vec![0u8; usize::from(len)];
    reader.read_exact(&mut buf).map_err(DecodeError::from)?;
    String::from_utf8(buf)
        .map_err(|_| DecodeError::InvalidHeader("column name is not UTF-8").into())
}

fn opt_index_to_i32(value: Option<usize>) -> i32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    value.map_or(-1, |v| v as i32)
}

fn i32_to_opt_index(value: i32) -> Option<usize> {
    #[allow(clippy::cast_sign_loss)]
    (value >= 0).then_some(value as usize)
}

impl Encode for JournalMeta {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_u8(self.partition_type.into())?;
        writer.write_i32::<BigEndian>(opt_index_to_i32(self.timestamp_column))?;
        writer.write_i32::<BigEndian>(opt_index_to_i32(self.key_column))?;
        writer.write_u64::<BigEndian>(self.record_hint)?;
        writer.write_u64::<BigEndian>(self.tx_count_hint)?;
        writer.write_u64::<BigEndian>(self.open_file_ttl_ms)?;
        writer.write_u32::<BigEndian>(self.lag_hours)?;

        #[allow(clippy::cast_possible_truncation)]
        writer.write_u32::<BigEndian>(self.columns.len() as u32)?;

        for column in &self.columns {
            write_str(writer, &column.name)?;
            writer.write_u8(column.kind.into())?;
            writer.write_u64::<BigEndian>(column.avg_size)?;
            writer.write_u8(column.bit_hint.unwrap_or(0))?;
            writer.write_u8(column.index_bit_hint.unwrap_or(0))?;
            writer.write_u8(u8::from(column.indexed))?;
            writer.write_u64::<BigEndian>(column.distinct_count_hint)?;
        }
        Ok(())
    }
}

impl Decode for JournalMeta {
    fn decode_from<R: Read>(reader: &mut R) -> crate::Result<Self> {
        let partition_type = reader.read_u8().map_err(DecodeError::from)?;
        let partition_type = PartitionType::try_from(partition_type)
            .map_err(|()| DecodeError::InvalidTag(("PartitionType", partition_type)))?;

        let timestamp_column =
            i32_to_opt_index(reader.read_i32::<BigEndian>().map_err(DecodeError::from)?);
        let key_column =
            i32_to_opt_index(reader.read_i32::<BigEndian>().map_err(DecodeError::from)?);
        let record_hint = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        let tx_count_hint = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        let open_file_ttl_ms = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
        let lag_hours = reader.read_u32::<BigEndian>().map_err(DecodeError::from)?;

        let column_count = reader.read_u32::<BigEndian>().map_err(DecodeError::from)?;
        let mut columns = Vec::with_capacity(column_count as usize);

        for _ in 0..column_count {
            let name = read_str(reader)?;

            let kind = reader.read_u8().map_err(DecodeError::from)?;
            let kind = ColumnType::try_from(kind)
                .map_err(|()| DecodeError::InvalidTag(("ColumnType", kind)))?;

            let avg_size = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;
            let bit_hint = reader.read_u8().map_err(DecodeError::from)?;
            let index_bit_hint = reader.read_u8().map_err(DecodeError::from)?;
            let indexed = reader.read_u8().map_err(DecodeError::from)? != 0;
            let distinct_count_hint = reader.read_u64::<BigEndian>().map_err(DecodeError::from)?;

            columns.push(ColumnMeta {
                name,
                kind,
                avg_size,
                bit_hint: (bit_hint != 0).then_some(bit_hint),
                index_bit_hint: (index_bit_hint != 0).then_some(index_bit_hint),
                indexed,
                distinct_count_hint,
            });
        }

        Ok(Self {
            columns,
            timestamp_column,
            partition_type,
            record_hint,
            tx_count_hint,
            open_file_ttl_ms,
            lag_hours,
            key_column,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use test_log::test;

    fn sample() -> JournalMeta {
        JournalMeta {
            columns: vec![
                ColumnMeta {
                    name: "sym".into(),
                    kind: ColumnType::Symbol,
                    avg_size: 8,
                    bit_hint: None,
                    index_bit_hint: None,
                    indexed: true,
                    distinct_count_hint: 256,
                },
                ColumnMeta {
                    name: "bid".into(),
                    kind: ColumnType::Double,
                    avg_size: 0,
                    bit_hint: Some(20),
                    index_bit_hint: None,
                    indexed: false,
                    distinct_count_hint: 0,
                },
                ColumnMeta {
                    name: "ts".into(),
                    kind: ColumnType::Date,
                    avg_size: 0,
                    bit_hint: None,
                    index_bit_hint: None,
                    indexed: false,
                    distinct_count_hint: 0,
                },
            ],
            timestamp_column: Some(2),
            partition_type: PartitionType::Day,
            record_hint: 100_000,
            tx_count_hint: 1_000,
            open_file_ttl_ms: 60_000,
            lag_hours: 0,
            key_column: None,
        }
    }

    #[test]
    fn meta_file_roundtrip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let meta = sample();

        meta.write_to(dir.path())?;
        let loaded = JournalMeta::read_from(dir.path())?;
        assert_eq!(meta, loaded);
        Ok(())
    }

    #[test]
    fn corrupted_meta_is_rejected() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        sample().write_to(dir.path())?;

        let path = dir.path().join(crate::file::META_FILE);
        let mut bytes = std::fs::read(&path)?;
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, bytes)?;

        assert!(matches!(
            JournalMeta::read_from(dir.path()),
            Err(crate::Error::ChecksumMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn key_hash_is_stable() {
        let mut meta = sample();
        assert_eq!(0, meta.key_hash());

        meta.key_column = Some(0);
        let h = meta.key_hash();
        assert_ne!(0, h);
        assert_eq!(h, meta.key_hash());
    }
}
