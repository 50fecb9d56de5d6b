// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Binary codecs for the engine's control structures (`_meta`, `_tx`).
//!
//! Column data never goes through here; it is addressed directly in
//! mapped windows. Encoding can only fail on the underlying writer, so
//! [`EncodeError`] wraps I/O alone, while [`DecodeError`] also covers the
//! ways stored bytes can be malformed.

use std::io::{Read, Write};

/// The underlying writer failed while a structure was being written out
#[derive(Debug)]
pub struct EncodeError(std::io::Error);

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodeError({})", self.0)
    }
}

impl From<std::io::Error> for EncodeError {
    fn from(value: std::io::Error) -> Self {
        Self(value)
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// A stored structure could not be read back
#[derive(Debug)]
pub enum DecodeError {
    /// The underlying reader failed
    Io(std::io::Error),

    /// Invalid UTF-16 payload
    Utf16,

    /// Invalid enum tag
    InvalidTag((&'static str, u8)),

    /// Invalid block or record header
    InvalidHeader(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "DecodeError({e})"),
            e => write!(f, "DecodeError({e:?})"),
        }
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {}

/// A structure with a binary on-disk representation
pub trait Encode {
    /// Writes the binary representation into `writer`.
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError>;

    /// Encodes into an owned buffer.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        #[expect(clippy::expect_used, reason = "writing to a Vec cannot fail")]
        self.encode_into(&mut buffer)
            .expect("in-memory encode failed");
        buffer
    }
}

/// The read-side counterpart of [`Encode`]
pub trait Decode {
    /// Reads one structure back from `reader`.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, crate::Error>
    where
        Self: Sized;
}
