// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// An IEEE CRC32 checksum
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(u32);

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Checksum {
    /// Wraps a checksum value.
    #[must_use]
    pub fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Computes the checksum of a byte run.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(crc32fast::hash(bytes))
    }

    /// Returns the raw 32-bit integer.
    #[must_use]
    pub fn into_u32(self) -> u32 {
        self.0
    }

    pub(crate) fn check(&self, expected: Self) -> crate::Result<()> {
        if self.0 == expected.0 {
            Ok(())
        } else {
            Err(crate::Error::ChecksumMismatch {
                expected,
                got: *self,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Checksum;
    use test_log::test;

    #[test]
    fn checksum_empty() {
        assert_eq!(Checksum::of(b""), Checksum::from_raw(0));
    }

    #[test]
    fn checksum_check() {
        let sum = Checksum::of(b"hello");
        assert!(sum.check(Checksum::of(b"hello")).is_ok());
        assert!(sum.check(Checksum::of(b"world")).is_err());
    }
}
