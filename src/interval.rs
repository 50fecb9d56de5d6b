// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use chrono::{Datelike, TimeZone, Utc};

/// Directory-name suffix of a lag partition
pub(crate) const LAG_SUFFIX: &str = ".lag";

/// How journal rows are split into time-range partitions
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PartitionType {
    /// One partition holds everything
    #[default]
    None,

    /// One partition per UTC day
    Day,

    /// One partition per UTC month
    Month,

    /// One partition per UTC year
    Year,
}

impl From<PartitionType> for u8 {
    fn from(value: PartitionType) -> Self {
        match value {
            PartitionType::None => 0,
            PartitionType::Day => 1,
            PartitionType::Month => 2,
            PartitionType::Year => 3,
        }
    }
}

impl TryFrom<u8> for PartitionType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Day),
            2 => Ok(Self::Month),
            3 => Ok(Self::Year),
            _ => Err(()),
        }
    }
}

/// A `[start, end)` time range in epoch milliseconds; partition intervals
/// are aligned to UTC calendar boundaries
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    start_ms: i64,
    end_ms: i64,
}

fn utc_millis(year: i32, month: u32, day: u32) -> crate::Result<i64> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp_millis())
        .ok_or(crate::Error::Unrecoverable)
}

impl Interval {
    /// The unbounded interval used when partitioning is off.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            start_ms: i64::MIN,
            end_ms: i64::MAX,
        }
    }

    /// The partition interval containing `timestamp_ms`.
    pub fn containing(timestamp_ms: i64, partition_type: PartitionType) -> crate::Result<Self> {
        if partition_type == PartitionType::None {
            return Ok(Self::unbounded());
        }

        let date = Utc
            .timestamp_millis_opt(timestamp_ms)
            .single()
            .ok_or(crate::Error::Unrecoverable)?
            .date_naive();

        let (start, end) = match partition_type {
            PartitionType::Day => {
                let start = utc_millis(date.year(), date.month(), date.day())?;
                let next = date
                    .succ_opt()
                    .ok_or(crate::Error::Unrecoverable)?;
                (start, utc_millis(next.year(), next.month(), next.day())?)
            }
            PartitionType::Month => {
                let start = utc_millis(date.year(), date.month(), 1)?;
                let end = if date.month() == 12 {
                    utc_millis(date.year() + 1, 1, 1)?
                } else {
                    utc_millis(date.year(), date.month() + 1, 1)?
                };
                (start, end)
            }
            PartitionType::Year => (
                utc_millis(date.year(), 1, 1)?,
                utc_millis(date.year() + 1, 1, 1)?,
            ),
            PartitionType::None => unreachable!("handled above"),
        };

        Ok(Self {
            start_ms: start,
            end_ms: end,
        })
    }

    /// Interval start, epoch milliseconds.
    #[must_use]
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// Interval end (exclusive), epoch milliseconds.
    #[must_use]
    pub fn end_ms(&self) -> i64 {
        self.end_ms
    }

    /// Whether the timestamp falls inside this interval.
    #[must_use]
    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms < self.end_ms
    }

    /// The UTC directory name of this interval.
    pub fn dir_name(&self, partition_type: PartitionType) -> crate::Result<String> {
        if partition_type == PartitionType::None {
            return Ok("default".to_owned());
        }

        let date = Utc
            .timestamp_millis_opt(self.start_ms)
            .single()
            .ok_or(crate::Error::Unrecoverable)?
            .date_naive();

        Ok(match partition_type {
            PartitionType::Day => date.format("%Y-%m-%d").to_string(),
            PartitionType::Month => date.format("%Y-%m").to_string(),
            PartitionType::Year => date.format("%Y").to_string(),
            PartitionType::None => unreachable!("handled above"),
        })
    }

    /// Parses a partition directory name back into its interval; the
    /// second value flags a `.lag` partition. `None` for foreign files.
    #[must_use]
    pub fn parse_dir_name(name: &str, partition_type: PartitionType) -> Option<(Self, bool)> {
        let (name, lag) = match name.strip_suffix(LAG_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (name, false),
        };

        if partition_type == PartitionType::None {
            return (name == "default").then(|| (Self::unbounded(), lag));
        }

        let mut parts = name.split('-');
        let year: i32 = parts.next()?.parse().ok()?;

        let (month, day) = match partition_type {
            PartitionType::Day => (parts.next()?.parse().ok()?, parts.next()?.parse().ok()?),
            PartitionType::Month => (parts.next()?.parse().ok()?, 1),
            _ => (1, 1),
        };
        if parts.next().is_some() {
            return None;
        }

        let start = utc_millis(year, month, day).ok()?;
        Self::containing(start, partition_type)
            .ok()
            .map(|interval| (interval, lag))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use test_log::test;

    // 2015-01-01T12:30:00Z
    const TS: i64 = 1_420_115_400_000;

    #[test]
    fn day_interval() -> crate::Result<()> {
        let interval = Interval::containing(TS, PartitionType::Day)?;
        assert_eq!("2015-01-01", interval.dir_name(PartitionType::Day)?);
        assert!(interval.contains(TS));
        assert!(interval.contains(interval.start_ms()));
        assert!(!interval.contains(interval.end_ms()));
        assert_eq!(86_400_000, interval.end_ms() - interval.start_ms());
        Ok(())
    }

    #[test]
    fn month_and_year_intervals() -> crate::Result<()> {
        let month = Interval::containing(TS, PartitionType::Month)?;
        assert_eq!("2015-01", month.dir_name(PartitionType::Month)?);

        let year = Interval::containing(TS, PartitionType::Year)?;
        assert_eq!("2015", year.dir_name(PartitionType::Year)?);
        assert!(year.contains(month.start_ms()));
        Ok(())
    }

    #[test]
    fn year_rollover() -> crate::Result<()> {
        // 2015-12-31T23:59:59.999Z
        let ts = 1_451_606_399_999;
        let day = Interval::containing(ts, PartitionType::Day)?;
        assert_eq!("2015-12-31", day.dir_name(PartitionType::Day)?);
        assert!(!day.contains(ts + 1));

        let month = Interval::containing(ts, PartitionType::Month)?;
        assert!(!month.contains(ts + 1));
        Ok(())
    }

    #[test]
    fn unpartitioned() -> crate::Result<()> {
        let interval = Interval::containing(TS, PartitionType::None)?;
        assert_eq!("default", interval.dir_name(PartitionType::None)?);
        assert!(interval.contains(i64::MIN));
        Ok(())
    }

    #[test]
    fn dir_name_roundtrip() -> crate::Result<()> {
        for partition_type in [
            PartitionType::Day,
            PartitionType::Month,
            PartitionType::Year,
            PartitionType::None,
        ] {
            let interval = Interval::containing(TS, partition_type)?;
            let name = interval.dir_name(partition_type)?;
            let (parsed, lag) = Interval::parse_dir_name(&name, partition_type).unwrap();
            assert_eq!(interval, parsed);
            assert!(!lag);
        }
        Ok(())
    }

    #[test]
    fn lag_suffix() {
        let (interval, lag) =
            Interval::parse_dir_name("2015-01-01.lag", PartitionType::Day).unwrap();
        assert!(lag);
        assert_eq!(
            "2015-01-01",
            interval.dir_name(PartitionType::Day).unwrap()
        );
    }

    #[test]
    fn foreign_names_are_ignored() {
        assert!(Interval::parse_dir_name("_meta", PartitionType::Day).is_none());
        assert!(Interval::parse_dir_name("2015", PartitionType::Day).is_none());
        assert!(Interval::parse_dir_name("notayear", PartitionType::Year).is_none());
    }
}
