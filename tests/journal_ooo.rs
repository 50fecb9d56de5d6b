use nfsdb::{ColumnType, Error, JournalConfig, PartitionType, Record, Value};
use test_log::test;

const JAN_2: i64 = 1_420_156_800_000; // 2015-01-02T00:00:00Z
const JAN_1_LATE: i64 = 1_420_156_799_000; // 2015-01-01T23:59:59Z

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("quotes"))
        .column("bid", ColumnType::Double)
        .column("ts", ColumnType::Date)
        .partition_by(PartitionType::Day)
        .timestamp_column("ts")
}

fn quote(bid: f64, ts: i64) -> Record {
    Record::from(vec![Value::Double(bid), Value::Date(ts)])
}

#[test]
fn out_of_order_append_fails_without_lag() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    writer.append(&quote(1.0, JAN_2))?;
    writer.commit()?;

    let result = writer.append(&quote(2.0, JAN_1_LATE));
    assert!(matches!(
        result,
        Err(Error::TimestampOutOfOrder { timestamp, latest })
            if timestamp == JAN_1_LATE && latest == JAN_2
    ));

    writer.rollback()?;
    assert_eq!(1, writer.size()?);

    // on-disk column sizes are clamped to the committed row
    let partition = folder.path().join("quotes/2015-01-02");
    assert_eq!(8, std::fs::metadata(partition.join("ts.d"))?.len());
    assert_eq!(8, std::fs::metadata(partition.join("bid.d"))?.len());

    // the writer keeps working after the rollback
    writer.append(&quote(3.0, JAN_2 + 1_000))?;
    writer.commit()?;
    assert_eq!(2, writer.size()?);
    Ok(())
}

#[test]
fn equal_timestamps_are_allowed() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.open_writer()?;
    writer.append(&quote(1.0, JAN_2))?;
    writer.append(&quote(2.0, JAN_2))?;
    writer.commit()?;
    assert_eq!(2, writer.size()?);
    Ok(())
}

#[test]
fn order_is_enforced_across_reopen() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    {
        let mut writer = config.clone().open_writer()?;
        writer.append(&quote(1.0, JAN_2))?;
        writer.commit()?;
    }

    let mut writer = config.open_writer()?;
    assert!(matches!(
        writer.append(&quote(2.0, JAN_1_LATE)),
        Err(Error::TimestampOutOfOrder { .. })
    ));
    Ok(())
}
