use nfsdb::{ColumnType, JournalConfig, PartitionType, Record, Value};
use test_log::test;

const JAN_1: i64 = 1_420_070_400_000; // 2015-01-01T00:00:00Z

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("quotes"))
        .column("sym", ColumnType::Symbol)
        .column("bid", ColumnType::Double)
        .column("ts", ColumnType::Date)
        .partition_by(PartitionType::Day)
        .timestamp_column("ts")
}

fn quote(sym: &str, bid: f64, ts: i64) -> Record {
    Record::from(vec![
        Value::Sym(sym.to_owned()),
        Value::Double(bid),
        Value::Date(ts),
    ])
}

#[test]
fn crash_before_first_tx_record() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    {
        let mut writer = config.clone().open_writer()?;
        for i in 0..10 {
            writer.append(&quote("AAPL", f64::from(i), JAN_1 + i64::from(i)))?;
        }
        // flush column data, then "die" before any tx record is written
        writer.force()?;
        drop(writer);
    }

    {
        let mut writer = config.clone().open_writer()?;
        assert_eq!(0, writer.size()?);
        // nothing was ever published, so the partition is gone entirely
        assert!(!folder.path().join("quotes/2015-01-01").exists());

        for i in 0..5 {
            writer.append(&quote("AAPL", f64::from(i), JAN_1 + i64::from(i)))?;
        }
        writer.commit()?;
        assert_eq!(5, writer.size()?);
    }

    let mut journal = config.open()?;
    assert_eq!(5, journal.size()?);
    Ok(())
}

#[test]
fn crash_after_a_commit_keeps_the_committed_prefix() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    {
        let mut writer = config.clone().open_writer()?;
        for i in 0..10 {
            writer.append(&quote("AAPL", f64::from(i), JAN_1 + i64::from(i)))?;
        }
        writer.commit()?;

        // more rows and a new symbol, never committed
        for i in 10..17 {
            writer.append(&quote("ORCL", f64::from(i), JAN_1 + i64::from(i)))?;
        }
        writer.force()?;
        drop(writer);
    }

    let mut writer = config.clone().open_writer()?;
    assert_eq!(10, writer.size()?);

    // column files are physically clamped to the committed rows
    let partition = folder.path().join("quotes/2015-01-01");
    assert_eq!(80, std::fs::metadata(partition.join("ts.d"))?.len());
    assert_eq!(40, std::fs::metadata(partition.join("sym.d"))?.len());

    // the uncommitted symbol is gone from the dictionary
    assert_eq!(1, writer.journal().symbol_table("sym").unwrap().size());

    let records: Vec<Record> = writer.journal().iter().collect::<nfsdb::Result<_>>()?;
    assert_eq!(10, records.len());
    assert!(records
        .iter()
        .all(|r| *r.get(0) == Value::Sym("AAPL".into())));
    Ok(())
}

#[test]
fn crash_with_uncommitted_second_partition() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());
    const JAN_2: i64 = JAN_1 + 86_400_000;

    {
        let mut writer = config.clone().open_writer()?;
        writer.append(&quote("AAPL", 1.0, JAN_1))?;
        writer.commit()?;

        // rolls into a second partition, never committed
        writer.append(&quote("AAPL", 2.0, JAN_2))?;
        writer.force()?;
        drop(writer);
    }

    let mut writer = config.clone().open_writer()?;
    assert_eq!(1, writer.size()?);
    assert!(!folder.path().join("quotes/2015-01-02").exists());

    let mut journal = config.open()?;
    assert_eq!(1, journal.size()?);
    Ok(())
}

#[test]
fn truncated_tx_tail_falls_back_to_previous_commit() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    {
        let mut writer = config.clone().open_writer()?;
        writer.append(&quote("AAPL", 1.0, JAN_1))?;
        writer.commit()?;
        writer.append(&quote("AAPL", 2.0, JAN_1 + 1))?;
        writer.commit()?;
    }

    // corrupt the second tx record's tail
    let tx_path = folder.path().join("quotes/_tx");
    let bytes = std::fs::read(&tx_path)?;
    std::fs::write(&tx_path, &bytes[..bytes.len() - 3])?;

    let mut writer = config.open_writer()?;
    assert_eq!(1, writer.size()?);
    Ok(())
}
