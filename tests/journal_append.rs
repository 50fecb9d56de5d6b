use nfsdb::{ColumnType, JournalConfig, PartitionType, Record, Value};
use test_log::test;

const JAN_1: i64 = 1_420_070_400_000; // 2015-01-01T00:00:00Z
const JAN_1_NOON: i64 = 1_420_113_600_000; // 2015-01-01T12:00:00Z
const JAN_2: i64 = 1_420_156_800_000; // 2015-01-02T00:00:00Z

fn quotes(path: &std::path::Path) -> JournalConfig {
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
fn chronological_append() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = quotes(folder.path());

    {
        let mut writer = config.clone().open_writer()?;
        writer.append(&quote("AAPL", 120.0, JAN_1))?;
        writer.append(&quote("MSFT", 40.5, JAN_1_NOON))?;
        writer.append(&quote("AAPL", 121.0, JAN_2))?;
        writer.commit()?;
    }

    assert!(folder.path().join("quotes/2015-01-01").is_dir());
    assert!(folder.path().join("quotes/2015-01-02").is_dir());

    let mut journal = config.open()?;
    assert_eq!(2, journal.partition_count());
    assert_eq!(3, journal.size()?);

    let records: Vec<Record> = journal.iter().collect::<nfsdb::Result<_>>()?;
    assert_eq!(
        vec![
            quote("AAPL", 120.0, JAN_1),
            quote("MSFT", 40.5, JAN_1_NOON),
            quote("AAPL", 121.0, JAN_2),
        ],
        records
    );

    Ok(())
}

#[test]
fn appends_within_one_day_share_a_partition() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = quotes(folder.path());

    let mut writer = config.clone().open_writer()?;
    for i in 0..100 {
        writer.append(&quote("AAPL", f64::from(i), JAN_1 + i64::from(i) * 1_000))?;
    }
    writer.commit()?;

    let mut journal = config.open()?;
    assert_eq!(1, journal.partition_count());
    assert_eq!(100, journal.size()?);
    Ok(())
}

#[test]
fn buffered_iteration_matches_owned() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = quotes(folder.path());

    let mut writer = config.clone().open_writer()?;
    writer.append(&quote("AAPL", 1.0, JAN_1))?;
    writer.append(&quote("MSFT", 2.0, JAN_1_NOON))?;
    writer.commit()?;

    let mut journal = config.open()?;
    let owned: Vec<Record> = journal.iter().collect::<nfsdb::Result<_>>()?;

    let mut buffered = journal.buffered_iter();
    let mut seen = vec![];
    while let Some(record) = buffered.next() {
        seen.push(record?.clone());
    }
    assert_eq!(owned, seen);
    Ok(())
}
