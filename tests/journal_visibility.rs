use nfsdb::{ColumnType, JournalConfig, Record, Value};
use test_log::test;

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("points"))
        .column("v", ColumnType::Long)
        .column("ts", ColumnType::Date)
        .timestamp_column("ts")
}

fn point(v: i64) -> Record {
    Record::from(vec![Value::Long(v), Value::Date(v)])
}

#[test]
fn reader_sees_only_committed_rows() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    let mut reader = config.open()?;
    assert_eq!(0, reader.size()?);

    for i in 0..100 {
        writer.append(&point(i))?;
    }
    writer.commit()?;

    // nothing moves until the reader refreshes
    assert_eq!(0, reader.size()?);
    assert!(reader.refresh()?);
    assert_eq!(100, reader.size()?);

    // uncommitted appends stay invisible, refresh or not
    for i in 100..150 {
        writer.append(&point(i))?;
    }
    assert!(!reader.refresh()?);
    assert_eq!(100, reader.size()?);

    writer.commit()?;
    assert!(reader.refresh()?);
    assert_eq!(150, reader.size()?);

    let last = reader.read_record(149)?;
    assert_eq!(Value::Long(149), *last.get(0));
    Ok(())
}

#[test]
fn observed_rows_never_change() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    for i in 0..10 {
        writer.append(&point(i))?;
    }
    writer.commit()?;

    let mut reader = config.open()?;
    let before: Vec<Record> = reader.iter().collect::<nfsdb::Result<_>>()?;

    for i in 10..20 {
        writer.append(&point(i))?;
    }
    writer.commit()?;
    reader.refresh()?;

    let after: Vec<Record> = reader.iter().collect::<nfsdb::Result<_>>()?;
    assert_eq!(20, after.len());
    // the two views differ only in the appended suffix
    assert_eq!(before.as_slice(), &after[..10]);
    Ok(())
}

#[test]
fn multiple_readers_advance_independently() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    writer.append(&point(1))?;
    writer.commit()?;

    let mut fast = config.clone().open()?;
    let mut slow = config.open()?;
    assert_eq!(1, fast.size()?);
    assert_eq!(1, slow.size()?);

    writer.append(&point(2))?;
    writer.commit()?;

    fast.refresh()?;
    assert_eq!(2, fast.size()?);
    // the slow reader still sees its old transaction
    assert_eq!(1, slow.size()?);

    slow.refresh()?;
    assert_eq!(2, slow.size()?);
    Ok(())
}
