use nfsdb::{ColumnType, JournalConfig, Record, Value};
use test_log::test;

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("trades"))
        .column("sym", ColumnType::Symbol)
        .column("price", ColumnType::Double)
        .column("qty", ColumnType::Long)
}

#[test]
fn inactive_columns_are_skipped_on_read() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    writer.append(&Record::from(vec![
        Value::Sym("AAA".into()),
        Value::Double(1.5),
        Value::Long(100),
    ]))?;
    writer.commit()?;

    let mut journal = config.open()?;
    journal.select(&["sym", "qty"])?;

    let record = journal.read_record(0)?;
    assert_eq!(Value::Sym("AAA".into()), *record.get(0));
    assert_eq!(Value::Null, *record.get(1)); // untouched
    assert_eq!(Value::Long(100), *record.get(2));

    journal.select_all();
    let record = journal.read_record(0)?;
    assert_eq!(Value::Double(1.5), *record.get(1));
    Ok(())
}

#[test]
fn selecting_an_unknown_column_fails() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let writer = config.clone().open_writer()?;
    writer.close()?;

    let mut journal = config.open()?;
    assert!(journal.select(&["nope"]).is_err());
    Ok(())
}
