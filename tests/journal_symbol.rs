use nfsdb::{ColumnType, JournalConfig, Record, Value};
use test_log::test;

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("trades"))
        .column("sym", ColumnType::Symbol)
        .column("qty", ColumnType::Long)
}

fn trade(sym: Option<&str>, qty: i64) -> Record {
    Record::from(vec![
        sym.map_or(Value::Null, |s| Value::Sym(s.to_owned())),
        Value::Long(qty),
    ])
}

#[test]
fn symbols_are_deduplicated() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    {
        let mut writer = config.clone().open_writer()?;
        writer.append(&trade(Some("AAA"), 1))?;
        writer.append(&trade(Some("BBB"), 2))?;
        writer.append(&trade(Some("AAA"), 3))?;
        writer.commit()?;

        let table = writer.journal().symbol_table("sym").unwrap();
        assert_eq!(2, table.size());
    }

    let mut journal = config.open()?;
    let table = journal.symbol_table("sym").unwrap();
    assert_eq!(2, table.size());
    let key_aaa = table.get("AAA")?;
    let key_bbb = table.get("BBB")?;
    assert_ne!(key_aaa, key_bbb);

    // rows 0 and 2 resolve through the same key
    let records: Vec<Record> = journal.iter().collect::<nfsdb::Result<_>>()?;
    assert_eq!(Value::Sym("AAA".into()), *records[0].get(0));
    assert_eq!(Value::Sym("BBB".into()), *records[1].get(0));
    assert_eq!(records[0].get(0), records[2].get(0));
    Ok(())
}

#[test]
fn null_symbol_roundtrips() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    writer.append(&trade(None, 1))?;
    writer.append(&trade(Some("XYZ"), 2))?;
    writer.commit()?;

    // the null row contributed nothing to the dictionary
    assert_eq!(1, writer.journal().symbol_table("sym").unwrap().size());

    let mut journal = config.open()?;
    let records: Vec<Record> = journal.iter().collect::<nfsdb::Result<_>>()?;
    assert_eq!(Value::Null, *records[0].get(0));
    assert_eq!(Value::Sym("XYZ".into()), *records[1].get(0));
    Ok(())
}

#[test]
fn symbol_table_is_shared_across_partitions() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = JournalConfig::new(folder.path().join("trades"))
        .column("sym", ColumnType::Symbol)
        .column("ts", ColumnType::Date)
        .partition_by(nfsdb::PartitionType::Day)
        .timestamp_column("ts");

    const DAY: i64 = 86_400_000;
    let mut writer = config.clone().open_writer()?;
    for day in 0..5 {
        writer.append(&Record::from(vec![
            Value::Sym("SAME".into()),
            Value::Date(1_420_070_400_000 + day * DAY),
        ]))?;
    }
    writer.commit()?;

    let mut journal = config.open()?;
    assert_eq!(5, journal.partition_count());
    assert_eq!(1, journal.symbol_table("sym").unwrap().size());
    Ok(())
}
