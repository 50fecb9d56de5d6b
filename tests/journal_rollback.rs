use nfsdb::{ColumnType, Error, JournalConfig, Record, Value};
use test_log::test;

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("trades"))
        .column("sym", ColumnType::Symbol)
        .indexed(true)
        .distinct_count_hint(16)
        .column("qty", ColumnType::Long)
}

fn trade(sym: &str, qty: i64) -> Record {
    Record::from(vec![Value::Sym(sym.to_owned()), Value::Long(qty)])
}

#[test]
fn explicit_rollback_discards_uncommitted_rows() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    writer.append(&trade("AAA", 1))?;
    writer.commit()?;

    writer.append(&trade("BBB", 2))?;
    writer.append(&trade("CCC", 3))?;
    assert_eq!(3, writer.size()?);

    writer.rollback()?;
    assert_eq!(1, writer.size()?);
    // uncommitted symbols are gone from the dictionary
    assert_eq!(1, writer.journal().symbol_table("sym").unwrap().size());

    // and the index no longer knows the rolled-back rows
    let key = writer.journal().symbol_table("sym").unwrap().get("AAA")?;
    assert_eq!(1, writer.journal().partition(0, true)?.index(0)?.get_value_count(key)?);

    writer.append(&trade("DDD", 4))?;
    writer.commit()?;
    assert_eq!(2, writer.size()?);
    Ok(())
}

#[test]
fn failed_append_rolls_back_automatically() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    writer.append(&trade("AAA", 1))?;
    writer.commit()?;

    // a mistyped record fails mid-row, after the symbol column was written
    let bad = Record::from(vec![
        Value::Sym("BBB".into()),
        Value::Str("not a long".into()),
    ]);
    assert!(matches!(
        writer.append(&bad),
        Err(Error::TypeMismatch { .. })
    ));

    // the partial row is gone
    assert_eq!(1, writer.size()?);
    assert_eq!(1, writer.journal().symbol_table("sym").unwrap().size());

    let records: Vec<Record> = writer.journal().iter().collect::<nfsdb::Result<_>>()?;
    assert_eq!(vec![trade("AAA", 1)], records);
    Ok(())
}

#[test]
fn int_min_value_roundtrips_bit_exactly() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = JournalConfig::new(folder.path().join("values"))
        .column("v", ColumnType::Int);

    let mut writer = config.clone().open_writer()?;
    writer.append(&Record::from(vec![Value::Int(i32::MIN)]))?;
    writer.append(&Record::from(vec![Value::Int(42)]))?;
    writer.commit()?;

    let mut journal = config.open()?;
    let record = journal.read_record(0)?;
    assert_eq!(Value::Int(i32::MIN), *record.get(0));

    // sentinel surfaces as NaN in floating point and i64::MIN widened
    assert_eq!(Some(i64::MIN), record.get(0).as_i64());
    assert!(record.get(0).as_f64().is_some_and(f64::is_nan));

    assert_eq!(Value::Int(42), *journal.read_record(1)?.get(0));
    Ok(())
}
