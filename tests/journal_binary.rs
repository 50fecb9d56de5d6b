use nfsdb::{ColumnType, JournalConfig, Record, Value};
use test_log::test;

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("blobs"))
        .column("name", ColumnType::String)
        .column("payload", ColumnType::Binary)
}

#[test]
fn binary_roundtrip() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let blob: Vec<u8> = (0u16..=255).map(|b| b as u8).cycle().take(10_000).collect();

    let mut writer = config.clone().open_writer()?;
    writer.append(&Record::from(vec![
        Value::Str("big".into()),
        Value::Bin(blob.clone()),
    ]))?;
    writer.append(&Record::from(vec![
        Value::Str("empty".into()),
        Value::Bin(vec![]),
    ]))?;
    writer.append(&Record::from(vec![Value::Null, Value::Null]))?;
    writer.commit()?;

    let mut journal = config.open()?;
    let records: Vec<Record> = journal.iter().collect::<nfsdb::Result<_>>()?;

    assert_eq!(Value::Bin(blob), *records[0].get(1));

    // empty and null are distinct
    assert_eq!(Value::Bin(vec![]), *records[1].get(1));
    assert_eq!(Value::Null, *records[2].get(1));
    assert_eq!(Value::Null, *records[2].get(0));
    assert_eq!(Value::Str("empty".into()), *records[1].get(0));
    Ok(())
}

#[test]
fn unicode_strings_roundtrip() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let samples = ["", "plain", "grüße", "日本語", "𝄞 beyond the BMP 🦀"];

    let mut writer = config.clone().open_writer()?;
    for s in samples {
        writer.append(&Record::from(vec![Value::Str(s.to_owned()), Value::Null]))?;
    }
    writer.commit()?;

    let mut journal = config.open()?;
    for (row, s) in samples.iter().enumerate() {
        let record = journal.read_record(row as u64)?;
        assert_eq!(Value::Str((*s).to_owned()), *record.get(0));
    }
    Ok(())
}
