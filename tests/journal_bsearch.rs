use nfsdb::{BsearchEdge, ColumnType, JournalConfig, PartitionType, Record, Value};
use test_log::test;

const JAN_1: i64 = 1_420_070_400_000;
const DAY: i64 = 86_400_000;

fn config(path: &std::path::Path) -> JournalConfig {
    JournalConfig::new(path.join("ticks"))
        .column("ts", ColumnType::Date)
        .partition_by(PartitionType::Day)
        .timestamp_column("ts")
}

#[test]
fn timestamp_search_across_partitions() -> nfsdb::Result<()> {
    let folder = tempfile::tempdir()?;
    let config = config(folder.path());

    let mut writer = config.clone().open_writer()?;
    // two days, three rows each, with duplicates
    for day in 0..2 {
        for ts in [0, 1_000, 1_000] {
            writer.append(&Record::from(vec![Value::Date(JAN_1 + day * DAY + ts)]))?;
        }
    }
    writer.commit()?;

    let mut journal = config.open()?;

    // smallest row with ts >= v
    let row = journal
        .row_for_timestamp(JAN_1 + 1_000, BsearchEdge::NewerOrSame)?
        .unwrap();
    assert_eq!(Value::Date(JAN_1 + 1_000), *journal.read_record(row)?.get(0));
    assert_eq!(1, nfsdb::rows::local_row_id(row));
    assert_eq!(0, nfsdb::rows::partition_index(row));

    // a probe between the days resolves into day two
    let row = journal
        .row_for_timestamp(JAN_1 + 2_000, BsearchEdge::NewerOrSame)?
        .unwrap();
    assert_eq!(1, nfsdb::rows::partition_index(row));
    assert_eq!(0, nfsdb::rows::local_row_id(row));

    // ...and backwards into day one
    let row = journal
        .row_for_timestamp(JAN_1 + 2_000, BsearchEdge::OlderOrSame)?
        .unwrap();
    assert_eq!(0, nfsdb::rows::partition_index(row));
    assert_eq!(2, nfsdb::rows::local_row_id(row));

    // strictly newer than the last duplicate
    let row = journal
        .row_for_timestamp(JAN_1 + 1_000, BsearchEdge::Newer)?
        .unwrap();
    assert_eq!(1, nfsdb::rows::partition_index(row));

    // nothing is newer than the very last row
    assert_eq!(
        None,
        journal.row_for_timestamp(JAN_1 + DAY + 1_000, BsearchEdge::Newer)?
    );
    // nothing is older than the very first
    assert_eq!(
        None,
        journal.row_for_timestamp(JAN_1, BsearchEdge::Older)?
    );
    Ok(())
}
