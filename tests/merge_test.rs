//! Merged-file store tests: sequence numbering, dedup, and the 10,000-line
//! rollover.

use ach_gateway::ach::{AchFile, Batch, BatchHeader, EntryDetail, FileHeader};
use ach_gateway::filetransfer::merge::{grab_latest_merged_file, merge_transfer, MAX_LINES};
use ach_gateway::services::GroupableTransfer;
use chrono::Utc;
use uuid::Uuid;

const DESTINATION: &str = "231380104";

fn entry(amount: i64, name: &str, trace: &str) -> EntryDetail {
    EntryDetail {
        transaction_code: 22,
        rdfi_identification: "23138010".into(),
        check_digit: "4".into(),
        dfi_account_number: "12345678".into(),
        amount,
        individual_identification: String::new(),
        individual_name: name.into(),
        discretionary_data: String::new(),
        trace_number: trace.into(),
        addenda99: None,
    }
}

fn batch(number: u32, entry_count: usize) -> Batch {
    let entries = (0..entry_count)
        .map(|i| {
            entry(
                10_00 + i as i64,
                &format!("Payee {number}-{i}"),
                &format!("12104288{number:03}{i:04}"),
            )
        })
        .collect();
    Batch {
        header: BatchHeader {
            service_class_code: 220,
            company_name: format!("Company {number}"),
            company_discretionary_data: String::new(),
            company_identification: "121042882".into(),
            standard_entry_class_code: "PPD".into(),
            company_entry_description: "PAYROLL".into(),
            company_descriptive_date: String::new(),
            effective_entry_date: "190212".into(),
            odfi_identification: "12104288".into(),
            batch_number: number,
        },
        entries,
    }
}

fn incoming(batches: Vec<Batch>) -> AchFile {
    AchFile {
        header: FileHeader {
            immediate_destination: DESTINATION.into(),
            immediate_origin: "121042882".into(),
            file_creation_date: "190211".into(),
            file_creation_time: "0830".into(),
            file_id_modifier: "A".into(),
            immediate_destination_name: "Destination".into(),
            immediate_origin_name: "Origin".into(),
        },
        batches,
    }
}

fn xfer() -> GroupableTransfer {
    GroupableTransfer {
        id: Uuid::new_v4().to_string(),
        user_id: Uuid::new_v4().to_string(),
        destination: DESTINATION.into(),
        file_id: "test-file".into(),
        created_at: Utc::now(),
    }
}

#[test]
fn fresh_merged_file_starts_at_sequence_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = incoming(vec![batch(1, 2)]);

    let merged = grab_latest_merged_file(dir.path(), DESTINATION, &file).unwrap();
    assert_eq!(merged.sequence(), 1);
    assert!(merged.path.exists());
    assert_eq!(merged.destination, DESTINATION);
    // seeded from the incoming file
    assert_eq!(merged.file.batches.len(), 1);

    // the handle is found again rather than recreated
    let again = grab_latest_merged_file(dir.path(), DESTINATION, &file).unwrap();
    assert_eq!(again.sequence(), 1);
    assert_eq!(again.file.batches.len(), 1);
}

#[test]
fn duplicate_batches_are_not_remerged() {
    let dir = tempfile::tempdir().unwrap();
    let file = incoming(vec![batch(1, 2)]);

    let mut merged = grab_latest_merged_file(dir.path(), DESTINATION, &file).unwrap();
    let closed = merge_transfer(&file, &mut merged, &xfer()).unwrap();
    assert!(closed.is_empty());
    assert_eq!(merged.file.batches.len(), 1);

    // merging the same file again changes nothing but still records the
    // transfer for post-upload bookkeeping
    let other = xfer();
    let closed = merge_transfer(&file, &mut merged, &other).unwrap();
    assert!(closed.is_empty());
    assert_eq!(merged.file.batches.len(), 1);
    assert!(merged.transfers.iter().any(|t| t.id == other.id));
}

#[test]
fn rollover_keeps_files_under_the_line_limit() {
    let dir = tempfile::tempdir().unwrap();

    // Two large batches fill the file to just under the limit; the third
    // overflows it.
    let first = incoming(vec![batch(1, 4990)]);
    let second = incoming(vec![batch(2, 4990)]);
    let third = incoming(vec![batch(3, 20)]);

    let mut merged = grab_latest_merged_file(dir.path(), DESTINATION, &first).unwrap();
    assert!(merge_transfer(&first, &mut merged, &xfer()).unwrap().is_empty());
    assert!(merge_transfer(&second, &mut merged, &xfer()).unwrap().is_empty());
    assert!(merged.line_count() <= MAX_LINES);

    let closed = merge_transfer(&third, &mut merged, &xfer()).unwrap();
    assert_eq!(closed.len(), 1);

    let closed = &closed[0];
    assert!(closed.line_count() <= MAX_LINES, "closed file over the limit");
    assert_eq!(closed.sequence(), 1);
    assert_eq!(merged.sequence(), 2);

    // the overflow batch appears exactly once, in the new file
    let in_closed = closed
        .file
        .batches
        .iter()
        .filter(|b| b.header.company_name == "Company 3")
        .count();
    let in_open = merged
        .file
        .batches
        .iter()
        .filter(|b| b.header.company_name == "Company 3")
        .count();
    assert_eq!(in_closed, 0);
    assert_eq!(in_open, 1);

    // both files were flushed and reparse cleanly
    let reparsed = AchFile::parse_bytes(&std::fs::read(&closed.path).unwrap()).unwrap();
    assert_eq!(reparsed.batches.len(), closed.file.batches.len());
    let reparsed = AchFile::parse_bytes(&std::fs::read(&merged.path).unwrap()).unwrap();
    assert_eq!(reparsed.batches.len(), 1);
}

#[test]
fn sequence_continues_past_uploaded_files() {
    let dir = tempfile::tempdir().unwrap();
    let file = incoming(vec![batch(1, 2)]);

    // pretend sequence 1 and 2 already shipped today
    let uploaded = dir.path().join("uploaded");
    std::fs::create_dir_all(&uploaded).unwrap();
    let today = chrono::Local::now().date_naive().format("%Y%m%d");
    std::fs::write(uploaded.join(format!("{today}-{DESTINATION}-1.ach")), "").unwrap();
    std::fs::write(uploaded.join(format!("{today}-{DESTINATION}-2.ach")), "").unwrap();

    let merged = grab_latest_merged_file(dir.path(), DESTINATION, &file).unwrap();
    assert_eq!(merged.sequence(), 3);
}
