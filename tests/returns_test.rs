//! Return-file processing: parse, reconcile against transfers, and mutate
//! depository state.

mod common;

use ach_gateway::ach::{Addenda99, AchFile, Batch, BatchHeader, EntryDetail, FileHeader};
use ach_gateway::filetransfer::returns::process_return_files;
use ach_gateway::models::{DepositoryStatus, TransferStatus};
use ach_gateway::services::{DepositoryRepository, TransferRepository};
use chrono::Utc;
use common::{test_db, test_depository, transfer_request};
use uuid::Uuid;

fn return_file(trace: &str, amount_cents: i64, return_code: &str) -> AchFile {
    AchFile {
        header: FileHeader {
            immediate_destination: "121042882".into(),
            immediate_origin: "231380104".into(),
            file_creation_date: "190211".into(),
            file_creation_time: "0830".into(),
            file_id_modifier: "A".into(),
            immediate_destination_name: "Origin Bank".into(),
            immediate_origin_name: "Receiving Bank".into(),
        },
        batches: vec![Batch {
            header: BatchHeader {
                service_class_code: 200,
                company_name: "Acme Corp".into(),
                company_discretionary_data: String::new(),
                company_identification: "121042882".into(),
                standard_entry_class_code: "PPD".into(),
                company_entry_description: "RETURN".into(),
                company_descriptive_date: String::new(),
                effective_entry_date: Utc::now().format("%y%m%d").to_string(),
                odfi_identification: "23138010".into(),
                batch_number: 1,
            },
            entries: vec![EntryDetail {
                transaction_code: 21,
                rdfi_identification: "12104288".into(),
                check_digit: "2".into(),
                dfi_account_number: "151".into(),
                amount: amount_cents,
                individual_identification: String::new(),
                individual_name: "holder".into(),
                discretionary_data: String::new(),
                trace_number: "231380100000001".into(),
                addenda99: Some(Addenda99 {
                    return_code: return_code.into(),
                    original_trace: trace.into(),
                    original_rdfi: "12104288".into(),
                    addenda_information: String::new(),
                    trace_number: "231380100000001".into(),
                }),
            }],
        }],
    }
}

#[tokio::test]
async fn return_entry_sets_code_and_rejects_receiver() {
    let (db, _dir) = test_db().await;
    let dep_repo = DepositoryRepository::new(&db);
    let transfer_repo = TransferRepository::new(&db);

    let user_id = Uuid::new_v4().to_string();
    let orig_dep = test_depository("121042882");
    let recv_dep = test_depository("231380104");
    dep_repo.upsert_user_depository(&user_id, &orig_dep).await.unwrap();
    dep_repo.upsert_user_depository(&user_id, &recv_dep).await.unwrap();

    let mut req = transfer_request("32.92", &orig_dep.id, "test-file");
    req.receiver_depository = recv_dep.id.clone();
    let created = transfer_repo
        .create_user_transfers(&user_id, vec![req])
        .await
        .unwrap();
    transfer_repo
        .mark_transfer_as_merged(&created[0].id, "merged.ach", "121042880000001")
        .await
        .unwrap();

    // write the return file the way the download step lays files out
    let workdir = tempfile::tempdir().unwrap();
    let returned_dir = workdir.path().join("returned");
    std::fs::create_dir_all(&returned_dir).unwrap();
    let file = return_file("121042880000001", 32_92, "R02");
    std::fs::write(returned_dir.join("cc-return.ach"), file.render()).unwrap();

    process_return_files(&returned_dir, &transfer_repo, &dep_repo)
        .await
        .unwrap();

    let rc: (Option<String>,) =
        sqlx::query_as("SELECT return_code FROM transfers WHERE transfer_id = ?1")
            .bind(&created[0].id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(rc.0.as_deref(), Some("R02"));

    let recv = dep_repo
        .get_user_depository(&recv_dep.id, &user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recv.status, DepositoryStatus::Rejected);
    let orig = dep_repo
        .get_user_depository(&orig_dep.id, &user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(orig.status, DepositoryStatus::Unverified);
}

#[tokio::test]
async fn credit_reversing_return_reclaims_transfer() {
    let (db, _dir) = test_db().await;
    let dep_repo = DepositoryRepository::new(&db);
    let transfer_repo = TransferRepository::new(&db);

    let user_id = Uuid::new_v4().to_string();
    let dep = test_depository("121042882");
    dep_repo.upsert_user_depository(&user_id, &dep).await.unwrap();

    let created = transfer_repo
        .create_user_transfers(&user_id, vec![transfer_request("18.61", &dep.id, "test-file")])
        .await
        .unwrap();
    transfer_repo
        .mark_transfer_as_merged(&created[0].id, "merged.ach", "121042880000002")
        .await
        .unwrap();

    let workdir = tempfile::tempdir().unwrap();
    let returned_dir = workdir.path().join("returned");
    std::fs::create_dir_all(&returned_dir).unwrap();
    let file = return_file("121042880000002", 18_61, "R06");
    std::fs::write(returned_dir.join("cc-return.ach"), file.render()).unwrap();

    process_return_files(&returned_dir, &transfer_repo, &dep_repo)
        .await
        .unwrap();

    let xfer = transfer_repo
        .get_user_transfer(&created[0].id, &user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(xfer.status, TransferStatus::Reclaimed);
}

#[tokio::test]
async fn unparseable_return_files_are_skipped() {
    let (db, _dir) = test_db().await;
    let dep_repo = DepositoryRepository::new(&db);
    let transfer_repo = TransferRepository::new(&db);

    let workdir = tempfile::tempdir().unwrap();
    let returned_dir = workdir.path().join("returned");
    std::fs::create_dir_all(&returned_dir).unwrap();
    std::fs::write(returned_dir.join("garbage.ach"), "this is not nacha").unwrap();

    // a bad file must not abort the batch
    process_return_files(&returned_dir, &transfer_repo, &dep_repo)
        .await
        .unwrap();
}
