//! End-to-end controller ticks against a local-directory "remote" host and
//! a mock ACH codec service.

mod common;

use ach_gateway::ach::{AchFile, Batch, BatchHeader, EntryDetail, FileHeader};
use ach_gateway::config::FileTransferConfig;
use ach_gateway::filetransfer::{
    FileTransferAgent, FileTransferController, FileTransferRepository, LocalDirAgent,
};
use ach_gateway::services::{AchClient, Database, DepositoryRepository, TransferRepository};
use axum::routing::get;
use axum::Router;
use common::{test_db, test_depository, transfer_request};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DESTINATION: &str = "231380104";

async fn seed_destination_configs(db: &Database, cutoff: u32) {
    sqlx::query("INSERT INTO cutoff_times (routing_number, cutoff, location) VALUES (?1, ?2, 'America/New_York')")
        .bind(DESTINATION)
        .bind(cutoff as i64)
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO remote_host_configs (routing_number, hostname, username, password, protocol) VALUES (?1, 'localhost:2121', 'admin', '123456', 'sftp')")
        .bind(DESTINATION)
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO path_configs (routing_number, inbound_path, outbound_path, return_path) VALUES (?1, 'inbound/', 'outbound/', 'returned/')")
        .bind(DESTINATION)
        .execute(db.pool())
        .await
        .unwrap();
}

fn local_agent_factory(remote_root: PathBuf) -> ach_gateway::filetransfer::AgentFactory {
    Arc::new(move |_, paths| {
        Ok(Box::new(LocalDirAgent::new(remote_root.clone(), paths.clone()))
            as Box<dyn FileTransferAgent>)
    })
}

fn entry_file(trace: &str, amount_cents: i64) -> AchFile {
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
        batches: vec![Batch {
            header: BatchHeader {
                service_class_code: 220,
                company_name: "Acme Corp".into(),
                company_discretionary_data: String::new(),
                company_identification: "121042882".into(),
                standard_entry_class_code: "PPD".into(),
                company_entry_description: "PAYROLL".into(),
                company_descriptive_date: String::new(),
                effective_entry_date: chrono::Utc::now().format("%y%m%d").to_string(),
                odfi_identification: "12104288".into(),
                batch_number: 1,
            },
            entries: vec![EntryDetail {
                transaction_code: 22,
                rdfi_identification: "23138010".into(),
                check_digit: "4".into(),
                dfi_account_number: "12345678".into(),
                amount: amount_cents,
                individual_identification: String::new(),
                individual_name: "Jane Doe".into(),
                discretionary_data: String::new(),
                trace_number: trace.into(),
                addenda99: None,
            }],
        }],
    }
}

/// Serves `GET /files/:id/contents` with a fixed NACHA body.
async fn spawn_mock_ach_service(contents: String) -> String {
    let router = Router::new().route(
        "/files/:fileId/contents",
        get(move || {
            let contents = contents.clone();
            async move { contents }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://127.0.0.1:{port}")
}

fn controller_config(storage: &std::path::Path, lead: Duration) -> FileTransferConfig {
    FileTransferConfig {
        interval: Duration::from_secs(3600),
        batch_size: 100,
        upload_lead_time: lead,
        storage_dir: storage.to_string_lossy().into_owned(),
    }
}

/// An HHMM cutoff comfortably in the future of the destination's banking
/// day, so the destination is not due during the test.
fn cutoff_far_from_now() -> u32 {
    let now_et = chrono::Utc::now().with_timezone(&chrono_tz::America::New_York);
    let later = now_et + chrono::Duration::hours(2);
    if later.date_naive() == now_et.date_naive() {
        later.format("%H%M").to_string().parse().unwrap()
    } else {
        2359
    }
}

#[tokio::test]
async fn tick_merges_and_uploads_before_cutoff() {
    let (db, _dir) = test_db().await;
    let dep_repo = DepositoryRepository::new(&db);
    let transfer_repo = TransferRepository::new(&db);
    let ft_repo = FileTransferRepository::new(&db);

    // a cutoff of 00:01 keeps the destination permanently inside the
    // 30-minute upload window
    seed_destination_configs(&db, 1).await;

    let user_id = Uuid::new_v4().to_string();
    let dep = test_depository(DESTINATION);
    dep_repo.upsert_user_depository(&user_id, &dep).await.unwrap();
    let created = transfer_repo
        .create_user_transfers(&user_id, vec![transfer_request("100.00", &dep.id, "entry-file-1")])
        .await
        .unwrap();

    let endpoint =
        spawn_mock_ach_service(entry_file("121042880000001", 100_00).render()).await;

    let remote_root = tempfile::tempdir().unwrap();
    let storage = tempfile::tempdir().unwrap();
    let controller = FileTransferController::new(
        &controller_config(storage.path(), Duration::from_secs(30 * 60)),
        AchClient::new(&endpoint),
        &ft_repo,
        transfer_repo.clone(),
        dep_repo.clone(),
    )
    .await
    .unwrap()
    .with_agent_factory(local_agent_factory(remote_root.path().to_path_buf()));

    controller.tick_once().await.unwrap();

    // the merged file reached the remote outbound directory
    let outbound = remote_root.path().join("outbound");
    let uploaded: Vec<_> = std::fs::read_dir(&outbound)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(uploaded.len(), 1, "expected one uploaded file: {uploaded:?}");
    assert!(uploaded[0].contains(&format!("-{DESTINATION}-")));
    assert!(uploaded[0].ends_with("-1.ach"));

    // the transfer is marked merged only after the upload succeeded
    let row: (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT merged_filename, trace_number FROM transfers WHERE transfer_id = ?1",
    )
    .bind(&created[0].id)
    .fetch_one(db.pool())
    .await
    .unwrap();
    assert_eq!(row.0.as_deref(), Some(uploaded[0].as_str()));
    assert_eq!(row.1.as_deref(), Some("121042880000001"));

    // the local copy moved aside so the next merge starts a new sequence
    let merged_dir = storage.path().join("merged");
    assert!(merged_dir.join("uploaded").join(&uploaded[0]).exists());
    assert!(!merged_dir.join(&uploaded[0]).exists());

    // a second tick with nothing pending uploads nothing new
    controller.tick_once().await.unwrap();
    let count = std::fs::read_dir(&outbound).unwrap().count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn tick_leaves_open_files_outside_cutoff_window() {
    let (db, _dir) = test_db().await;
    let dep_repo = DepositoryRepository::new(&db);
    let transfer_repo = TransferRepository::new(&db);
    let ft_repo = FileTransferRepository::new(&db);

    seed_destination_configs(&db, cutoff_far_from_now()).await;

    let user_id = Uuid::new_v4().to_string();
    let dep = test_depository(DESTINATION);
    dep_repo.upsert_user_depository(&user_id, &dep).await.unwrap();
    transfer_repo
        .create_user_transfers(&user_id, vec![transfer_request("12.12", &dep.id, "entry-file-1")])
        .await
        .unwrap();

    let endpoint =
        spawn_mock_ach_service(entry_file("121042880000002", 12_12).render()).await;

    let remote_root = tempfile::tempdir().unwrap();
    let storage = tempfile::tempdir().unwrap();
    let controller = FileTransferController::new(
        &controller_config(storage.path(), Duration::ZERO),
        AchClient::new(&endpoint),
        &ft_repo,
        transfer_repo.clone(),
        dep_repo.clone(),
    )
    .await
    .unwrap()
    .with_agent_factory(local_agent_factory(remote_root.path().to_path_buf()));

    controller.tick_once().await.unwrap();

    // nothing shipped; the open merged file stays in the workspace
    assert!(!remote_root.path().join("outbound").exists());
    let merged_files = std::fs::read_dir(storage.path().join("merged"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".ach"))
        .count();
    assert_eq!(merged_files, 1);
}

#[tokio::test]
async fn tick_downloads_and_deletes_remote_return_files() {
    let (db, _dir) = test_db().await;
    let dep_repo = DepositoryRepository::new(&db);
    let transfer_repo = TransferRepository::new(&db);
    let ft_repo = FileTransferRepository::new(&db);

    seed_destination_configs(&db, cutoff_far_from_now()).await;

    let user_id = Uuid::new_v4().to_string();
    let dep = test_depository(DESTINATION);
    dep_repo.upsert_user_depository(&user_id, &dep).await.unwrap();
    let created = transfer_repo
        .create_user_transfers(&user_id, vec![transfer_request("32.92", &dep.id, "")])
        .await
        .unwrap();
    transfer_repo
        .mark_transfer_as_merged(&created[0].id, "merged.ach", "121042880000003")
        .await
        .unwrap();

    // park a return file on the "remote" host
    let mut returned = entry_file("231380100000009", 32_92);
    returned.batches[0].entries[0].addenda99 = Some(ach_gateway::ach::Addenda99 {
        return_code: "R02".into(),
        original_trace: "121042880000003".into(),
        original_rdfi: "12104288".into(),
        addenda_information: String::new(),
        trace_number: "231380100000009".into(),
    });
    let remote_root = tempfile::tempdir().unwrap();
    let returned_dir = remote_root.path().join("returned");
    std::fs::create_dir_all(&returned_dir).unwrap();
    std::fs::write(returned_dir.join("cc-return.ach"), returned.render()).unwrap();

    let endpoint = spawn_mock_ach_service(String::new()).await;
    let storage = tempfile::tempdir().unwrap();
    let controller = FileTransferController::new(
        &controller_config(storage.path(), Duration::ZERO),
        AchClient::new(&endpoint),
        &ft_repo,
        transfer_repo.clone(),
        dep_repo.clone(),
    )
    .await
    .unwrap()
    .with_agent_factory(local_agent_factory(remote_root.path().to_path_buf()));

    controller.tick_once().await.unwrap();

    // return code recorded and receiver depository rejected
    let rc: (Option<String>,) =
        sqlx::query_as("SELECT return_code FROM transfers WHERE transfer_id = ?1")
            .bind(&created[0].id)
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(rc.0.as_deref(), Some("R02"));

    // remote copy deleted after successful processing
    assert_eq!(std::fs::read_dir(&returned_dir).unwrap().count(), 0);

    // the downloaded workspace was cleaned up
    let leftovers = std::fs::read_dir(storage.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("downloaded"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn controller_honors_shutdown_between_ticks() {
    let (db, _dir) = test_db().await;
    let dep_repo = DepositoryRepository::new(&db);
    let transfer_repo = TransferRepository::new(&db);
    let ft_repo = FileTransferRepository::new(&db);

    let storage = tempfile::tempdir().unwrap();
    let controller = FileTransferController::new(
        &controller_config(storage.path(), Duration::from_secs(30 * 60)),
        AchClient::new("http://localhost:8080"),
        &ft_repo,
        transfer_repo,
        dep_repo,
    )
    .await
    .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(controller.run(shutdown_rx));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("controller did not stop")
        .unwrap()
        .unwrap();
}
