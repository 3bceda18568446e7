#![allow(dead_code)]

use ach_gateway::config::{
    AchConfig, Config, DatabaseConfig, FileTransferConfig, ServerConfig,
};
use ach_gateway::models::{
    AccountType, Amount, Depository, DepositoryStatus, HolderType, TransferRequest, TransferType,
};
use ach_gateway::services::Database;
use ach_gateway::{AppState, Application};
use chrono::Utc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub state: AppState,
    // keeps the sqlite file and storage dir alive for the test's duration
    _workdir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let workdir = tempfile::tempdir().expect("create test workdir");
        let config = test_config(&workdir);

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let state = app.state();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the HTTP server to come up.
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{port}/health");
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address: format!("http://127.0.0.1:{port}"),
            port,
            state,
            _workdir: workdir,
        }
    }
}

pub fn test_config(workdir: &TempDir) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // random port
        },
        database: DatabaseConfig {
            path: workdir
                .path()
                .join("test.db")
                .to_string_lossy()
                .into_owned(),
        },
        ach: AchConfig {
            endpoint: "http://localhost:8080".to_string(),
        },
        file_transfer: FileTransferConfig {
            // long enough that no tick fires during a test
            interval: Duration::from_secs(3600),
            batch_size: 100,
            upload_lead_time: Duration::from_secs(30 * 60),
            storage_dir: workdir
                .path()
                .join("storage")
                .to_string_lossy()
                .into_owned(),
        },
        service_name: "ach-gateway-test".to_string(),
    }
}

/// A migrated database on its own temp file.
pub async fn test_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().expect("create test dir");
    let db = Database::new(&dir.path().join("test.db").to_string_lossy())
        .await
        .expect("open test db");
    db.run_migrations().await.expect("migrate test db");
    (db, dir)
}

pub fn amount(number: &str) -> Amount {
    Amount::new("USD", number).expect("test amount")
}

pub fn test_depository(routing_number: &str) -> Depository {
    let now = Utc::now();
    Depository {
        id: Uuid::new_v4().to_string(),
        bank_name: "bank name".to_string(),
        holder: "holder".to_string(),
        holder_type: HolderType::Individual,
        account_type: AccountType::Checking,
        routing_number: routing_number.to_string(),
        account_number: "151".to_string(),
        status: DepositoryStatus::Unverified,
        metadata: String::new(),
        created: now,
        updated: now,
    }
}

pub fn transfer_request(number: &str, dep_id: &str, file_id: &str) -> TransferRequest {
    TransferRequest {
        transfer_type: Some(TransferType::Push),
        amount: Some(amount(number)),
        originator: "originator".to_string(),
        originator_depository: dep_id.to_string(),
        receiver: "receiver".to_string(),
        receiver_depository: dep_id.to_string(),
        description: "money".to_string(),
        standard_entry_class_code: "PPD".to_string(),
        same_day: false,
        file_id: file_id.to_string(),
        transaction_id: String::new(),
    }
}
