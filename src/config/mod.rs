use anyhow::{anyhow, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ach: AchConfig,
    pub file_transfer: FileTransferConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AchConfig {
    pub endpoint: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct FileTransferConfig {
    /// Tick period of the periodic controller.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Transfer cursor batch size.
    pub batch_size: usize,
    /// Slack before a destination's cutoff at which open merged files flush.
    #[serde(with = "duration_secs")]
    pub upload_lead_time: Duration,
    /// Workspace root owned exclusively by the controller.
    pub storage_dir: String,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("HTTP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("HTTP_PORT")
            .unwrap_or_else(|_| "8082".to_string())
            .parse()?;

        let db_path = env::var("SQLITE_DB_PATH").unwrap_or_else(|_| "ach-gateway.db".to_string());

        let ach_endpoint =
            env::var("ACH_ENDPOINT").unwrap_or_else(|_| "http://localhost:8080".to_string());

        let interval = env::var("ACH_FILE_TRANSFER_INTERVAL")
            .ok()
            .and_then(|v| parse_duration(&v).ok())
            .unwrap_or(Duration::from_secs(10 * 60));
        let batch_size = env::var("ACH_FILE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(100);
        let upload_lead_time = env::var("ACH_FILE_UPLOAD_LEAD_TIME")
            .ok()
            .and_then(|v| parse_duration(&v).ok())
            .unwrap_or(Duration::from_secs(30 * 60));
        let storage_dir =
            env::var("ACH_FILE_STORAGE_DIR").unwrap_or_else(|_| "./storage".to_string());

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig { path: db_path },
            ach: AchConfig {
                endpoint: ach_endpoint,
            },
            file_transfer: FileTransferConfig {
                interval,
                batch_size,
                upload_lead_time,
                storage_dir,
            },
            service_name: "ach-gateway".to_string(),
        })
    }
}

/// Parses `10m`, `90s`, `1h` style durations, the forms the original
/// deployment configs use for `ACH_FILE_TRANSFER_INTERVAL`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("empty duration"));
    }
    let (value, unit) = s.split_at(s.len() - 1);
    let n: u64 = value
        .parse()
        .map_err(|e| anyhow!("invalid duration {s:?}: {e}"))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        _ => Err(anyhow!("invalid duration unit in {s:?}")),
    }
}
