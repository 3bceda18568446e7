//! Per-destination upload configuration: cutoff times, remote hosts, and
//! the inbound/outbound/return directory layout.

use crate::error::AppError;
use crate::services::Database;
use chrono::{DateTime, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use sqlx::{Row, SqlitePool};
use std::time::Duration;

/// The latest wall-clock moment of a banking day by which files destined to
/// a routing number must be uploaded to be processed that day.
#[derive(Debug, Clone)]
pub struct CutoffTime {
    pub routing_number: String,
    /// 24-hour HHMM value, e.g. 1700.
    pub cutoff: u32,
    pub location: Tz,
}

impl CutoffTime {
    /// Whether `now` is within `lead` of today's cutoff in the destination's
    /// timezone. Due destinations get their open merged files flushed.
    pub fn is_due(&self, now: DateTime<Utc>, lead: Duration) -> bool {
        let lead = chrono::Duration::from_std(lead).unwrap_or_else(|_| chrono::Duration::zero());
        let local_date = now.with_timezone(&self.location).date_naive();
        let Some(naive) = local_date.and_hms_opt(self.cutoff / 100, self.cutoff % 100, 0) else {
            return false;
        };
        match self.location.from_local_datetime(&naive) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => {
                now + lead >= t.with_timezone(&Utc)
            }
            // The cutoff fell inside a DST gap; treat the destination as due.
            LocalResult::None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Sftp,
    Ftp,
}

#[derive(Debug, Clone)]
pub struct RemoteHostConfig {
    pub routing_number: String,
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub protocol: Protocol,
}

#[derive(Debug, Clone)]
pub struct PathConfig {
    pub routing_number: String,
    pub inbound_path: String,
    pub outbound_path: String,
    pub return_path: String,
}

#[derive(Clone)]
pub struct FileTransferRepository {
    pool: SqlitePool,
}

impl FileTransferRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }

    pub async fn get_cutoff_times(&self) -> Result<Vec<CutoffTime>, AppError> {
        let rows = sqlx::query("SELECT routing_number, cutoff, location FROM cutoff_times")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let location: String = row.try_get("location")?;
                let location: Tz = location.parse().map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("bad cutoff timezone {location:?}: {e}"))
                })?;
                Ok(CutoffTime {
                    routing_number: row.try_get("routing_number")?,
                    cutoff: row.try_get::<i64, _>("cutoff")? as u32,
                    location,
                })
            })
            .collect()
    }

    pub async fn get_remote_host_configs(&self) -> Result<Vec<RemoteHostConfig>, AppError> {
        let rows = sqlx::query(
            "SELECT routing_number, hostname, username, password, protocol FROM remote_host_configs",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let protocol: String = row.try_get("protocol")?;
                let protocol = match protocol.to_lowercase().as_str() {
                    "sftp" => Protocol::Sftp,
                    "ftp" => Protocol::Ftp,
                    other => {
                        return Err(AppError::ConfigError(anyhow::anyhow!(
                            "unknown remote host protocol {other:?}"
                        )))
                    }
                };
                Ok(RemoteHostConfig {
                    routing_number: row.try_get("routing_number")?,
                    hostname: row.try_get("hostname")?,
                    username: row.try_get("username")?,
                    password: row.try_get("password")?,
                    protocol,
                })
            })
            .collect()
    }

    pub async fn get_path_configs(&self) -> Result<Vec<PathConfig>, AppError> {
        let rows = sqlx::query(
            "SELECT routing_number, inbound_path, outbound_path, return_path FROM path_configs",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(PathConfig {
                    routing_number: row.try_get("routing_number")?,
                    inbound_path: row.try_get("inbound_path")?,
                    outbound_path: row.try_get("outbound_path")?,
                    return_path: row.try_get("return_path")?,
                })
            })
            .collect()
    }
}

/// Masks all but the first and last character of a password for logs.
pub fn mask_password(password: &str) -> String {
    if password.len() < 3 {
        return "**".to_string();
    }
    let first = &password[0..1];
    let last = &password[password.len() - 1..];
    format!("{first}{}{last}", "*".repeat(password.len() - 2))
}
