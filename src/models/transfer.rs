use super::{aba8, Amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub type TransferId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: TransferId,
    #[serde(rename = "transferType")]
    pub transfer_type: TransferType,
    pub amount: Amount,
    pub originator: String,
    #[serde(rename = "originatorDepository")]
    pub originator_depository: String,
    pub receiver: String,
    #[serde(rename = "receiverDepository")]
    pub receiver_depository: String,
    pub description: String,
    #[serde(rename = "standardEntryClassCode")]
    pub standard_entry_class_code: String,
    pub status: TransferStatus,
    #[serde(rename = "sameDay")]
    pub same_day: bool,
    pub created: DateTime<Utc>,
}

impl Transfer {
    /// Sanity checks applied before a transfer row is written.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.amount.is_zero() {
            return Err(anyhow::anyhow!("invalid amount"));
        }
        if self.description.is_empty() {
            return Err(anyhow::anyhow!("transfer is missing a description"));
        }
        Ok(())
    }
}

/// Payload of `POST /transfers`. The ACH file id is attached by the server
/// once the entry file exists on the ACH service, never from client JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "transferType")]
    pub transfer_type: Option<TransferType>,
    pub amount: Option<Amount>,
    #[serde(default)]
    pub originator: String,
    #[serde(rename = "originatorDepository", default)]
    pub originator_depository: String,
    #[serde(default)]
    pub receiver: String,
    #[serde(rename = "receiverDepository", default)]
    pub receiver_depository: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "standardEntryClassCode", default)]
    pub standard_entry_class_code: String,
    #[serde(rename = "sameDay", default)]
    pub same_day: bool,
    #[serde(skip)]
    pub file_id: String,
    #[serde(skip)]
    pub transaction_id: String,
}

impl TransferRequest {
    pub fn missing_fields(&self) -> bool {
        self.transfer_type.is_none()
            || self.amount.is_none()
            || self.originator.is_empty()
            || self.originator_depository.is_empty()
            || self.receiver.is_empty()
            || self.receiver_depository.is_empty()
            || self.standard_entry_class_code.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransferType {
    Push,
    Pull,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Push => "Push",
            TransferType::Pull => "Pull",
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TransferType {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "push" => Ok(TransferType::Push),
            "pull" => Ok(TransferType::Pull),
            other => Err(anyhow::anyhow!("unknown TransferType {other:?}")),
        }
    }
}

impl From<TransferType> for String {
    fn from(t: TransferType) -> String {
        t.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TransferStatus {
    Canceled,
    Failed,
    Pending,
    Processed,
    Reclaimed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Canceled => "canceled",
            TransferStatus::Failed => "failed",
            TransferStatus::Pending => "pending",
            TransferStatus::Processed => "processed",
            TransferStatus::Reclaimed => "reclaimed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TransferStatus {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "canceled" => Ok(TransferStatus::Canceled),
            "failed" => Ok(TransferStatus::Failed),
            "pending" => Ok(TransferStatus::Pending),
            "processed" => Ok(TransferStatus::Processed),
            "reclaimed" => Ok(TransferStatus::Reclaimed),
            other => Err(anyhow::anyhow!("unknown TransferStatus {other:?}")),
        }
    }
}

impl From<TransferStatus> for String {
    fn from(s: TransferStatus) -> String {
        s.as_str().to_string()
    }
}

static TRACE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Builds a 15-digit trace number: the first 8 digits of the routing number
/// followed by a zero-padded process-wide sequence.
pub fn create_trace_number(routing_number: &str) -> String {
    let seq = TRACE_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000_000;
    format!("{}{:07}", aba8(routing_number), seq)
}
