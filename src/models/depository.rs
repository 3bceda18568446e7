use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type DepositoryId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Depository {
    pub id: DepositoryId,
    #[serde(rename = "bankName")]
    pub bank_name: String,
    pub holder: String,
    #[serde(rename = "holderType")]
    pub holder_type: HolderType,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    #[serde(rename = "routingNumber")]
    pub routing_number: String,
    #[serde(rename = "accountNumber")]
    pub account_number: String,
    pub status: DepositoryStatus,
    #[serde(default)]
    pub metadata: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HolderType {
    Individual,
    Business,
}

impl HolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderType::Individual => "Individual",
            HolderType::Business => "Business",
        }
    }
}

impl TryFrom<String> for HolderType {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "individual" => Ok(HolderType::Individual),
            "business" => Ok(HolderType::Business),
            other => Err(anyhow::anyhow!("unknown HolderType {other:?}")),
        }
    }
}

impl From<HolderType> for String {
    fn from(t: HolderType) -> String {
        t.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AccountType {
    Checking,
    Savings,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "Checking",
            AccountType::Savings => "Savings",
        }
    }
}

impl TryFrom<String> for AccountType {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "checking" => Ok(AccountType::Checking),
            "savings" => Ok(AccountType::Savings),
            other => Err(anyhow::anyhow!("unknown AccountType {other:?}")),
        }
    }
}

impl From<AccountType> for String {
    fn from(t: AccountType) -> String {
        t.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DepositoryStatus {
    Unverified,
    Verified,
    Rejected,
}

impl DepositoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositoryStatus::Unverified => "Unverified",
            DepositoryStatus::Verified => "Verified",
            DepositoryStatus::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for DepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DepositoryStatus {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "unverified" => Ok(DepositoryStatus::Unverified),
            "verified" => Ok(DepositoryStatus::Verified),
            "rejected" => Ok(DepositoryStatus::Rejected),
            other => Err(anyhow::anyhow!("unknown DepositoryStatus {other:?}")),
        }
    }
}

impl From<DepositoryStatus> for String {
    fn from(s: DepositoryStatus) -> String {
        s.as_str().to_string()
    }
}

/// First 8 digits of an ABA routing number. ACH servers sometimes hand back
/// a 10-digit form; the leading digit is discarded.
pub fn aba8(routing_number: &str) -> String {
    let digits = if routing_number.len() == 10 {
        &routing_number[1..]
    } else {
        routing_number
    };
    digits.chars().take(8).collect()
}

/// The Mod-10 check digit, the ninth digit of the routing number.
pub fn aba_check_digit(routing_number: &str) -> String {
    let digits = if routing_number.len() == 10 {
        &routing_number[1..]
    } else {
        routing_number
    };
    digits.chars().skip(8).take(1).collect()
}
