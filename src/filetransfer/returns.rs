//! Inbound and return file processing: parse downloaded files, reconcile
//! return entries against their originating transfers, and apply the NACHA
//! return-code rules to depository state.

use crate::ach::AchFile;
use crate::error::AppError;
use crate::models::{Amount, Depository, DepositoryStatus, TransferStatus};
use crate::services::metrics::RETURNS_PROCESSED;
use crate::services::{DepositoryRepository, TransferRepository};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Emits an audit record per inbound file. Inbound files carry no business
/// mutation here; origination responses flow through the return path.
pub fn process_inbound_files(dir: &Path) -> Result<()> {
    for path in ach_files_in(dir)? {
        let file = match parse_ach_path(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "problem parsing inbound file");
                continue;
            }
        };
        info!(
            file = %path.display(),
            origin = %file.header.immediate_origin,
            origin_name = %file.header.immediate_origin_name,
            "processing inbound file"
        );
    }
    Ok(())
}

/// Walks a directory of downloaded return files, matching each returned
/// entry back to its transfer and mutating transfer and depository state.
/// A file that fails to parse is logged and skipped; it never aborts the
/// rest of the batch.
pub async fn process_return_files(
    dir: &Path,
    transfer_repo: &TransferRepository,
    dep_repo: &DepositoryRepository,
) -> Result<()> {
    for path in ach_files_in(dir)? {
        let file = match parse_ach_path(&path) {
            Ok(file) => file,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "problem parsing return file");
                continue;
            }
        };
        info!(
            file = %path.display(),
            origin = %file.header.immediate_origin,
            "processing return file"
        );
        if let Err(err) = process_return_entries(&file, transfer_repo, dep_repo).await {
            warn!(path = %path.display(), error = %err, "problem processing return entries");
        }
    }
    Ok(())
}

async fn process_return_entries(
    file: &AchFile,
    transfer_repo: &TransferRepository,
    dep_repo: &DepositoryRepository,
) -> Result<(), AppError> {
    for batch in &file.batches {
        let sec = &batch.header.standard_entry_class_code;
        let effective_entry_date = parse_effective_entry_date(&batch.header.effective_entry_date);

        for entry in &batch.entries {
            let Some(addenda) = &entry.addenda99 else {
                continue;
            };
            let amount = Amount::from_cents("USD", entry.amount);
            let trace = if addenda.original_trace.is_empty() {
                &entry.trace_number
            } else {
                &addenda.original_trace
            };

            let Some((transfer, user_id)) = transfer_repo
                .lookup_transfer_from_return(sec, &amount, trace, effective_entry_date)
                .await?
            else {
                warn!(
                    trace_number = %trace,
                    return_code = %addenda.return_code,
                    "no transfer found for returned entry"
                );
                continue;
            };

            transfer_repo
                .set_return_code(&transfer.id, &addenda.return_code)
                .await?;
            RETURNS_PROCESSED
                .with_label_values(&[addenda.return_code.as_str()])
                .inc();
            info!(
                transfer_id = %transfer.id,
                return_code = %addenda.return_code,
                "matched return entry to transfer"
            );

            if reclaims_transfer(&addenda.return_code) {
                transfer_repo
                    .update_transfer_status(&transfer.id, TransferStatus::Reclaimed)
                    .await?;
            }

            let orig_dep = dep_repo
                .get_user_depository(&transfer.originator_depository, &user_id)
                .await?;
            let recv_dep = dep_repo
                .get_user_depository(&transfer.receiver_depository, &user_id)
                .await?;
            match (orig_dep, recv_dep) {
                (Some(orig), Some(recv)) => {
                    update_transfer_from_return_code(
                        &addenda.return_code,
                        &orig,
                        &recv,
                        &user_id,
                        dep_repo,
                    )
                    .await?;
                }
                _ => warn!(
                    transfer_id = %transfer.id,
                    "missing depository for returned transfer"
                ),
            }
        }
    }
    Ok(())
}

/// Applies the return-code table to depository state. Rejected is terminal.
///
/// | code | affected depository |
/// |---|---|
/// | R02, R07, R10, R16, R20 | receiver |
/// | R14, R15 | originator |
pub async fn update_transfer_from_return_code(
    code: &str,
    orig_dep: &Depository,
    receiver_dep: &Depository,
    user_id: &str,
    dep_repo: &DepositoryRepository,
) -> Result<(), AppError> {
    match code {
        // account closed, unauthorized, customer advises not authorized,
        // account frozen, not a transaction account
        "R02" | "R07" | "R10" | "R16" | "R20" => {
            info!(depository_id = %receiver_dep.id, return_code = %code, "rejecting receiver depository");
            dep_repo
                .update_depository_status(&receiver_dep.id, user_id, DepositoryStatus::Rejected)
                .await
        }
        // representative payee deceased, beneficiary or account holder deceased
        "R14" | "R15" => {
            info!(depository_id = %orig_dep.id, return_code = %code, "rejecting originator depository");
            dep_repo
                .update_depository_status(&orig_dep.id, user_id, DepositoryStatus::Rejected)
                .await
        }
        _ => Ok(()),
    }
}

/// Credit-reversing return codes move the transfer to Reclaimed.
fn reclaims_transfer(code: &str) -> bool {
    matches!(code, "R06" | "R23")
}

fn parse_effective_entry_date(raw: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(raw, "%y%m%d")
        .ok()
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_else(Utc::now)
}

fn parse_ach_path(path: &Path) -> Result<AchFile> {
    let contents = fs::read(path)?;
    Ok(AchFile::parse_bytes(&contents)?)
}

fn ach_files_in(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}
