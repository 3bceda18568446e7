//! On-disk workspace of in-progress merged ACH files, one open file per
//! destination routing number, and the batch merger that fills them.
//!
//! Receiving institutions pay per uploaded file, so transfers are packed
//! into as few files as possible, subject to the NACHA limit of 10,000
//! lines per file.

use crate::ach::{AchFile, Batch, FileHeader};
use crate::models::{create_trace_number, TransferId};
use crate::services::GroupableTransfer;
use anyhow::{anyhow, Context, Result};
use chrono::{Local, NaiveDate};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// NACHA's hard cap on lines per file.
pub const MAX_LINES: usize = 10_000;

/// Subdirectory of the merged workspace holding files already shipped.
pub const UPLOADED_DIR: &str = "uploaded";

/// A transfer whose batches live in a merged file, with the trace number
/// that identifies its entries. Written to the database only after the
/// file uploads.
#[derive(Debug, Clone)]
pub struct MergedTransfer {
    pub id: TransferId,
    pub user_id: String,
    pub trace_number: String,
}

/// An open merged ACH file for one destination.
#[derive(Debug)]
pub struct MergedFile {
    pub path: PathBuf,
    pub file: AchFile,
    pub destination: String,
    pub transfers: Vec<MergedTransfer>,
}

impl MergedFile {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn sequence(&self) -> u32 {
        ach_filename_seq(&self.filename())
    }

    pub fn line_count(&self) -> usize {
        self.file.line_count()
    }

    /// Flush the serialized file to disk.
    pub fn write(&self) -> Result<()> {
        let mut fd = fs::File::create(&self.path)
            .with_context(|| format!("creating {}", self.path.display()))?;
        fd.write_all(self.file.render().as_bytes())?;
        fd.sync_all()?;
        Ok(())
    }

    fn record(&mut self, xfer: &GroupableTransfer, trace_number: String) {
        if !self.transfers.iter().any(|t| t.id == xfer.id) {
            self.transfers.push(MergedTransfer {
                id: xfer.id.clone(),
                user_id: xfer.user_id.clone(),
                trace_number,
            });
        }
    }
}

/// Filename of a merged ACH file: `YYYYMMDD-RRRRRRRRR-N.ach`, where `N` is
/// the per-day sequence for the destination.
pub fn ach_filename(routing_number: &str, seq: u32) -> String {
    ach_filename_at(Local::now().date_naive(), routing_number, seq)
}

pub fn ach_filename_at(date: NaiveDate, routing_number: &str, seq: u32) -> String {
    format!("{}-{}-{}.ach", date.format("%Y%m%d"), routing_number, seq)
}

/// The sequence number of a merged filename; 0 signals a name that doesn't
/// fit the grammar.
pub fn ach_filename_seq(filename: &str) -> u32 {
    let parts: Vec<&str> = filename.split('-').collect();
    if parts.len() < 3 {
        return 0;
    }
    parts[2].trim_end_matches(".ach").parse().unwrap_or(0)
}

/// Finds the open merged file with the highest sequence for `destination`,
/// or seeds a fresh one from `incoming`. A fresh file continues the day's
/// sequence past anything already moved into `uploaded/`, keeping per-day
/// sequence numbers contiguous.
pub fn grab_latest_merged_file(
    dir: &Path,
    destination: &str,
    incoming: &AchFile,
) -> Result<MergedFile> {
    let mut matches = matching_files(dir, destination)?;

    if matches.is_empty() {
        let today = Local::now();
        let uploaded_seq = matching_files(&dir.join(UPLOADED_DIR), destination)?
            .iter()
            .filter(|name| name.starts_with(&today.format("%Y%m%d").to_string()))
            .map(|name| ach_filename_seq(name))
            .max()
            .unwrap_or(0);

        let mut file = incoming.clone();
        file.header.file_creation_date = today.format("%y%m%d").to_string();
        file.header.file_creation_time = today.format("%H%M").to_string();
        file.header.immediate_destination = destination.to_string();

        let merged = MergedFile {
            path: dir.join(ach_filename(destination, uploaded_seq + 1)),
            file,
            destination: destination.to_string(),
            transfers: Vec::new(),
        };
        merged.write()?;
        return Ok(merged);
    }

    matches.sort();
    let latest = matches.last().unwrap();
    let path = dir.join(latest);
    let contents = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let file = AchFile::parse_bytes(&contents)
        .map_err(|e| anyhow!("parsing merged file {}: {e}", path.display()))?;
    Ok(MergedFile {
        path,
        file,
        destination: destination.to_string(),
        transfers: Vec::new(),
    })
}

fn matching_files(dir: &Path, destination: &str) -> Result<Vec<String>> {
    let needle = format!("-{destination}-");
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_file() && name.contains(&needle) && name.ends_with(".ach") {
            out.push(name);
        }
    }
    Ok(out)
}

/// Merges one transfer's ACH file into the destination's open merged file.
///
/// Batches already present (same header quadruple and matching first entry)
/// are skipped, which is what makes re-running the cursor over unmarked
/// transfers idempotent. Appending a batch that would push the file past
/// [`MAX_LINES`] closes the current file instead and continues in a fresh
/// one with the next sequence number. Closed files are returned ready for
/// upload.
pub fn merge_transfer(
    file: &AchFile,
    mergable: &mut MergedFile,
    xfer: &GroupableTransfer,
) -> Result<Vec<MergedFile>> {
    let mut closed = Vec::new();

    for batch in &file.batches {
        let Some(first_entry) = batch.entries.first() else {
            continue;
        };

        if let Some(existing) = find_matching_batch(&mergable.file, batch) {
            let trace = existing
                .entries
                .first()
                .map(|e| e.trace_number.clone())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| create_trace_number(&mergable.destination));
            info!(
                batch_number = batch.header.batch_number,
                merged_file = %mergable.filename(),
                "skipping batch already present in merged file"
            );
            mergable.record(xfer, trace);
            continue;
        }

        let trace = if first_entry.trace_number.is_empty() {
            create_trace_number(&mergable.destination)
        } else {
            first_entry.trace_number.clone()
        };

        mergable.file.add_batch(batch.clone());
        if mergable.line_count() > MAX_LINES {
            // Roll over: ship the file as it was before this batch and
            // carry the batch into the next sequence.
            mergable.file.remove_batch(batch);
            mergable.write()?;

            let dir = mergable
                .path
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| anyhow!("merged file {} has no parent", mergable.path.display()))?;
            let next_seq = mergable.sequence() + 1;

            let mut next_file = AchFile {
                header: file.header.clone(),
                batches: Vec::new(),
            };
            reset_creation_stamp(&mut next_file.header, &mergable.destination);

            let next = MergedFile {
                path: dir.join(ach_filename(&mergable.destination, next_seq)),
                file: next_file,
                destination: mergable.destination.clone(),
                transfers: Vec::new(),
            };
            let full = std::mem::replace(mergable, next);
            info!(
                closed = %full.filename(),
                next = %mergable.filename(),
                "merged file reached line limit, rolling over"
            );
            closed.push(full);

            mergable.file.add_batch(batch.clone());
        }
        mergable.record(xfer, trace);
        mergable.write()?;
    }

    Ok(closed)
}

fn reset_creation_stamp(header: &mut FileHeader, destination: &str) {
    let now = Local::now();
    header.file_creation_date = now.format("%y%m%d").to_string();
    header.file_creation_time = now.format("%H%M").to_string();
    header.immediate_destination = destination.to_string();
}

/// A batch is considered already merged when the header quadruple matches
/// and the first entries agree on name, amount, discretionary data and
/// trace number.
fn find_matching_batch<'a>(merged: &'a AchFile, batch: &Batch) -> Option<&'a Batch> {
    let fhead = &batch.header;
    let fentry = batch.entries.first()?;
    merged.batches.iter().find(|existing| {
        let mhead = &existing.header;
        let Some(mentry) = existing.entries.first() else {
            return false;
        };
        fhead.standard_entry_class_code == mhead.standard_entry_class_code
            && fhead.company_name == mhead.company_name
            && fhead.company_discretionary_data == mhead.company_discretionary_data
            && fhead.batch_number == mhead.batch_number
            && fentry.individual_name == mentry.individual_name
            && fentry.amount == mentry.amount
            && fentry.discretionary_data == mentry.discretionary_data
            && fentry.trace_number == mentry.trace_number
    })
}
