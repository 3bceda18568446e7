use super::{AchError, AchFile, Batch};
use std::io::Write;

pub fn write<W: Write>(file: &AchFile, w: &mut W) -> Result<(), AchError> {
    let mut lines: Vec<String> = Vec::new();

    let h = &file.header;
    // priority code 01, record size 094, blocking factor 10, format code 1
    lines.push(format!(
        "101{}{}{}{}{}094101{}{}{}",
        alpha_right(&h.immediate_destination, 10),
        alpha_right(&h.immediate_origin, 10),
        alpha(&h.file_creation_date, 6),
        alpha(&h.file_creation_time, 4),
        alpha(if h.file_id_modifier.is_empty() { "A" } else { &h.file_id_modifier }, 1),
        alpha(&h.immediate_destination_name, 23),
        alpha(&h.immediate_origin_name, 23),
        alpha("", 8),
    ));

    let mut file_entry_count: u64 = 0;
    let mut file_hash: u64 = 0;
    let mut file_debit: i64 = 0;
    let mut file_credit: i64 = 0;

    for batch in &file.batches {
        write_batch(batch, &mut lines);
        let (count, hash, debit, credit) = batch_totals(batch);
        file_entry_count += count;
        file_hash = (file_hash + hash) % 10_000_000_000;
        file_debit += debit;
        file_credit += credit;
    }

    // +1 for the file control record itself
    let block_count = (lines.len() as u64 + 1).div_ceil(10);
    lines.push(format!(
        "9{:06}{:06}{:08}{:010}{:012}{:012}{}",
        file.batches.len(),
        block_count,
        file_entry_count,
        file_hash,
        file_debit,
        file_credit,
        alpha("", 39),
    ));

    for line in &lines {
        writeln!(w, "{line}")?;
    }
    Ok(())
}

fn write_batch(batch: &Batch, lines: &mut Vec<String>) {
    let h = &batch.header;
    lines.push(format!(
        "5{:03}{}{}{}{}{}{}{}{}1{}{:07}",
        h.service_class_code,
        alpha(&h.company_name, 16),
        alpha(&h.company_discretionary_data, 20),
        alpha(&h.company_identification, 10),
        alpha(&h.standard_entry_class_code, 3),
        alpha(&h.company_entry_description, 10),
        alpha(&h.company_descriptive_date, 6),
        alpha(&h.effective_entry_date, 6),
        alpha("", 3),
        alpha(&h.odfi_identification, 8),
        h.batch_number,
    ));

    for entry in &batch.entries {
        lines.push(format!(
            "6{:02}{}{}{}{:010}{}{}{}{}{}",
            entry.transaction_code,
            alpha(&entry.rdfi_identification, 8),
            alpha(&entry.check_digit, 1),
            alpha(&entry.dfi_account_number, 17),
            entry.amount,
            alpha(&entry.individual_identification, 15),
            alpha(&entry.individual_name, 22),
            alpha(&entry.discretionary_data, 2),
            if entry.addenda99.is_some() { "1" } else { "0" },
            alpha(&entry.trace_number, 15),
        ));
        if let Some(add) = &entry.addenda99 {
            lines.push(format!(
                "799{}{}{}{}{}{}",
                alpha(&add.return_code, 3),
                alpha(&add.original_trace, 15),
                alpha("", 6),
                alpha(&add.original_rdfi, 8),
                alpha(&add.addenda_information, 44),
                alpha(&add.trace_number, 15),
            ));
        }
    }

    let (count, hash, debit, credit) = batch_totals(batch);
    lines.push(format!(
        "8{:03}{:06}{:010}{:012}{:012}{}{}{}{}{:07}",
        h.service_class_code,
        count,
        hash,
        debit,
        credit,
        alpha(&h.company_identification, 10),
        alpha("", 19),
        alpha("", 6),
        alpha(&h.odfi_identification, 8),
        h.batch_number,
    ));
}

/// (entry+addenda count, entry hash, total debit cents, total credit cents)
fn batch_totals(batch: &Batch) -> (u64, u64, i64, i64) {
    let mut count = 0;
    let mut hash: u64 = 0;
    let mut debit = 0;
    let mut credit = 0;
    for entry in &batch.entries {
        count += 1;
        if entry.addenda99.is_some() {
            count += 1;
        }
        hash = (hash + entry.rdfi_identification.parse::<u64>().unwrap_or(0)) % 10_000_000_000;
        if entry.is_debit() {
            debit += entry.amount;
        } else if entry.is_credit() {
            credit += entry.amount;
        }
    }
    (count, hash, debit, credit)
}

/// Left-justified, space-padded, truncated to `width`.
fn alpha(s: &str, width: usize) -> String {
    let mut out: String = s.chars().take(width).collect();
    while out.len() < width {
        out.push(' ');
    }
    out
}

/// Right-justified, space-padded, truncated to `width`.
fn alpha_right(s: &str, width: usize) -> String {
    let trimmed: String = s.chars().take(width).collect();
    format!("{trimmed:>width$}")
}
