use super::{Addenda99, AchError, AchFile, Batch, BatchHeader, EntryDetail, FileHeader};
use std::io::BufRead;

const RECORD_WIDTH: usize = 94;

struct Line {
    number: usize,
    text: String,
}

impl Line {
    fn err(&self, msg: impl Into<String>) -> AchError {
        AchError::Parse {
            line: self.number,
            msg: msg.into(),
        }
    }

    /// 1-indexed inclusive character range, trimmed.
    fn field(&self, from: usize, to: usize) -> String {
        self.text[from - 1..to].trim().to_string()
    }

    fn numeric(&self, from: usize, to: usize) -> Result<u32, AchError> {
        let raw = self.field(from, to);
        raw.parse()
            .map_err(|_| self.err(format!("expected numeric field at {from}..{to}, got {raw:?}")))
    }

    fn numeric64(&self, from: usize, to: usize) -> Result<i64, AchError> {
        let raw = self.field(from, to);
        raw.parse()
            .map_err(|_| self.err(format!("expected numeric field at {from}..{to}, got {raw:?}")))
    }
}

pub fn parse<R: BufRead>(r: R) -> Result<AchFile, AchError> {
    let mut header: Option<FileHeader> = None;
    let mut batches: Vec<Batch> = Vec::new();
    let mut open_batch: Option<Batch> = None;

    for (idx, raw) in r.lines().enumerate() {
        let raw = raw?;
        let trimmed_end = raw.trim_end_matches(['\r', '\n']);
        if trimmed_end.trim().is_empty() {
            continue;
        }
        let mut text = trimmed_end.to_string();
        if !text.is_ascii() {
            return Err(AchError::Parse {
                line: idx + 1,
                msg: "record contains non-ASCII characters".into(),
            });
        }
        if text.len() > RECORD_WIDTH {
            return Err(AchError::Parse {
                line: idx + 1,
                msg: format!("record is {} characters, expected {RECORD_WIDTH}", text.len()),
            });
        }
        while text.len() < RECORD_WIDTH {
            text.push(' ');
        }
        let line = Line {
            number: idx + 1,
            text,
        };

        match &line.text[0..1] {
            "1" => header = Some(parse_file_header(&line)?),
            "5" => {
                if let Some(batch) = open_batch.take() {
                    batches.push(batch);
                }
                open_batch = Some(Batch {
                    header: parse_batch_header(&line)?,
                    entries: Vec::new(),
                });
            }
            "6" => {
                let batch = open_batch
                    .as_mut()
                    .ok_or_else(|| line.err("entry detail outside of a batch"))?;
                batch.entries.push(parse_entry_detail(&line)?);
            }
            "7" => {
                let entry = open_batch
                    .as_mut()
                    .and_then(|b| b.entries.last_mut())
                    .ok_or_else(|| line.err("addenda without a preceding entry"))?;
                entry.addenda99 = Some(parse_addenda99(&line)?);
            }
            "8" => {
                if let Some(batch) = open_batch.take() {
                    batches.push(batch);
                }
            }
            "9" => {
                // File control, or an all-nines padding line. Either way the
                // file body is complete.
                break;
            }
            other => return Err(line.err(format!("unknown record type {other:?}"))),
        }
    }

    if let Some(batch) = open_batch.take() {
        batches.push(batch);
    }

    let header = header.ok_or(AchError::Parse {
        line: 1,
        msg: "missing file header record".into(),
    })?;

    Ok(AchFile { header, batches })
}

fn parse_file_header(line: &Line) -> Result<FileHeader, AchError> {
    Ok(FileHeader {
        immediate_destination: line.field(4, 13),
        immediate_origin: line.field(14, 23),
        file_creation_date: line.field(24, 29),
        file_creation_time: line.field(30, 33),
        file_id_modifier: line.field(34, 34),
        immediate_destination_name: line.field(41, 63),
        immediate_origin_name: line.field(64, 86),
    })
}

fn parse_batch_header(line: &Line) -> Result<BatchHeader, AchError> {
    Ok(BatchHeader {
        service_class_code: line.numeric(2, 4)?,
        company_name: line.field(5, 20),
        company_discretionary_data: line.field(21, 40),
        company_identification: line.field(41, 50),
        standard_entry_class_code: line.field(51, 53),
        company_entry_description: line.field(54, 63),
        company_descriptive_date: line.field(64, 69),
        effective_entry_date: line.field(70, 75),
        odfi_identification: line.field(80, 87),
        batch_number: line.numeric(88, 94)?,
    })
}

fn parse_entry_detail(line: &Line) -> Result<EntryDetail, AchError> {
    Ok(EntryDetail {
        transaction_code: line.numeric(2, 3)?,
        rdfi_identification: line.field(4, 11),
        check_digit: line.field(12, 12),
        dfi_account_number: line.field(13, 29),
        amount: line.numeric64(30, 39)?,
        individual_identification: line.field(40, 54),
        individual_name: line.field(55, 76),
        discretionary_data: line.field(77, 78),
        trace_number: line.field(80, 94),
        addenda99: None,
    })
}

fn parse_addenda99(line: &Line) -> Result<Addenda99, AchError> {
    let type_code = line.field(2, 3);
    if type_code != "99" {
        return Err(line.err(format!("unsupported addenda type {type_code:?}")));
    }
    Ok(Addenda99 {
        return_code: line.field(4, 6),
        original_trace: line.field(7, 21),
        original_rdfi: line.field(28, 35),
        addenda_information: line.field(36, 79),
        trace_number: line.field(80, 94),
    })
}
