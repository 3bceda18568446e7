//! Minimal NACHA file codec: enough of the record set to build, merge and
//! reconcile origination and return files. Fixed-width 94-character records,
//! one per line.

mod reader;
mod writer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AchError {
    #[error("line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A parsed ACH file: header plus batches. Batch and file control records
/// are recomputed on write rather than stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AchFile {
    pub header: FileHeader,
    pub batches: Vec<Batch>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHeader {
    pub immediate_destination: String,
    pub immediate_origin: String,
    /// YYMMDD
    pub file_creation_date: String,
    /// HHMM
    pub file_creation_time: String,
    pub file_id_modifier: String,
    pub immediate_destination_name: String,
    pub immediate_origin_name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub header: BatchHeader,
    pub entries: Vec<EntryDetail>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchHeader {
    pub service_class_code: u32,
    pub company_name: String,
    pub company_discretionary_data: String,
    pub company_identification: String,
    pub standard_entry_class_code: String,
    pub company_entry_description: String,
    pub company_descriptive_date: String,
    /// YYMMDD
    pub effective_entry_date: String,
    pub odfi_identification: String,
    pub batch_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryDetail {
    pub transaction_code: u32,
    pub rdfi_identification: String,
    pub check_digit: String,
    pub dfi_account_number: String,
    /// Whole cents.
    pub amount: i64,
    pub individual_identification: String,
    pub individual_name: String,
    pub discretionary_data: String,
    pub trace_number: String,
    pub addenda99: Option<Addenda99>,
}

impl EntryDetail {
    pub fn is_debit(&self) -> bool {
        matches!(self.transaction_code, 25..=29 | 35..=39)
    }

    pub fn is_credit(&self) -> bool {
        matches!(self.transaction_code, 20..=24 | 30..=34)
    }
}

/// Return addenda record: reports why a prior entry came back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Addenda99 {
    pub return_code: String,
    pub original_trace: String,
    pub original_rdfi: String,
    pub addenda_information: String,
    pub trace_number: String,
}

impl AchFile {
    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, AchError> {
        reader::parse(std::io::BufReader::new(bytes))
    }

    pub fn parse<R: std::io::BufRead>(r: R) -> Result<Self, AchError> {
        reader::parse(r)
    }

    pub fn write<W: std::io::Write>(&self, w: &mut W) -> Result<(), AchError> {
        writer::write(self, w)
    }

    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        // writing to a Vec cannot fail
        self.write(&mut buf).expect("render ACH file");
        String::from_utf8(buf).expect("ACH files are ASCII")
    }

    /// Non-empty line count of the serialized file. NACHA caps a single
    /// file at 10,000 lines.
    pub fn line_count(&self) -> usize {
        self.render().lines().filter(|l| !l.trim().is_empty()).count()
    }

    pub fn add_batch(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    pub fn remove_batch(&mut self, batch: &Batch) {
        if let Some(idx) = self.batches.iter().position(|b| {
            b.header == batch.header
                && b.entries.first().map(|e| &e.trace_number)
                    == batch.entries.first().map(|e| &e.trace_number)
        }) {
            self.batches.remove(idx);
        }
    }
}
