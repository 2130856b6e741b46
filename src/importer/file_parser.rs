// ==========================================
// Molecular data portal - input reader
// ==========================================
// Formats: tar archive (optionally gzip-compressed) of per-sheet delimited
//          files, or a workbook (xlsx / xls / xlsb / ods)
// Detection: gzip magic → tar magic → workbook → UnrecognizedInput
// The whole input is materialised in memory before parsing.
// ==========================================

use crate::domain::mapping::DataMapping;
use crate::domain::table::{DataTable, ImportBatch, Value};
use crate::importer::error::{ImportError, ImportResult};
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const TAR_MAGIC_OFFSET: usize = 257;
const TAR_MAGIC: &[u8] = b"ustar";

// ==========================================
// SheetSource - one parsed container
// ==========================================
pub trait SheetSource {
    /// Human-readable format name for logs
    fn format(&self) -> &'static str;

    /// Parses one sheet, or `Ok(None)` when the container lacks it.
    fn read_sheet(&mut self, sheet: &str) -> ImportResult<Option<DataTable>>;
}

// ==========================================
// CsvParser - one delimited member
// ==========================================
pub struct CsvParser {
    delimiter: u8,
}

impl CsvParser {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    pub fn for_file_name(name: &str) -> Self {
        let is_tsv = name.to_ascii_lowercase().ends_with(".tsv");
        Self::new(if is_tsv { b'\t' } else { b',' })
    }

    /// Parses delimited bytes. Cells stay text until type coercion; empty
    /// cells become `Null`.
    pub fn parse(&self, sheet: &str, content: &[u8]) -> ImportResult<DataTable> {
        let csv_error = |e: csv::Error| ImportError::CsvParse {
            sheet: sheet.to_string(),
            message: e.to_string(),
        };

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(content);

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut table = DataTable::new(sheet, headers);
        for result in reader.records() {
            let record = result.map_err(csv_error)?;
            let row = record
                .iter()
                .map(|cell| {
                    let cell = cell.trim();
                    if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(cell.to_string())
                    }
                })
                .collect();
            table.push_row(row);
        }
        Ok(table)
    }
}

// ==========================================
// ArchiveParser - tar of per-sheet files
// ==========================================
pub struct ArchiveParser {
    /// file stem → (member name, content)
    members: HashMap<String, (String, Vec<u8>)>,
}

impl ArchiveParser {
    pub fn from_bytes(bytes: &[u8]) -> ImportResult<Self> {
        let mut archive = tar::Archive::new(bytes);
        let entries = archive
            .entries()
            .map_err(|e| ImportError::ArchiveRead(e.to_string()))?;

        let mut members = HashMap::new();
        for entry in entries {
            let mut entry = entry.map_err(|e| ImportError::ArchiveRead(e.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = entry
                .path()
                .map_err(|e| ImportError::ArchiveRead(e.to_string()))?
                .to_string_lossy()
                .to_string();
            let Some(stem) = member_stem(&name) else {
                continue;
            };

            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| ImportError::ArchiveRead(format!("{}: {}", name, e)))?;

            if members.contains_key(&stem) {
                warn!(member = %name, sheet = %stem, "duplicate archive member ignored");
                continue;
            }
            members.insert(stem, (name, content));
        }

        debug!(members = members.len(), "archive indexed");
        Ok(Self { members })
    }
}

/// Sheet name of an archive member: file name up to the first '.'.
/// Hidden files yield `None`.
fn member_stem(name: &str) -> Option<String> {
    let file_name = Path::new(name).file_name()?.to_str()?;
    if file_name.starts_with('.') {
        return None;
    }
    let stem = file_name.split('.').next().unwrap_or(file_name);
    Some(stem.to_string())
}

impl SheetSource for ArchiveParser {
    fn format(&self) -> &'static str {
        "tar"
    }

    fn read_sheet(&mut self, sheet: &str) -> ImportResult<Option<DataTable>> {
        match self.members.get(sheet) {
            None => Ok(None),
            Some((name, content)) => CsvParser::for_file_name(name).parse(sheet, content).map(Some),
        }
    }
}

// ==========================================
// ExcelParser - workbook sheets
// ==========================================
pub struct ExcelParser {
    workbook: calamine::Sheets<Cursor<Vec<u8>>>,
}

impl ExcelParser {
    pub fn from_bytes(bytes: Vec<u8>) -> ImportResult<Self> {
        let workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| ImportError::UnrecognizedInput(e.to_string()))?;
        Ok(Self { workbook })
    }
}

/// Workbook cell → value, keeping the native cell type.
fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                Value::Null
            } else {
                Value::Text(s.to_string())
            }
        }
        Data::Int(i) => Value::Integer(*i),
        Data::Float(f) => Value::Real(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_datetime() {
            Some(dt) => Value::DateTime(dt),
            None => Value::Text(cell.to_string()),
        },
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(e) => Value::Text(format!("{:?}", e)),
    }
}

impl SheetSource for ExcelParser {
    fn format(&self) -> &'static str {
        "workbook"
    }

    fn read_sheet(&mut self, sheet: &str) -> ImportResult<Option<DataTable>> {
        if !self.workbook.sheet_names().iter().any(|s| s == sheet) {
            return Ok(None);
        }

        let range = self
            .workbook
            .worksheet_range(sheet)
            .map_err(|e| ImportError::ExcelParse(format!("{}: {}", sheet, e)))?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| cell_to_value(cell).to_string().trim().to_string())
                .collect(),
            None => Vec::new(),
        };

        let mut table = DataTable::new(sheet, headers);
        for data_row in rows {
            table.push_row(data_row.iter().map(cell_to_value).collect());
        }
        Ok(Some(table))
    }
}

// ==========================================
// InputReader - format detection + sheet loading
// ==========================================
pub struct InputReader;

impl InputReader {
    /// Opens the container behind `bytes`.
    pub fn open(bytes: Vec<u8>) -> ImportResult<Box<dyn SheetSource>> {
        let bytes = if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoded = Vec::new();
            GzDecoder::new(bytes.as_slice())
                .read_to_end(&mut decoded)
                .map_err(|e| ImportError::UnrecognizedInput(format!("gzip: {}", e)))?;
            decoded
        } else {
            bytes
        };

        if is_tar(&bytes) {
            return Ok(Box::new(ArchiveParser::from_bytes(&bytes)?));
        }
        Ok(Box::new(ExcelParser::from_bytes(bytes)?))
    }

    /// Reads every non-derived sheet declared by the mapping.
    ///
    /// Missing required sheets fail with `MissingSheet`; optional ones are
    /// skipped. Unnamed columns and all-empty rows are dropped, after which a
    /// required sheet without rows fails with `EmptySheet`.
    pub fn read(bytes: Vec<u8>, mapping: &DataMapping) -> ImportResult<ImportBatch> {
        let mut source = Self::open(bytes)?;
        info!(format = source.format(), "input recognized");

        let mut batch = ImportBatch::new();
        for descriptor in mapping.tables().iter().filter(|t| t.is_read_from_input()) {
            let sheet = descriptor.alias.as_str();
            let mut table = match source.read_sheet(sheet)? {
                Some(table) => table,
                None if descriptor.optional => {
                    warn!(sheet, "optional sheet absent, skipped");
                    continue;
                }
                None => return Err(ImportError::MissingSheet(sheet.to_string())),
            };

            let dropped_columns = table.drop_unnamed_columns();
            let dropped_rows = table.drop_empty_rows();
            debug!(
                sheet,
                rows = table.len(),
                dropped_rows,
                dropped_columns = dropped_columns.len(),
                "sheet read"
            );

            if table.is_empty() && !descriptor.optional {
                return Err(ImportError::EmptySheet(sheet.to_string()));
            }
            batch.insert(table);
        }

        info!(sheets = batch.len(), "{} file read", source.format());
        Ok(batch)
    }
}

fn is_tar(bytes: &[u8]) -> bool {
    bytes.len() >= TAR_MAGIC_OFFSET + TAR_MAGIC.len()
        && &bytes[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()] == TAR_MAGIC
}
