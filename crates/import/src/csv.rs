use std::io::Read;
use std::path::Path;

use dropzone_core::{normalize_header, AccountConfig, HeaderError, Table};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Header(#[from] HeaderError),
    #[error("File has no rows")]
    Empty,
}

/// Read every record as raw text. No row is treated as a header here and
/// rows may differ in width. Invalid UTF-8 is replaced rather than rejected.
pub fn read_raw<R: Read>(data: R) -> Result<Vec<Vec<String>>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut rows = Vec::new();
    for result in reader.byte_records() {
        let record = result?;
        rows.push(
            record
                .iter()
                .map(|field| String::from_utf8_lossy(field).into_owned())
                .collect(),
        );
    }

    if rows.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(rows)
}

/// Load a whole file and resolve its column names for the account.
pub async fn read_table(path: &Path, config: &AccountConfig) -> Result<Table, ParseError> {
    let bytes = tokio::fs::read(path).await?;
    let raw = read_raw(bytes.as_slice())?;
    Ok(normalize_header(raw, config)?)
}
