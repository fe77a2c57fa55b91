use crate::error::{ApiError, Result};
use std::path::Path;
use tokio::io::AsyncReadExt;

/// Only the head of the file is read for the local preview.
pub const PREVIEW_BYTES: u64 = 20_000;
/// Header line plus six data rows.
pub const PREVIEW_LINES: usize = 7;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvPreview {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub email_column: Option<String>,
}

pub fn parse_preview(text: &str) -> Result<CsvPreview> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ApiError::validation(format!("Could not read CSV header: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();
    if columns.iter().all(|c| c.is_empty()) {
        return Err(ApiError::validation("CSV has no header row"));
    }

    // The byte cap can cut the last record short, so stop at the first bad one
    let rows = reader
        .records()
        .map_while(|r| r.ok())
        .filter(|r| r.iter().any(|field| !field.is_empty()))
        .take(PREVIEW_LINES - 1)
        .map(|r| r.iter().map(str::to_string).collect())
        .collect();

    let email_column = detect_email_column(&columns);
    Ok(CsvPreview {
        columns,
        rows,
        email_column,
    })
}

/// First column whose name mentions "email".
pub fn detect_email_column(columns: &[String]) -> Option<String> {
    columns
        .iter()
        .find(|c| c.to_lowercase().contains("email"))
        .cloned()
}

pub async fn read_preview(path: &Path) -> Result<CsvPreview> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::new();
    file.take(PREVIEW_BYTES).read_to_end(&mut head).await?;
    parse_preview(&String::from_utf8_lossy(&head))
}
