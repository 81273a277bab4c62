//! Statement importers
//!
//! Three spreadsheet formats are supported: the B3 negotiation statement
//! (equity trades), the B3 movement statement (income, fixed income and
//! corporate events) and the backup export (full transaction history).
//! `detect_format` inspects sheet names and the header row so the CLI can
//! route a file without being told what it is.

pub mod backup;
pub mod classify;
pub mod movement;
pub mod negotiation;

use anyhow::Context;
use calamine::{open_workbook_auto, Reader};
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::error::Result;
use crate::importers::classify::strip_accents;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Negotiation,
    Movement,
    Backup,
}

impl fmt::Display for ImportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportFormat::Negotiation => "negociacao",
            ImportFormat::Movement => "movimentacao",
            ImportFormat::Backup => "backup",
        };
        f.write_str(name)
    }
}

/// Identify which statement format a file carries
pub fn detect_format<P: AsRef<Path>>(path: P) -> Result<ImportFormat> {
    let mut workbook =
        open_workbook_auto(path.as_ref()).context("Failed to open file for format detection")?;

    if workbook
        .sheet_names()
        .iter()
        .any(|name| name.to_lowercase().contains("movimenta"))
    {
        debug!("Detected movement format from sheet name");
        return Ok(ImportFormat::Movement);
    }

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .context("Workbook has no sheets")?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read first sheet")?;

    let header: Vec<String> = range
        .rows()
        .next()
        .map(|row| {
            row.iter()
                .map(|c| strip_accents(&c.to_string().trim().to_lowercase()))
                .collect()
        })
        .unwrap_or_default();

    let first = header.first().map(String::as_str).unwrap_or("");

    // Movement files start with the Entrada/Saída direction column
    if first.contains("entrada") {
        return Ok(ImportFormat::Movement);
    }

    // Backup exports use the raw column names
    if first == "date"
        && header.get(1).map(String::as_str) == Some("operation_type")
        && header.get(2).map(String::as_str) == Some("asset_class")
    {
        return Ok(ImportFormat::Backup);
    }

    Ok(ImportFormat::Negotiation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_display() {
        assert_eq!(ImportFormat::Negotiation.to_string(), "negociacao");
        assert_eq!(ImportFormat::Movement.to_string(), "movimentacao");
        assert_eq!(ImportFormat::Backup.to_string(), "backup");
    }
}
