//! Shared helpers for the integration tests: temporary databases and
//! spreadsheet fixtures built with rust_xlsxwriter.

use anyhow::Result;
use rusqlite::Connection;
use rust_xlsxwriter::Workbook;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use carteira::db::{init_database, open_db};

pub const NEGOTIATION_HEADERS: [&str; 9] = [
    "Data do Negócio",
    "Tipo de Movimentação",
    "Mercado",
    "Prazo/Vencimento",
    "Instituição",
    "Código de Negociação",
    "Quantidade",
    "Preço",
    "Valor",
];

pub const MOVEMENT_HEADERS: [&str; 8] = [
    "Entrada/Saída",
    "Data",
    "Movimentação",
    "Produto",
    "Instituição",
    "Quantidade",
    "Preço unitário",
    "Valor da Operação",
];

pub fn create_test_db() -> Result<(TempDir, Connection)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    init_database(Some(db_path.clone()))?;
    let conn = open_db(Some(db_path))?;
    Ok((temp_dir, conn))
}

/// One trade row: (date, tipo, mercado, instituição, código, qty, price, total)
pub type TradeRow<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str, f64, f64, f64);

pub fn write_negotiation_file(dir: &Path, name: &str, rows: &[TradeRow]) -> Result<PathBuf> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Negociação")?;

    for (col, header) in NEGOTIATION_HEADERS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (i, (date, tipo, mercado, broker, ticker, qty, price, total)) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        worksheet.write_string(r, 0, *date)?;
        worksheet.write_string(r, 1, *tipo)?;
        worksheet.write_string(r, 2, *mercado)?;
        worksheet.write_string(r, 3, "-")?;
        worksheet.write_string(r, 4, *broker)?;
        worksheet.write_string(r, 5, *ticker)?;
        worksheet.write_number(r, 6, *qty)?;
        worksheet.write_number(r, 7, *price)?;
        worksheet.write_number(r, 8, *total)?;
    }

    let path = dir.join(name);
    workbook.save(&path)?;
    Ok(path)
}

/// One movement row: (direction, date, movimentação, produto, instituição,
/// qty, unit price, total). Numeric cells accept "-" in real statements, so
/// values go in as strings here too.
pub type MovementFixtureRow<'a> = (
    &'a str,
    &'a str,
    &'a str,
    &'a str,
    &'a str,
    &'a str,
    &'a str,
    &'a str,
);

pub fn write_movement_file(
    dir: &Path,
    name: &str,
    rows: &[MovementFixtureRow],
) -> Result<PathBuf> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Movimentação")?;

    for (col, header) in MOVEMENT_HEADERS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        let cells = [row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7];
        for (col, value) in cells.iter().enumerate() {
            worksheet.write_string(r, col as u16, *value)?;
        }
    }

    let path = dir.join(name);
    workbook.save(&path)?;
    Ok(path)
}

/// One backup row as thirteen string cells, empty string for NULL
pub type BackupFixtureRow<'a> = [&'a str; 13];

pub fn write_backup_file(dir: &Path, name: &str, rows: &[BackupFixtureRow]) -> Result<PathBuf> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Backup")?;

    for (col, header) in carteira::importers::backup::BACKUP_COLUMNS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        for (col, value) in row.iter().enumerate() {
            if !value.is_empty() {
                worksheet.write_string(r, col as u16, *value)?;
            }
        }
    }

    let path = dir.join(name);
    workbook.save(&path)?;
    Ok(path)
}
