//! Backup spreadsheet importer
//!
//! Restores a full transaction history from the export format: thirteen
//! positional columns mirroring the transaction record. Confirming replays
//! every row through the ledger in date order, auto-creating any asset the
//! history references, so the final positions are derived purely from the
//! transaction log.

use anyhow::Context;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, Utc};
use itertools::Itertools;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    self, Asset, AssetClass, CashAccountPosition, EquityPosition, FixedIncomePosition,
    OperationType, RealAssetPosition, Transaction,
};
use crate::enrichment::AssetInfoProvider;
use crate::error::Result;
use crate::importers::classify::{parse_cell_date, parse_cell_number};
use crate::importers::negotiation::UNCLASSIFIED_SECTOR;
use crate::ledger;

/// Export column order
pub const BACKUP_COLUMNS: &[&str] = &[
    "date",
    "operation_type",
    "asset_class",
    "ticker",
    "asset_id",
    "asset_name",
    "qty",
    "unit_price",
    "total_value",
    "broker",
    "broker_destination",
    "fees",
    "notes",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRow {
    pub date: NaiveDate,
    pub operation: OperationType,
    pub asset_class: AssetClass,
    pub ticker: Option<String>,
    pub asset_id: Option<String>,
    pub asset_name: String,
    pub qty: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub total_value: Option<Decimal>,
    pub broker: String,
    pub broker_destination: Option<String>,
    pub fees: Decimal,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub total: usize,
    pub new: usize,
    pub duplicates: usize,
}

#[derive(Debug, Serialize)]
pub struct BackupPreview {
    pub rows: Vec<BackupRow>,
    pub summary: BackupSummary,
}

#[derive(Debug, Serialize)]
pub struct BackupOutcome {
    pub created: usize,
    pub assets_created: Vec<String>,
    pub errors: Vec<String>,
}

/// Parse the backup file into rows; malformed rows are skipped with a warning
pub fn parse_backup_file<P: AsRef<Path>>(path: P) -> Result<Vec<BackupRow>> {
    info!("Parsing backup file: {:?}", path.as_ref());

    let mut workbook = open_workbook_auto(path.as_ref()).context("Failed to open backup file")?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .context("Workbook has no sheets")?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read backup sheet")?;

    let mut rows = Vec::new();

    for (idx, row) in range.rows().enumerate().skip(1) {
        if row.first().map(|c| matches!(c, Data::Empty)).unwrap_or(true) {
            continue;
        }

        match parse_row(row) {
            Ok(Some(parsed)) => rows.push(parsed),
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping backup row {}: {}", idx + 1, e);
            }
        }
    }

    info!("Parsed {} backup rows", rows.len());
    Ok(rows)
}

fn parse_row(row: &[Data]) -> Result<Option<BackupRow>> {
    let cell = |i: usize| row.get(i).cloned().unwrap_or(Data::Empty);
    let text = |i: usize| -> Option<String> {
        let s = cell(i).to_string().trim().to_string();
        (!s.is_empty()).then_some(s)
    };

    // date, operation and asset class are mandatory
    let date = parse_cell_date(&cell(0))?;
    let operation = match text(1) {
        Some(s) => s
            .parse::<OperationType>()
            .map_err(|_| anyhow::anyhow!("unknown operation '{}'", s))?,
        None => return Ok(None),
    };
    let asset_class = match text(2) {
        Some(s) => s
            .parse::<AssetClass>()
            .map_err(|_| anyhow::anyhow!("unknown asset class '{}'", s))?,
        None => return Ok(None),
    };

    let ticker = text(3).map(|t| t.to_uppercase());
    let asset_id = text(4);
    let asset_name = text(5)
        .or_else(|| ticker.clone())
        .or_else(|| asset_id.clone())
        .unwrap_or_default();

    Ok(Some(BackupRow {
        date,
        operation,
        asset_class,
        ticker,
        asset_id,
        asset_name,
        qty: parse_cell_number(&cell(6)),
        unit_price: parse_cell_number(&cell(7)),
        total_value: parse_cell_number(&cell(8)),
        broker: text(9).unwrap_or_default(),
        broker_destination: text(10),
        fees: parse_cell_number(&cell(11)).unwrap_or(Decimal::ZERO),
        notes: text(12),
        is_duplicate: false,
    }))
}

/// Flag rows already present in the transaction log
pub fn preview(conn: &Connection, mut rows: Vec<BackupRow>) -> Result<BackupPreview> {
    let existing = load_backup_keys(conn)?;

    let mut duplicates = 0;
    for row in rows.iter_mut() {
        let key = backup_key(
            row.date,
            row.ticker.as_deref().or(row.asset_id.as_deref()),
            row.operation,
            row.qty,
            row.unit_price,
        );
        if existing.contains(&key) {
            row.is_duplicate = true;
            duplicates += 1;
        }
    }

    let summary = BackupSummary {
        total: rows.len(),
        new: rows.len() - duplicates,
        duplicates,
    };
    Ok(BackupPreview { rows, summary })
}

/// Replay the selected rows in date order, creating missing assets
pub fn confirm(
    conn: &mut Connection,
    rows: &[BackupRow],
    provider: &dyn AssetInfoProvider,
) -> Result<BackupOutcome> {
    let selected: Vec<&BackupRow> = rows
        .iter()
        .filter(|r| !r.is_duplicate)
        .sorted_by_key(|r| r.date)
        .collect();

    let db_tx = conn.transaction()?;

    let mut existing: HashMap<AssetClass, HashSet<String>> = HashMap::new();
    for class in [
        AssetClass::BrStock,
        AssetClass::Fii,
        AssetClass::IntlStock,
        AssetClass::FiEtf,
        AssetClass::FixedIncome,
        AssetClass::CashAccount,
        AssetClass::RealAsset,
    ] {
        existing.insert(class, db::list_asset_keys(&db_tx, class)?);
    }

    // B3 tickers get the .SA suffix on lookup; international ones do not
    let mut br_tickers = Vec::new();
    let mut intl_tickers = Vec::new();
    for row in &selected {
        let Some(ticker) = &row.ticker else { continue };
        if existing[&row.asset_class].contains(ticker) {
            continue;
        }
        match row.asset_class {
            AssetClass::BrStock | AssetClass::Fii | AssetClass::FiEtf => {
                br_tickers.push(ticker.clone())
            }
            AssetClass::IntlStock => intl_tickers.push(ticker.clone()),
            _ => {}
        }
    }
    let mut info_map = provider.lookup(&br_tickers.into_iter().unique().collect::<Vec<_>>(), ".SA");
    info_map.extend(provider.lookup(&intl_tickers.into_iter().unique().collect::<Vec<_>>(), ""));

    let mut created = 0;
    let mut assets_created = HashSet::new();
    let mut errors = Vec::new();
    // Generated ids for rows whose asset_id was blank, keyed by asset name
    // so later rows for the same asset resolve to the same record
    let mut id_remap: HashMap<(AssetClass, String), String> = HashMap::new();

    for row in selected {
        match import_row(&db_tx, row, &info_map, &mut existing, &mut id_remap, &mut assets_created) {
            Ok(()) => created += 1,
            Err(e) => {
                let identity = row.ticker.clone().unwrap_or_else(|| row.asset_name.clone());
                warn!("Failed to import {} ({}): {}", identity, row.date, e);
                errors.push(format!("{} ({}): {}", identity, row.date, e));
            }
        }
    }

    db_tx.commit()?;

    Ok(BackupOutcome {
        created,
        assets_created: assets_created.into_iter().sorted().collect(),
        errors,
    })
}

fn import_row(
    conn: &Connection,
    row: &BackupRow,
    info_map: &HashMap<String, crate::enrichment::AssetInfo>,
    existing: &mut HashMap<AssetClass, HashSet<String>>,
    id_remap: &mut HashMap<(AssetClass, String), String>,
    assets_created: &mut HashSet<String>,
) -> Result<()> {
    ledger::validate_operation(row.asset_class, row.operation)?;
    if row.asset_class.is_ticker_keyed() && row.ticker.is_none() {
        return Err(anyhow::anyhow!("{} row without ticker", row.asset_class));
    }

    let mut asset_id = row.asset_id.clone();
    if !row.asset_class.is_ticker_keyed() && asset_id.is_none() {
        let remap_key = (row.asset_class, row.asset_name.clone());
        asset_id = id_remap.get(&remap_key).cloned();
    }

    let key = if row.asset_class.is_ticker_keyed() {
        row.ticker.clone()
    } else {
        asset_id.clone()
    };

    let known = existing.get_mut(&row.asset_class).expect("all classes preloaded");
    let needs_create = match &key {
        Some(k) => !known.contains(k),
        None => !row.asset_class.is_ticker_keyed(),
    };

    let key = if needs_create {
        let (asset, new_key) = make_asset(row, info_map, asset_id.clone())?;
        db::insert_asset(conn, &asset)?;
        known.insert(new_key.clone());

        if row.asset_class.is_ticker_keyed() {
            assets_created.insert(new_key.clone());
        } else {
            assets_created.insert(if row.asset_name.is_empty() {
                new_key.clone()
            } else {
                row.asset_name.clone()
            });
            if asset_id.is_none() {
                id_remap.insert((row.asset_class, row.asset_name.clone()), new_key.clone());
            }
            asset_id = Some(new_key.clone());
        }
        new_key
    } else {
        key.expect("existing asset has a key")
    };
    debug!("Replaying {} {} for {}", row.operation, row.asset_class, key);

    let tx = Transaction {
        id: None,
        date: row.date,
        operation: row.operation,
        asset_class: row.asset_class,
        ticker: row.ticker.clone(),
        asset_id,
        asset_name: row.asset_name.clone(),
        qty: row.qty,
        unit_price: row.unit_price,
        total_value: row.total_value,
        broker: row.broker.clone(),
        broker_destination: row.broker_destination.clone(),
        fees: row.fees,
        notes: row.notes.clone(),
        created_at: Utc::now(),
    };
    db::insert_transaction(conn, &tx)?;
    ledger::apply_to_store(conn, &tx)?;
    Ok(())
}

/// Minimal asset record derived from transaction data
fn make_asset(
    row: &BackupRow,
    info_map: &HashMap<String, crate::enrichment::AssetInfo>,
    asset_id: Option<String>,
) -> Result<(Asset, String)> {
    if row.asset_class.is_ticker_keyed() {
        let ticker = row
            .ticker
            .clone()
            .ok_or_else(|| anyhow::anyhow!("{} row without ticker", row.asset_class))?;
        let info = info_map.get(&ticker);
        let name = info
            .map(|i| i.name.clone())
            .or_else(|| (!row.asset_name.is_empty()).then(|| row.asset_name.clone()))
            .unwrap_or_else(|| ticker.clone());
        let sector = if row.asset_class == AssetClass::FiEtf {
            None
        } else {
            Some(
                info.and_then(|i| i.sector.clone())
                    .unwrap_or_else(|| UNCLASSIFIED_SECTOR.to_string()),
            )
        };
        let position = EquityPosition::new(&ticker, &name, sector, &row.broker);
        return Ok((Asset::equity(row.asset_class, position), ticker));
    }

    let id = asset_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let name = if row.asset_name.is_empty() {
        "Importado".to_string()
    } else {
        row.asset_name.clone()
    };

    let asset = match row.asset_class {
        AssetClass::FixedIncome => Asset::FixedIncome(FixedIncomePosition {
            id: id.clone(),
            title: name,
            kind: "CDB".to_string(),
            rate_label: "CDI 100%".to_string(),
            applied_value: Decimal::ZERO,
            current_value: Decimal::ZERO,
            application_date: row.date,
            maturity_date: row.date + Duration::days(365),
            broker: row.broker.clone(),
            indexer: "CDI".to_string(),
            contracted_rate: Decimal::ZERO,
            tax_exempt: false,
        }),
        AssetClass::CashAccount => Asset::CashAccount(CashAccountPosition {
            id: id.clone(),
            name,
            kind: "conta_corrente".to_string(),
            institution: row.broker.clone(),
            balance: Decimal::ZERO,
        }),
        AssetClass::RealAsset => Asset::RealAsset(RealAssetPosition {
            id: id.clone(),
            description: name,
            kind: "Imovel".to_string(),
            estimated_value: Decimal::ZERO,
            acquisition_date: Some(row.date),
            include_in_total: true,
        }),
        _ => unreachable!("ticker-keyed classes handled above"),
    };
    Ok((asset, id))
}

type BackupKey = (NaiveDate, String, OperationType, Decimal, Decimal);

fn backup_key(
    date: NaiveDate,
    identity: Option<&str>,
    operation: OperationType,
    qty: Option<Decimal>,
    unit_price: Option<Decimal>,
) -> BackupKey {
    (
        date,
        identity.unwrap_or("").to_string(),
        operation,
        qty.unwrap_or(Decimal::ZERO).round_dp(4),
        unit_price.unwrap_or(Decimal::ZERO).round_dp(2),
    )
}

fn load_backup_keys(conn: &Connection) -> Result<HashSet<BackupKey>> {
    let mut keys = HashSet::new();
    for tx in db::list_transactions(conn)? {
        keys.insert(backup_key(
            tx.date,
            tx.ticker.as_deref().or(tx.asset_id.as_deref()),
            tx.operation,
            tx.qty,
            tx.unit_price,
        ));
    }
    Ok(keys)
}
