//! B3 negotiation statement importer
//!
//! The "negociação" spreadsheet lists executed equity trades, one row per
//! fill: date, side, market, settlement (unused), institution, ticker,
//! quantity, price and gross value. Import is two phase: `preview` parses
//! and annotates rows without writing, `confirm` persists the selection in
//! date order so average costs come out right.

use anyhow::Context;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDate, Utc};
use itertools::Itertools;
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::db::{self, Asset, AssetClass, EquityPosition, OperationType, Transaction};
use crate::enrichment::AssetInfoProvider;
use crate::error::Result;
use crate::importers::classify::{abbreviate_broker, classify_ticker, parse_cell_date,
    parse_cell_number, OPTION_MARKETS};
use crate::ledger;

pub const UNCLASSIFIED_SECTOR: &str = "A classificar";

/// One trade row from the statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRow {
    pub date: NaiveDate,
    pub operation: OperationType,
    pub market: String,
    pub asset_class: AssetClass,
    pub ticker: String,
    pub qty: Decimal,
    pub unit_price: Decimal,
    pub total_value: Decimal,
    pub broker: String,
    pub asset_name: String,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub asset_exists: bool,
    #[serde(default)]
    pub is_skipped: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NegotiationSummary {
    pub total: usize,
    pub new: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub new_assets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NegotiationPreview {
    pub rows: Vec<NegotiationRow>,
    pub summary: NegotiationSummary,
}

/// Result of a confirmed import batch
#[derive(Debug, Serialize)]
pub struct NegotiationOutcome {
    pub created: usize,
    pub assets_created: Vec<String>,
    pub errors: Vec<String>,
}

/// Parse the statement file into raw rows
pub fn parse_negotiation_file<P: AsRef<Path>>(path: P) -> Result<Vec<NegotiationRow>> {
    info!("Parsing negotiation file: {:?}", path.as_ref());

    let mut workbook =
        open_workbook_auto(path.as_ref()).context("Failed to open negotiation file")?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .context("Workbook has no sheets")?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read first sheet")?;

    let mut rows = Vec::new();

    // Columns: Data, Tipo, Mercado, Prazo, Instituição, Código, Quantidade,
    // Preço, Valor. Prazo only matters for term trades, which we skip.
    for row in range.rows().skip(1) {
        if row.first().map(|c| matches!(c, Data::Empty)).unwrap_or(true) {
            continue;
        }
        if row.len() < 9 {
            continue;
        }

        let date = match parse_cell_date(&row[0]) {
            Ok(date) => date,
            Err(e) => {
                debug!("Skipping row with unparsable date: {}", e);
                continue;
            }
        };

        let tipo = row[1].to_string().trim().to_lowercase();
        let market = row[2].to_string().trim().to_string();
        let broker = abbreviate_broker(row[4].to_string().trim());
        let ticker_raw = row[5].to_string().trim().to_uppercase();
        let qty = parse_cell_number(&row[6]).unwrap_or(Decimal::ZERO).trunc();
        let unit_price = parse_cell_number(&row[7]).unwrap_or(Decimal::ZERO).round_dp(2);
        let total_value = parse_cell_number(&row[8]).unwrap_or(Decimal::ZERO).round_dp(2);

        if OPTION_MARKETS.contains(&market.as_str()) {
            rows.push(NegotiationRow {
                date,
                operation: if tipo == "compra" {
                    OperationType::Compra
                } else {
                    OperationType::Venda
                },
                market: market.clone(),
                asset_class: AssetClass::BrStock,
                ticker: ticker_raw.clone(),
                qty,
                unit_price,
                total_value,
                broker,
                asset_name: ticker_raw,
                is_duplicate: false,
                asset_exists: false,
                is_skipped: true,
                skip_reason: Some(format!("Opcao: {}", market)),
            });
            continue;
        }

        let (asset_class, ticker) = classify_ticker(&ticker_raw, &market);
        let operation = if tipo == "compra" {
            OperationType::Compra
        } else {
            OperationType::Venda
        };

        rows.push(NegotiationRow {
            date,
            operation,
            market,
            asset_class,
            ticker: ticker.clone(),
            qty,
            unit_price,
            total_value,
            broker,
            asset_name: ticker,
            is_duplicate: false,
            asset_exists: false,
            is_skipped: false,
            skip_reason: None,
        });
    }

    info!("Parsed {} negotiation rows", rows.len());
    Ok(rows)
}

/// Annotate rows with duplicate and asset-existence flags, build the summary
pub fn preview(conn: &Connection, mut rows: Vec<NegotiationRow>) -> Result<NegotiationPreview> {
    let existing_keys = load_trade_keys(conn)?;
    let asset_sets = load_equity_key_sets(conn)?;

    let mut new_assets = HashSet::new();
    for row in rows.iter_mut().filter(|r| !r.is_skipped) {
        let key = (
            row.date,
            row.ticker.clone(),
            row.operation,
            row.qty.trunc(),
            row.unit_price.round_dp(2),
        );
        if existing_keys.contains(&key) {
            row.is_duplicate = true;
        }

        if asset_sets
            .get(&row.asset_class)
            .map(|set| set.contains(&row.ticker))
            .unwrap_or(false)
        {
            row.asset_exists = true;
        } else {
            new_assets.insert(row.ticker.clone());
        }
    }

    let active: Vec<&NegotiationRow> = rows.iter().filter(|r| !r.is_skipped).collect();
    let summary = NegotiationSummary {
        total: rows.len(),
        new: active.iter().filter(|r| !r.is_duplicate).count(),
        duplicates: active.iter().filter(|r| r.is_duplicate).count(),
        skipped: rows.iter().filter(|r| r.is_skipped).count(),
        new_assets: new_assets.into_iter().sorted().collect(),
    };

    Ok(NegotiationPreview { rows, summary })
}

/// Persist the selected rows: auto-create assets, insert transactions,
/// fold each into its position
///
/// Rows flagged skipped or duplicate are left out. The batch is atomic at
/// the storage level; per-row failures are collected without aborting the
/// rest.
pub fn confirm(
    conn: &mut Connection,
    rows: &[NegotiationRow],
    provider: &dyn AssetInfoProvider,
) -> Result<NegotiationOutcome> {
    let selected: Vec<&NegotiationRow> = rows
        .iter()
        .filter(|r| !r.is_skipped && !r.is_duplicate)
        .sorted_by_key(|r| r.date)
        .collect();

    let db_tx = conn.transaction()?;
    let mut asset_sets = load_equity_key_sets(&db_tx)?;

    // Enrichment only for tickers that will be created; ETF names come from
    // the statement
    let lookup_tickers: Vec<String> = selected
        .iter()
        .filter(|r| matches!(r.asset_class, AssetClass::BrStock | AssetClass::Fii))
        .filter(|r| !asset_sets[&r.asset_class].contains(&r.ticker))
        .map(|r| r.ticker.clone())
        .unique()
        .collect();
    let info_map = provider.lookup(&lookup_tickers, ".SA");

    let mut created = 0;
    let mut assets_created = HashSet::new();
    let mut errors = Vec::new();

    for row in selected {
        if let Err(e) = import_row(&db_tx, row, &info_map, &mut asset_sets, &mut assets_created) {
            warn!("Failed to import {} ({}): {}", row.ticker, row.date, e);
            errors.push(format!("{} ({}): {}", row.ticker, row.date, e));
            continue;
        }
        created += 1;
    }

    db_tx.commit()?;

    Ok(NegotiationOutcome {
        created,
        assets_created: assets_created.into_iter().sorted().collect(),
        errors,
    })
}

fn import_row(
    conn: &Connection,
    row: &NegotiationRow,
    info_map: &HashMap<String, crate::enrichment::AssetInfo>,
    asset_sets: &mut HashMap<AssetClass, HashSet<String>>,
    assets_created: &mut HashSet<String>,
) -> Result<()> {
    let known = asset_sets
        .get_mut(&row.asset_class)
        .expect("equity class sets preloaded");

    if !known.contains(&row.ticker) {
        let info = info_map.get(&row.ticker);
        let name = info.map(|i| i.name.clone()).unwrap_or_else(|| row.ticker.clone());
        let sector = if row.asset_class == AssetClass::FiEtf {
            None
        } else {
            Some(
                info.and_then(|i| i.sector.clone())
                    .unwrap_or_else(|| UNCLASSIFIED_SECTOR.to_string()),
            )
        };

        let position = EquityPosition::new(&row.ticker, &name, sector, &row.broker);
        db::insert_asset(conn, &Asset::equity(row.asset_class, position))?;
        known.insert(row.ticker.clone());
        assets_created.insert(row.ticker.clone());
    }

    let tx = Transaction {
        id: None,
        date: row.date,
        operation: row.operation,
        asset_class: row.asset_class,
        ticker: Some(row.ticker.clone()),
        asset_id: None,
        asset_name: row.asset_name.clone(),
        qty: Some(row.qty),
        unit_price: Some(row.unit_price),
        total_value: Some(row.total_value),
        broker: row.broker.clone(),
        broker_destination: None,
        fees: Decimal::ZERO,
        notes: Some(format!("Importado B3 - {}", row.market)),
        created_at: Utc::now(),
    };

    db::insert_transaction(conn, &tx)?;
    ledger::apply_to_store(conn, &tx)?;
    Ok(())
}

type TradeKey = (NaiveDate, String, OperationType, Decimal, Decimal);

fn load_trade_keys(conn: &Connection) -> Result<HashSet<TradeKey>> {
    let mut keys = HashSet::new();
    for tx in db::list_transactions(conn)? {
        keys.insert((
            tx.date,
            tx.ticker.as_deref().unwrap_or("").to_uppercase(),
            tx.operation,
            tx.qty.unwrap_or(Decimal::ZERO).trunc(),
            tx.unit_price.unwrap_or(Decimal::ZERO).round_dp(2),
        ));
    }
    Ok(keys)
}

pub(crate) fn load_equity_key_sets(
    conn: &Connection,
) -> Result<HashMap<AssetClass, HashSet<String>>> {
    let mut sets = HashMap::new();
    for class in [AssetClass::BrStock, AssetClass::Fii, AssetClass::FiEtf] {
        sets.insert(class, db::list_asset_keys(conn, class)?);
    }
    Ok(sets)
}
