//! B3 movement statement importer
//!
//! The "movimentação" spreadsheet mixes everything that crossed the account:
//! income payments, fixed-income applications and redemptions, corporate
//! events, lending, subscription rights. Each row is categorized and either
//! routed to a concrete import action or skipped with a reason. Equity
//! trades are deliberately ignored here because the negotiation statement is
//! the authoritative source for those.

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

use crate::db::{
    self, Asset, AssetClass, EquityPosition, FixedIncomePosition, IncomeKind, IncomeRecord,
    OperationType, Transaction,
};
use crate::enrichment::AssetInfoProvider;
use crate::error::Result;
use crate::importers::classify::{
    abbreviate_broker, categorize, extract_product_info, parse_cell_date, parse_cell_number,
    should_skip, truncate, Category, ImportKind,
};
use crate::importers::negotiation::{load_equity_key_sets, UNCLASSIFIED_SECTOR};
use crate::ledger;

/// Placeholder maturity for bonds whose terms are unknown at import time
const PLACEHOLDER_MATURITY_DAYS: i64 = 365 * 3;

/// One categorized movement row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementRow {
    pub date: NaiveDate,
    pub direction: String,
    pub movement_type: String,
    pub product: String,
    pub institution: String,
    pub qty: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub total_value: Option<Decimal>,
    pub category: Category,
    pub import_as: ImportKind,
    pub ticker: Option<String>,
    pub asset_name: String,
    pub asset_class: Option<AssetClass>,
    pub rf_type: Option<String>,
    pub rf_code: Option<String>,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub is_skipped: bool,
    #[serde(default)]
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovementSummary {
    pub total: usize,
    pub proventos: usize,
    pub renda_fixa: usize,
    pub eventos: usize,
    pub ignorados: usize,
    pub duplicates: usize,
    pub new_assets: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MovementPreview {
    pub rows: Vec<MovementRow>,
    pub summary: MovementSummary,
}

#[derive(Debug, Serialize)]
pub struct MovementOutcome {
    pub incomes_created: usize,
    pub transactions_created: usize,
    pub assets_created: Vec<String>,
    pub errors: Vec<String>,
}

/// Parse the movement statement into categorized rows
pub fn parse_movement_file<P: AsRef<Path>>(path: P) -> Result<Vec<MovementRow>> {
    info!("Parsing movement file: {:?}", path.as_ref());

    let mut workbook =
        open_workbook_auto(path.as_ref()).context("Failed to open movement file")?;

    // Prefer the Movimentação sheet when the workbook has several
    let sheet_name = workbook
        .sheet_names()
        .iter()
        .find(|name| name.to_lowercase().contains("movimenta"))
        .cloned()
        .or_else(|| workbook.sheet_names().first().cloned())
        .context("Workbook has no sheets")?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read movement sheet")?;

    let mut rows = Vec::new();

    // Columns: Entrada/Saída, Data, Movimentação, Produto, Instituição,
    // Quantidade, Preço unitário, Valor da Operação
    for row in range.rows().skip(1) {
        if row.first().map(|c| matches!(c, Data::Empty)).unwrap_or(true) {
            continue;
        }
        if row.len() < 8 {
            continue;
        }

        let direction = row[0].to_string().trim().to_string();
        let date = match parse_cell_date(&row[1]) {
            Ok(date) => date,
            Err(e) => {
                debug!("Skipping movement row with unparsable date: {}", e);
                continue;
            }
        };
        let movement_type = row[2].to_string().trim().to_string();
        let product = row[3].to_string().trim().to_string();
        let institution = abbreviate_broker(row[4].to_string().trim());
        let qty = parse_cell_number(&row[5]);
        let unit_price = parse_cell_number(&row[6]);
        let total_value = parse_cell_number(&row[7]);

        if let Some(reason) = should_skip(&movement_type, &product) {
            rows.push(MovementRow {
                date,
                direction,
                movement_type,
                product: product.clone(),
                institution,
                qty,
                unit_price,
                total_value,
                category: Category::Ignorado,
                import_as: ImportKind::Ignorado,
                ticker: None,
                asset_name: product,
                asset_class: None,
                rf_type: None,
                rf_code: None,
                is_duplicate: false,
                is_skipped: true,
                skip_reason: Some(reason),
            });
            continue;
        }

        let (category, import_as) = categorize(&direction, &movement_type);
        let mut info = extract_product_info(&product);

        // Fixed-income operations on unrecognized products are still bonds
        if category == Category::RendaFixa && info.rf_type.is_none() {
            info.asset_class = Some(AssetClass::FixedIncome);
        }

        let is_skipped = category == Category::Ignorado;
        rows.push(MovementRow {
            date,
            direction,
            movement_type,
            product,
            institution,
            qty,
            unit_price,
            total_value,
            category,
            import_as,
            ticker: info.ticker,
            asset_name: info.asset_name,
            asset_class: info.asset_class,
            rf_type: info.rf_type,
            rf_code: info.rf_code,
            is_duplicate: false,
            is_skipped,
            skip_reason: is_skipped.then(|| "Tipo nao suportado".to_string()),
        });
    }

    info!("Parsed {} movement rows", rows.len());
    Ok(rows)
}

/// Flag duplicates against stored incomes and transactions, build summary
pub fn preview(conn: &Connection, mut rows: Vec<MovementRow>) -> Result<MovementPreview> {
    let income_keys = load_income_keys(conn)?;
    let tx_keys = load_tx_keys(conn)?;
    let equity_sets = load_equity_key_sets(conn)?;
    let fi_ids = db::list_asset_keys(conn, AssetClass::FixedIncome)?;

    let mut new_assets = HashSet::new();
    for row in rows.iter_mut().filter(|r| !r.is_skipped) {
        match row.import_as {
            ImportKind::Dividendo
            | ImportKind::Jcp
            | ImportKind::Rendimento
            | ImportKind::JurosRf
            | ImportKind::AmortizacaoRf => {
                let ticker = row
                    .ticker
                    .clone()
                    .or_else(|| row.rf_code.clone())
                    .unwrap_or_default()
                    .to_uppercase();
                let kind = income_kind(row.import_as).expect("income import kinds map");
                let key = (
                    row.date,
                    ticker,
                    kind,
                    row.total_value.unwrap_or(Decimal::ZERO).round_dp(2),
                );
                if income_keys.contains(&key) {
                    row.is_duplicate = true;
                }
            }
            ImportKind::CompraRf | ImportKind::VencimentoRf | ImportKind::ResgateRf => {
                let operation = if row.import_as == ImportKind::CompraRf {
                    OperationType::Aporte
                } else {
                    OperationType::Resgate
                };
                let key = (
                    row.date,
                    row.rf_code.clone().unwrap_or_default().to_uppercase(),
                    operation,
                    row.qty.unwrap_or(Decimal::ZERO).round_dp(2),
                    row.total_value.unwrap_or(Decimal::ZERO).round_dp(2),
                );
                if tx_keys.contains(&key) {
                    row.is_duplicate = true;
                }
            }
            ImportKind::Bonificacao | ImportKind::Desdobramento | ImportKind::Venda => {
                let operation = match row.import_as {
                    ImportKind::Bonificacao => OperationType::Bonificacao,
                    ImportKind::Desdobramento => OperationType::Desdobramento,
                    _ => OperationType::Venda,
                };
                let key = (
                    row.date,
                    row.ticker.clone().unwrap_or_default().to_uppercase(),
                    operation,
                    row.qty.unwrap_or(Decimal::ZERO).round_dp(2),
                    row.total_value
                        .or(row.unit_price)
                        .unwrap_or(Decimal::ZERO)
                        .round_dp(2),
                );
                if tx_keys.contains(&key) {
                    row.is_duplicate = true;
                }
            }
            ImportKind::Ignorado => {}
        }

        // New-asset detection
        if let (Some(ticker), Some(class)) = (&row.ticker, row.asset_class) {
            if class.is_ticker_keyed()
                && !equity_sets
                    .get(&class)
                    .map(|set| set.contains(ticker))
                    .unwrap_or(true)
            {
                new_assets.insert(ticker.clone());
            }
        } else if let Some(rf_code) = &row.rf_code {
            if row.asset_class == Some(AssetClass::FixedIncome) && !fi_ids.contains(rf_code) {
                new_assets.insert(format!(
                    "{}: {}",
                    row.rf_type.as_deref().unwrap_or("RF"),
                    rf_code
                ));
            }
        }
    }

    let active: Vec<&MovementRow> = rows.iter().filter(|r| !r.is_skipped).collect();
    let summary = MovementSummary {
        total: rows.len(),
        proventos: active.iter().filter(|r| r.category == Category::Provento).count(),
        renda_fixa: active.iter().filter(|r| r.category == Category::RendaFixa).count(),
        eventos: active.iter().filter(|r| r.category == Category::Evento).count(),
        ignorados: rows.iter().filter(|r| r.is_skipped).count(),
        duplicates: active.iter().filter(|r| r.is_duplicate).count(),
        new_assets: new_assets.into_iter().sorted().collect(),
    };

    Ok(MovementPreview { rows, summary })
}

/// Materialize the selected rows as incomes and transactions
pub fn confirm(
    conn: &mut Connection,
    rows: &[MovementRow],
    provider: &dyn AssetInfoProvider,
) -> Result<MovementOutcome> {
    let selected: Vec<&MovementRow> = rows
        .iter()
        .filter(|r| !r.is_skipped && !r.is_duplicate)
        .sorted_by_key(|r| r.date)
        .collect();

    let db_tx = conn.transaction()?;
    let mut equity_sets = load_equity_key_sets(&db_tx)?;
    let mut fi_ids = db::list_asset_keys(&db_tx, AssetClass::FixedIncome)?;

    let lookup_tickers: Vec<String> = selected
        .iter()
        .filter_map(|r| r.ticker.clone().zip(r.asset_class))
        .filter(|(ticker, class)| {
            matches!(class, AssetClass::BrStock | AssetClass::Fii)
                && !equity_sets[class].contains(ticker)
        })
        .map(|(ticker, _)| ticker)
        .unique()
        .collect();
    let info_map = provider.lookup(&lookup_tickers, ".SA");

    let mut state = ConfirmState {
        incomes_created: 0,
        transactions_created: 0,
        assets_created: HashSet::new(),
        info_map,
    };
    let mut errors = Vec::new();

    for row in selected {
        if let Err(e) = import_row(&db_tx, row, &mut equity_sets, &mut fi_ids, &mut state) {
            warn!("Failed to import '{}' ({}): {}", row.product, row.date, e);
            errors.push(format!("{} ({}): {}", row.product, row.date, e));
        }
    }

    db_tx.commit()?;

    Ok(MovementOutcome {
        incomes_created: state.incomes_created,
        transactions_created: state.transactions_created,
        assets_created: state.assets_created.into_iter().sorted().collect(),
        errors,
    })
}

struct ConfirmState {
    incomes_created: usize,
    transactions_created: usize,
    assets_created: HashSet<String>,
    info_map: HashMap<String, crate::enrichment::AssetInfo>,
}

fn import_row(
    conn: &Connection,
    row: &MovementRow,
    equity_sets: &mut HashMap<AssetClass, HashSet<String>>,
    fi_ids: &mut HashSet<String>,
    state: &mut ConfirmState,
) -> Result<()> {
    match row.import_as {
        ImportKind::Dividendo | ImportKind::Jcp | ImportKind::Rendimento => {
            let ticker = row
                .ticker
                .clone()
                .or_else(|| row.rf_code.clone())
                .unwrap_or_else(|| row.asset_name.clone());
            insert_income(conn, row, &ticker, income_kind(row.import_as).expect("provento kind"))?;
            state.incomes_created += 1;
        }

        ImportKind::JurosRf | ImportKind::AmortizacaoRf => {
            let ticker = row.rf_code.clone().unwrap_or_else(|| row.asset_name.clone());
            insert_income(conn, row, &ticker, income_kind(row.import_as).expect("rf income kind"))?;
            state.incomes_created += 1;
        }

        ImportKind::CompraRf => {
            if let Some(rf_code) = &row.rf_code {
                ensure_fixed_income(conn, row, rf_code, fi_ids, &mut state.assets_created)?;
            }
            let tx = fixed_income_tx(row, OperationType::Aporte, &row.movement_type);
            db::insert_transaction(conn, &tx)?;
            ledger::apply_to_store(conn, &tx)?;
            state.transactions_created += 1;
        }

        ImportKind::VencimentoRf | ImportKind::ResgateRf => {
            redeem_fixed_income(conn, row, row.import_as == ImportKind::VencimentoRf, &row.movement_type)?;
            state.transactions_created += 1;
        }

        ImportKind::Bonificacao | ImportKind::Desdobramento => {
            let (ticker, class) = match (&row.ticker, row.asset_class) {
                (Some(t), Some(c)) if c.is_ticker_keyed() => (t.clone(), c),
                _ => return Ok(()),
            };
            ensure_equity(conn, row, &ticker, class, equity_sets, state)?;

            let operation = if row.import_as == ImportKind::Bonificacao {
                OperationType::Bonificacao
            } else {
                OperationType::Desdobramento
            };
            let tx = Transaction {
                id: None,
                date: row.date,
                operation,
                asset_class: class,
                ticker: Some(ticker.clone()),
                asset_id: None,
                asset_name: truncate(if row.asset_name.is_empty() { &ticker } else { &row.asset_name }, 200),
                qty: Some(row.qty.unwrap_or(Decimal::ZERO)),
                unit_price: row.unit_price,
                total_value: row.total_value,
                broker: truncate(&row.institution, 30),
                broker_destination: None,
                fees: Decimal::ZERO,
                notes: Some(format!("Importado B3 Mov - {}", row.movement_type)),
                created_at: Utc::now(),
            };
            db::insert_transaction(conn, &tx)?;
            ledger::apply_to_store(conn, &tx)?;
            state.transactions_created += 1;
        }

        ImportKind::Venda => {
            if row.rf_code.is_some() && row.asset_class == Some(AssetClass::FixedIncome) {
                // Tesouro sold before maturity behaves like a redemption
                redeem_fixed_income(conn, row, false, "Venda")?;
                state.transactions_created += 1;
            } else if let (Some(ticker), Some(class)) = (&row.ticker, row.asset_class) {
                if !class.is_ticker_keyed() {
                    return Ok(());
                }
                let ticker = ticker.clone();
                ensure_equity(conn, row, &ticker, class, equity_sets, state)?;

                let tx = Transaction {
                    id: None,
                    date: row.date,
                    operation: OperationType::Venda,
                    asset_class: class,
                    ticker: Some(ticker.clone()),
                    asset_id: None,
                    asset_name: truncate(if row.asset_name.is_empty() { &ticker } else { &row.asset_name }, 200),
                    qty: Some(row.qty.unwrap_or(Decimal::ZERO)),
                    unit_price: Some(row.unit_price.unwrap_or(Decimal::ZERO)),
                    total_value: Some(row.total_value.unwrap_or(Decimal::ZERO)),
                    broker: truncate(&row.institution, 30),
                    broker_destination: None,
                    fees: Decimal::ZERO,
                    notes: Some("Importado B3 Mov - Venda".to_string()),
                    created_at: Utc::now(),
                };
                db::insert_transaction(conn, &tx)?;
                ledger::apply_to_store(conn, &tx)?;
                state.transactions_created += 1;
            }
        }

        ImportKind::Ignorado => {}
    }

    Ok(())
}

fn insert_income(conn: &Connection, row: &MovementRow, ticker: &str, kind: IncomeKind) -> Result<()> {
    let income = IncomeRecord {
        id: None,
        date: row.date,
        ticker: truncate(ticker, 10),
        kind,
        value: row.total_value.unwrap_or(Decimal::ZERO),
    };
    db::insert_income(conn, &income)?;
    Ok(())
}

fn income_kind(kind: ImportKind) -> Option<IncomeKind> {
    match kind {
        ImportKind::Dividendo => Some(IncomeKind::Dividendo),
        ImportKind::Jcp => Some(IncomeKind::Jcp),
        ImportKind::Rendimento => Some(IncomeKind::Rendimento),
        ImportKind::JurosRf => Some(IncomeKind::Juros),
        ImportKind::AmortizacaoRf => Some(IncomeKind::Amortizacao),
        _ => None,
    }
}

/// Create the bond with placeholder terms if it is not registered yet
fn ensure_fixed_income(
    conn: &Connection,
    row: &MovementRow,
    rf_code: &str,
    fi_ids: &mut HashSet<String>,
    assets_created: &mut HashSet<String>,
) -> Result<()> {
    let id = truncate(rf_code, 36);
    if fi_ids.contains(&id) {
        return Ok(());
    }

    let asset = Asset::FixedIncome(FixedIncomePosition {
        id: id.clone(),
        title: truncate(&row.product, 120),
        kind: row.rf_type.clone().unwrap_or_else(|| "Outro".to_string()),
        rate_label: "A definir".to_string(),
        applied_value: Decimal::ZERO,
        current_value: Decimal::ZERO,
        application_date: row.date,
        maturity_date: row.date + Duration::days(PLACEHOLDER_MATURITY_DAYS),
        broker: truncate(&row.institution, 30),
        indexer: "CDI".to_string(),
        contracted_rate: Decimal::ZERO,
        tax_exempt: false,
    });
    db::insert_asset(conn, &asset)?;
    fi_ids.insert(id.clone());
    assets_created.insert(format!("{}: {}", row.rf_type.as_deref().unwrap_or("RF"), id));
    Ok(())
}

fn ensure_equity(
    conn: &Connection,
    row: &MovementRow,
    ticker: &str,
    class: AssetClass,
    equity_sets: &mut HashMap<AssetClass, HashSet<String>>,
    state: &mut ConfirmState,
) -> Result<()> {
    let known = equity_sets.entry(class).or_default();
    if known.contains(ticker) {
        return Ok(());
    }

    let info = state.info_map.get(ticker);
    let name = info
        .map(|i| i.name.clone())
        .or_else(|| (!row.asset_name.is_empty()).then(|| row.asset_name.clone()))
        .unwrap_or_else(|| ticker.to_string());
    let sector = if class == AssetClass::FiEtf {
        None
    } else {
        Some(
            info.and_then(|i| i.sector.clone())
                .unwrap_or_else(|| UNCLASSIFIED_SECTOR.to_string()),
        )
    };

    let position = EquityPosition::new(ticker, &name, sector, &truncate(&row.institution, 30));
    db::insert_asset(conn, &Asset::equity(class, position))?;
    known.insert(ticker.to_string());
    state.assets_created.insert(ticker.to_string());
    Ok(())
}

fn fixed_income_tx(row: &MovementRow, operation: OperationType, note_suffix: &str) -> Transaction {
    Transaction {
        id: None,
        date: row.date,
        operation,
        asset_class: AssetClass::FixedIncome,
        ticker: None,
        asset_id: row.rf_code.as_deref().map(|c| truncate(c, 36)),
        asset_name: truncate(
            if row.asset_name.is_empty() { &row.product } else { &row.asset_name },
            200,
        ),
        qty: None,
        unit_price: None,
        total_value: Some(row.total_value.unwrap_or(Decimal::ZERO)),
        broker: truncate(&row.institution, 30),
        broker_destination: None,
        fees: Decimal::ZERO,
        notes: Some(format!("Importado B3 Mov - {}", note_suffix)),
        created_at: Utc::now(),
    }
}

/// Redemption of a bond, with a correction for rate-unknown bonds
///
/// Imported bonds carry contracted_rate 0, so current_value never accrued
/// interest and the generic resgate (which subtracts the redemption amount)
/// would drive the position negative. When the statement reports the actual
/// redemption value, set current_value to it and close the bond at this
/// date instead.
fn redeem_fixed_income(
    conn: &Connection,
    row: &MovementRow,
    is_maturity: bool,
    note_suffix: &str,
) -> Result<()> {
    let tv = row.total_value.unwrap_or(Decimal::ZERO);
    let tx = fixed_income_tx(row, OperationType::Resgate, note_suffix);
    db::insert_transaction(conn, &tx)?;

    let asset = match &tx.asset_id {
        Some(id) => db::get_asset(conn, AssetClass::FixedIncome, id)?,
        None => None,
    };

    match asset {
        Some(Asset::FixedIncome(mut p)) if tv > Decimal::ZERO && p.contracted_rate == Decimal::ZERO => {
            p.current_value = tv;
            p.maturity_date = row.date;
            db::update_asset(conn, &Asset::FixedIncome(p))?;
        }
        Some(Asset::FixedIncome(mut p)) if tv == Decimal::ZERO && is_maturity => {
            // Value not reported: only stamp the real maturity date
            p.maturity_date = row.date;
            db::update_asset(conn, &Asset::FixedIncome(p))?;
        }
        _ => ledger::apply_to_store(conn, &tx)?,
    }

    Ok(())
}

type IncomeKey = (NaiveDate, String, IncomeKind, Decimal);
type TxKey = (NaiveDate, String, OperationType, Decimal, Decimal);

fn load_income_keys(conn: &Connection) -> Result<HashSet<IncomeKey>> {
    let mut keys = HashSet::new();
    for income in db::list_incomes(conn)? {
        keys.insert((
            income.date,
            income.ticker.to_uppercase(),
            income.kind,
            income.value.round_dp(2),
        ));
    }
    Ok(keys)
}

fn load_tx_keys(conn: &Connection) -> Result<HashSet<TxKey>> {
    let mut keys = HashSet::new();
    for tx in db::list_transactions(conn)? {
        keys.insert((
            tx.date,
            tx.ticker
                .clone()
                .or_else(|| tx.asset_id.clone())
                .unwrap_or_default()
                .to_uppercase(),
            tx.operation,
            tx.qty.unwrap_or(Decimal::ZERO).round_dp(2),
            tx.total_value
                .or(tx.unit_price)
                .unwrap_or(Decimal::ZERO)
                .round_dp(2),
        ));
    }
    Ok(keys)
}
