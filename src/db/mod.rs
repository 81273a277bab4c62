// Database module - SQLite connection and models

pub mod models;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

pub use models::{
    Asset, AssetClass, CashAccountPosition, EquityPosition, FixedIncomePosition, IncomeKind,
    IncomeRecord, OperationType, RealAssetPosition, Transaction, TransactionUpdate,
};

/// Get the default database path (~/.carteira/data.db)
pub fn get_default_db_path() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let carteira_dir = PathBuf::from(home).join(".carteira");

    // Create directory if it doesn't exist
    std::fs::create_dir_all(&carteira_dir).context("Failed to create .carteira directory")?;

    Ok(carteira_dir.join("data.db"))
}

/// Open database connection
pub fn open_db(db_path: Option<PathBuf>) -> Result<Connection> {
    let path = db_path.unwrap_or(get_default_db_path()?);
    let conn = Connection::open(&path).context(format!("Failed to open database at {:?}", path))?;

    conn.execute("PRAGMA foreign_keys = ON", [])
        .context("Failed to enable foreign keys")?;

    Ok(conn)
}

/// Initialize the database with schema
pub fn init_database(db_path: Option<PathBuf>) -> Result<()> {
    let path = db_path.unwrap_or(get_default_db_path()?);

    info!("Initializing database at: {:?}", path);

    let conn = open_db(Some(path))?;

    let schema_sql = include_str!("schema.sql");
    conn.execute_batch(schema_sql)
        .context("Failed to execute schema")?;

    info!("Database initialized successfully");
    Ok(())
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

/// Insert a new asset position
pub fn insert_asset(conn: &Connection, asset: &Asset) -> Result<()> {
    match asset {
        Asset::BrStock(p) | Asset::Fii(p) | Asset::IntlStock(p) | Asset::FiEtf(p) => {
            conn.execute(
                "INSERT INTO assets (class, key, name, sector, qty, avg_price, current_price, broker)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    asset.class().as_str(),
                    p.ticker,
                    p.name,
                    p.sector,
                    p.qty.to_string(),
                    p.avg_price.to_string(),
                    p.current_price.to_string(),
                    p.broker,
                ],
            )?;
        }
        Asset::FixedIncome(p) => {
            conn.execute(
                "INSERT INTO assets (class, key, title, kind, rate_label, applied_value,
                    current_value, application_date, maturity_date, broker, indexer,
                    contracted_rate, tax_exempt)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    asset.class().as_str(),
                    p.id,
                    p.title,
                    p.kind,
                    p.rate_label,
                    p.applied_value.to_string(),
                    p.current_value.to_string(),
                    p.application_date,
                    p.maturity_date,
                    p.broker,
                    p.indexer,
                    p.contracted_rate.to_string(),
                    p.tax_exempt,
                ],
            )?;
        }
        Asset::RealAsset(p) => {
            conn.execute(
                "INSERT INTO assets (class, key, description, kind, estimated_value,
                    acquisition_date, include_in_total)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    asset.class().as_str(),
                    p.id,
                    p.description,
                    p.kind,
                    p.estimated_value.to_string(),
                    p.acquisition_date,
                    p.include_in_total,
                ],
            )?;
        }
        Asset::CashAccount(p) => {
            conn.execute(
                "INSERT INTO assets (class, key, name, kind, institution, balance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    asset.class().as_str(),
                    p.id,
                    p.name,
                    p.kind,
                    p.institution,
                    p.balance.to_string(),
                ],
            )?;
        }
    }
    Ok(())
}

/// Persist mutated position fields back to the row
pub fn update_asset(conn: &Connection, asset: &Asset) -> Result<()> {
    let changed = match asset {
        Asset::BrStock(p) | Asset::Fii(p) | Asset::IntlStock(p) | Asset::FiEtf(p) => conn
            .execute(
                "UPDATE assets SET name = ?3, sector = ?4, qty = ?5, avg_price = ?6,
                    current_price = ?7, broker = ?8
                 WHERE class = ?1 AND key = ?2",
                params![
                    asset.class().as_str(),
                    p.ticker,
                    p.name,
                    p.sector,
                    p.qty.to_string(),
                    p.avg_price.to_string(),
                    p.current_price.to_string(),
                    p.broker,
                ],
            )?,
        Asset::FixedIncome(p) => conn.execute(
            "UPDATE assets SET title = ?3, kind = ?4, rate_label = ?5, applied_value = ?6,
                current_value = ?7, application_date = ?8, maturity_date = ?9, broker = ?10,
                indexer = ?11, contracted_rate = ?12, tax_exempt = ?13
             WHERE class = ?1 AND key = ?2",
            params![
                asset.class().as_str(),
                p.id,
                p.title,
                p.kind,
                p.rate_label,
                p.applied_value.to_string(),
                p.current_value.to_string(),
                p.application_date,
                p.maturity_date,
                p.broker,
                p.indexer,
                p.contracted_rate.to_string(),
                p.tax_exempt,
            ],
        )?,
        Asset::RealAsset(p) => conn.execute(
            "UPDATE assets SET description = ?3, kind = ?4, estimated_value = ?5,
                acquisition_date = ?6, include_in_total = ?7
             WHERE class = ?1 AND key = ?2",
            params![
                asset.class().as_str(),
                p.id,
                p.description,
                p.kind,
                p.estimated_value.to_string(),
                p.acquisition_date,
                p.include_in_total,
            ],
        )?,
        Asset::CashAccount(p) => conn.execute(
            "UPDATE assets SET name = ?3, kind = ?4, institution = ?5, balance = ?6
             WHERE class = ?1 AND key = ?2",
            params![
                asset.class().as_str(),
                p.id,
                p.name,
                p.kind,
                p.institution,
                p.balance.to_string(),
            ],
        )?,
    };

    if changed == 0 {
        return Err(anyhow!(
            "asset {}/{} not found for update",
            asset.class(),
            asset.key()
        ));
    }
    Ok(())
}

/// Fetch an asset by class and identity key
pub fn get_asset(conn: &Connection, class: AssetClass, key: &str) -> Result<Option<Asset>> {
    let mut stmt = conn.prepare(
        "SELECT name, sector, qty, avg_price, current_price, broker,
                title, kind, rate_label, applied_value, current_value,
                application_date, maturity_date, indexer, contracted_rate, tax_exempt,
                description, estimated_value, acquisition_date, include_in_total,
                institution, balance
         FROM assets WHERE class = ?1 AND key = ?2",
    )?;

    let raw = stmt
        .query_row(params![class.as_str(), key], |row| RawAssetRow::read(row))
        .optional()?;

    match raw {
        Some(raw) => Ok(Some(raw.into_asset(class, key)?)),
        None => Ok(None),
    }
}

/// List identity keys of all assets of a class
pub fn list_asset_keys(conn: &Connection, class: AssetClass) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT key FROM assets WHERE class = ?1")?;
    let rows = stmt.query_map([class.as_str()], |row| row.get::<_, String>(0))?;

    let mut keys = HashSet::new();
    for row in rows {
        keys.insert(row?);
    }
    Ok(keys)
}

/// Intermediate row holding every nullable asset column
struct RawAssetRow {
    name: Option<String>,
    sector: Option<String>,
    qty: Option<String>,
    avg_price: Option<String>,
    current_price: Option<String>,
    broker: Option<String>,
    title: Option<String>,
    kind: Option<String>,
    rate_label: Option<String>,
    applied_value: Option<String>,
    current_value: Option<String>,
    application_date: Option<NaiveDate>,
    maturity_date: Option<NaiveDate>,
    indexer: Option<String>,
    contracted_rate: Option<String>,
    tax_exempt: Option<bool>,
    description: Option<String>,
    estimated_value: Option<String>,
    acquisition_date: Option<NaiveDate>,
    include_in_total: Option<bool>,
    institution: Option<String>,
    balance: Option<String>,
}

impl RawAssetRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawAssetRow {
            name: row.get(0)?,
            sector: row.get(1)?,
            qty: row.get(2)?,
            avg_price: row.get(3)?,
            current_price: row.get(4)?,
            broker: row.get(5)?,
            title: row.get(6)?,
            kind: row.get(7)?,
            rate_label: row.get(8)?,
            applied_value: row.get(9)?,
            current_value: row.get(10)?,
            application_date: row.get(11)?,
            maturity_date: row.get(12)?,
            indexer: row.get(13)?,
            contracted_rate: row.get(14)?,
            tax_exempt: row.get(15)?,
            description: row.get(16)?,
            estimated_value: row.get(17)?,
            acquisition_date: row.get(18)?,
            include_in_total: row.get(19)?,
            institution: row.get(20)?,
            balance: row.get(21)?,
        })
    }

    fn into_asset(self, class: AssetClass, key: &str) -> Result<Asset> {
        let asset = match class {
            AssetClass::BrStock | AssetClass::Fii | AssetClass::IntlStock | AssetClass::FiEtf => {
                let position = EquityPosition {
                    ticker: key.to_string(),
                    name: self.name.unwrap_or_else(|| key.to_string()),
                    sector: self.sector,
                    qty: parse_stored_decimal(self.qty.as_deref())?,
                    avg_price: parse_stored_decimal(self.avg_price.as_deref())?,
                    current_price: parse_stored_decimal(self.current_price.as_deref())?,
                    broker: self.broker.unwrap_or_default(),
                };
                Asset::equity(class, position)
            }
            AssetClass::FixedIncome => Asset::FixedIncome(FixedIncomePosition {
                id: key.to_string(),
                title: self.title.unwrap_or_default(),
                kind: self.kind.unwrap_or_else(|| "Outro".to_string()),
                rate_label: self.rate_label.unwrap_or_default(),
                applied_value: parse_stored_decimal(self.applied_value.as_deref())?,
                current_value: parse_stored_decimal(self.current_value.as_deref())?,
                application_date: self
                    .application_date
                    .ok_or_else(|| anyhow!("fixed income {} has no application date", key))?,
                maturity_date: self
                    .maturity_date
                    .ok_or_else(|| anyhow!("fixed income {} has no maturity date", key))?,
                broker: self.broker.unwrap_or_default(),
                indexer: self.indexer.unwrap_or_default(),
                contracted_rate: parse_stored_decimal(self.contracted_rate.as_deref())?,
                tax_exempt: self.tax_exempt.unwrap_or(false),
            }),
            AssetClass::RealAsset => Asset::RealAsset(RealAssetPosition {
                id: key.to_string(),
                description: self.description.unwrap_or_default(),
                kind: self.kind.unwrap_or_else(|| "Imovel".to_string()),
                estimated_value: parse_stored_decimal(self.estimated_value.as_deref())?,
                acquisition_date: self.acquisition_date,
                include_in_total: self.include_in_total.unwrap_or(true),
            }),
            AssetClass::CashAccount => Asset::CashAccount(CashAccountPosition {
                id: key.to_string(),
                name: self.name.unwrap_or_default(),
                kind: self.kind.unwrap_or_else(|| "conta_corrente".to_string()),
                institution: self.institution.unwrap_or_default(),
                balance: parse_stored_decimal(self.balance.as_deref())?,
            }),
        };
        Ok(asset)
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Insert transaction, returns the new row id
pub fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<i64> {
    conn.execute(
        "INSERT INTO transactions (
            date, operation, asset_class, ticker, asset_id, asset_name,
            qty, unit_price, total_value, broker, broker_destination, fees,
            notes, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            tx.date,
            tx.operation.as_str(),
            tx.asset_class.as_str(),
            tx.ticker,
            tx.asset_id,
            tx.asset_name,
            tx.qty.map(|d| d.to_string()),
            tx.unit_price.map(|d| d.to_string()),
            tx.total_value.map(|d| d.to_string()),
            tx.broker,
            tx.broker_destination,
            tx.fees.to_string(),
            tx.notes,
            tx.created_at,
        ],
    )?;

    Ok(conn.last_insert_rowid())
}

/// Overwrite every mutable column of a transaction row
pub fn update_transaction_row(conn: &Connection, tx: &Transaction) -> Result<()> {
    let id = tx.id.ok_or_else(|| anyhow!("transaction has no id"))?;
    let changed = conn.execute(
        "UPDATE transactions SET date = ?2, operation = ?3, asset_class = ?4, ticker = ?5,
            asset_id = ?6, asset_name = ?7, qty = ?8, unit_price = ?9, total_value = ?10,
            broker = ?11, broker_destination = ?12, fees = ?13, notes = ?14
         WHERE id = ?1",
        params![
            id,
            tx.date,
            tx.operation.as_str(),
            tx.asset_class.as_str(),
            tx.ticker,
            tx.asset_id,
            tx.asset_name,
            tx.qty.map(|d| d.to_string()),
            tx.unit_price.map(|d| d.to_string()),
            tx.total_value.map(|d| d.to_string()),
            tx.broker,
            tx.broker_destination,
            tx.fees.to_string(),
            tx.notes,
        ],
    )?;

    if changed == 0 {
        return Err(anyhow!("transaction {} not found", id));
    }
    Ok(())
}

/// Delete a transaction row by id
pub fn delete_transaction_row(conn: &Connection, id: i64) -> Result<()> {
    let changed = conn.execute("DELETE FROM transactions WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(anyhow!("transaction {} not found", id));
    }
    Ok(())
}

/// Fetch a single transaction by id
pub fn get_transaction(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
    let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_TRANSACTION))?;
    let raw = stmt
        .query_row(params![id], |row| RawTransactionRow::read(row))
        .optional()?;

    match raw {
        Some(raw) => Ok(Some(raw.into_transaction()?)),
        None => Ok(None),
    }
}

/// List all transactions, newest first
pub fn list_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "{} ORDER BY date DESC, id DESC",
        SELECT_TRANSACTION
    ))?;
    let rows = stmt.query_map([], |row| RawTransactionRow::read(row))?;

    let mut txs = Vec::new();
    for row in rows {
        txs.push(row?.into_transaction()?);
    }
    Ok(txs)
}

const SELECT_TRANSACTION: &str = "SELECT id, date, operation, asset_class, ticker, asset_id,
    asset_name, qty, unit_price, total_value, broker, broker_destination, fees, notes, created_at
    FROM transactions";

struct RawTransactionRow {
    id: i64,
    date: NaiveDate,
    operation: String,
    asset_class: String,
    ticker: Option<String>,
    asset_id: Option<String>,
    asset_name: String,
    qty: Option<String>,
    unit_price: Option<String>,
    total_value: Option<String>,
    broker: String,
    broker_destination: Option<String>,
    fees: String,
    notes: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl RawTransactionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawTransactionRow {
            id: row.get(0)?,
            date: row.get(1)?,
            operation: row.get(2)?,
            asset_class: row.get(3)?,
            ticker: row.get(4)?,
            asset_id: row.get(5)?,
            asset_name: row.get(6)?,
            qty: row.get(7)?,
            unit_price: row.get(8)?,
            total_value: row.get(9)?,
            broker: row.get(10)?,
            broker_destination: row.get(11)?,
            fees: row.get(12)?,
            notes: row.get(13)?,
            created_at: row.get(14)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction> {
        let operation = self
            .operation
            .parse::<OperationType>()
            .map_err(|_| anyhow!("unknown operation '{}' in transaction row", self.operation))?;
        let asset_class = self
            .asset_class
            .parse::<AssetClass>()
            .map_err(|_| anyhow!("unknown asset class '{}' in transaction row", self.asset_class))?;

        Ok(Transaction {
            id: Some(self.id),
            date: self.date,
            operation,
            asset_class,
            ticker: self.ticker,
            asset_id: self.asset_id,
            asset_name: self.asset_name,
            qty: parse_opt_decimal(self.qty.as_deref())?,
            unit_price: parse_opt_decimal(self.unit_price.as_deref())?,
            total_value: parse_opt_decimal(self.total_value.as_deref())?,
            broker: self.broker,
            broker_destination: self.broker_destination,
            fees: parse_stored_decimal(Some(&self.fees))?,
            notes: self.notes,
            created_at: self.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Incomes
// ---------------------------------------------------------------------------

/// Insert income record (dividend, JCP, yield, interest, amortization)
pub fn insert_income(conn: &Connection, income: &IncomeRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO incomes (date, ticker, kind, value) VALUES (?1, ?2, ?3, ?4)",
        params![
            income.date,
            income.ticker,
            income.kind.as_str(),
            income.value.to_string(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// List all income records, newest first
pub fn list_incomes(conn: &Connection) -> Result<Vec<IncomeRecord>> {
    let mut stmt = conn
        .prepare("SELECT id, date, ticker, kind, value FROM incomes ORDER BY date DESC, id DESC")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, NaiveDate>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut incomes = Vec::new();
    for row in rows {
        let (id, date, ticker, kind, value) = row?;
        let kind = kind
            .parse::<IncomeKind>()
            .map_err(|_| anyhow!("unknown income kind '{}' in row", kind))?;
        incomes.push(IncomeRecord {
            id: Some(id),
            date,
            ticker,
            kind,
            value: parse_stored_decimal(Some(&value))?,
        });
    }
    Ok(incomes)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_stored_decimal(value: Option<&str>) -> Result<Decimal> {
    match value {
        Some(s) => Decimal::from_str(s).context(format!("invalid stored decimal '{}'", s)),
        None => Ok(Decimal::ZERO),
    }
}

fn parse_opt_decimal(value: Option<&str>) -> Result<Option<Decimal>> {
    match value {
        Some(s) => Ok(Some(
            Decimal::from_str(s).context(format!("invalid stored decimal '{}'", s))?,
        )),
        None => Ok(None),
    }
}

#[cfg(test)]
pub(crate) fn open_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    conn.execute_batch(include_str!("schema.sql"))
        .expect("schema");
    conn
}
