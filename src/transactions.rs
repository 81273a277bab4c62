//! Transaction lifecycle
//!
//! Creating, editing and deleting ledger entries while keeping the derived
//! asset positions consistent. Edits follow a strict revert-then-reapply
//! protocol: the stored effect of the old version is undone before the new
//! version is validated and applied, all inside one database transaction so
//! a failed validation leaves both the row and the position untouched.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use crate::db::{self, Transaction, TransactionUpdate};
use crate::ledger;

/// Validate, persist and apply a new transaction
///
/// The referenced asset may not exist yet; the apply step is then a no-op
/// and the position picks the entry up once the asset is created.
pub fn create_transaction(conn: &mut Connection, tx: &Transaction) -> Result<i64> {
    validate(tx)?;

    let db_tx = conn.transaction()?;
    let id = db::insert_transaction(&db_tx, tx)?;
    ledger::apply_to_store(&db_tx, tx)?;
    db_tx.commit()?;

    Ok(id)
}

/// Edit a stored transaction, rebalancing the affected positions
///
/// Reverts the old version, merges the changed fields, validates the result
/// and applies it. When the edit moves the entry to another asset both the
/// old and the new position end up correct.
pub fn update_transaction(
    conn: &mut Connection,
    id: i64,
    update: &TransactionUpdate,
) -> Result<Transaction> {
    let db_tx = conn.transaction()?;

    let old = db::get_transaction(&db_tx, id)?
        .ok_or_else(|| anyhow!("transaction {} not found", id))?;
    ledger::revert_to_store(&db_tx, &old)?;

    let new = merge(&old, update);
    validate(&new)?;

    db::update_transaction_row(&db_tx, &new)?;
    ledger::apply_to_store(&db_tx, &new)?;
    db_tx.commit()?;

    Ok(new)
}

/// Remove a transaction and undo its effect on the position
pub fn delete_transaction(conn: &mut Connection, id: i64) -> Result<()> {
    let db_tx = conn.transaction()?;

    let tx = db::get_transaction(&db_tx, id)?
        .ok_or_else(|| anyhow!("transaction {} not found", id))?;
    ledger::revert_to_store(&db_tx, &tx)?;
    db::delete_transaction_row(&db_tx, id)?;
    db_tx.commit()?;

    Ok(())
}

fn validate(tx: &Transaction) -> Result<()> {
    ledger::validate_operation(tx.asset_class, tx.operation)?;

    match tx.asset_key() {
        Some(key) if !key.is_empty() => Ok(()),
        _ => {
            let field = if tx.asset_class.is_ticker_keyed() {
                "ticker"
            } else {
                "asset_id"
            };
            Err(crate::error::PortfolioError::ValidationError(format!(
                "{} transaction requires a {}",
                tx.asset_class, field
            ))
            .into())
        }
    }
}

fn merge(old: &Transaction, update: &TransactionUpdate) -> Transaction {
    let mut tx = old.clone();
    if let Some(date) = update.date {
        tx.date = date;
    }
    if let Some(operation) = update.operation {
        tx.operation = operation;
    }
    if let Some(asset_class) = update.asset_class {
        tx.asset_class = asset_class;
    }
    if let Some(ref ticker) = update.ticker {
        tx.ticker = Some(ticker.clone());
    }
    if let Some(ref asset_id) = update.asset_id {
        tx.asset_id = Some(asset_id.clone());
    }
    if let Some(ref asset_name) = update.asset_name {
        tx.asset_name = asset_name.clone();
    }
    if let Some(qty) = update.qty {
        tx.qty = Some(qty);
    }
    if let Some(unit_price) = update.unit_price {
        tx.unit_price = Some(unit_price);
    }
    if let Some(total_value) = update.total_value {
        tx.total_value = Some(total_value);
    }
    if let Some(ref broker) = update.broker {
        tx.broker = broker.clone();
    }
    if let Some(ref dest) = update.broker_destination {
        tx.broker_destination = Some(dest.clone());
    }
    if let Some(fees) = update.fees {
        tx.fees = fees;
    }
    if let Some(ref notes) = update.notes {
        tx.notes = Some(notes.clone());
    }
    tx
}
