//! Carteira: transaction-ledger portfolio tracking for Brazilian investments
//!
//! Asset positions (stocks, FIIs, fixed-income ETFs, international stocks,
//! bonds, cash accounts and physical assets) are derived state: every change
//! flows through a [`db::Transaction`] that the ledger folds into the
//! position, and editing or deleting an entry reverts its effect first.
//! B3 statement files and backup exports are imported through a
//! preview/confirm flow in [`importers`].

pub mod cli;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod importers;
pub mod ledger;
pub mod transactions;
pub mod utils;

pub use error::{PortfolioError, Result};
