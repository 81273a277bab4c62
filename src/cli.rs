use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "carteira")]
#[command(
    version,
    about = "Personal portfolio tracker for Brazilian investments"
)]
#[command(
    long_about = "Track stocks, FIIs, fixed income, cash and physical assets from a \
transaction ledger, with B3 statement import (negociação, movimentação and backup files)."
)]
pub struct Cli {
    /// Database file (default: ~/.carteira/data.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Output results in JSON format
    #[arg(long = "json", global = true)]
    pub json: bool,

    /// Disable colorized output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database
    Init,

    /// Import a B3 statement or backup file (auto-detects format)
    Import {
        /// Path to the .xlsx file
        file: String,

        /// Persist the import (default is preview only)
        #[arg(short, long)]
        confirm: bool,

        /// Skip the name/sector lookup for new assets
        #[arg(long)]
        no_enrich: bool,
    },

    /// Transaction ledger management
    Transactions {
        #[command(subcommand)]
        action: TransactionCommands,
    },

    /// List recorded income events
    Incomes,
}

#[derive(Subcommand)]
pub enum TransactionCommands {
    /// List all transactions, newest first
    List,

    /// Delete a transaction and undo its effect on the position
    Delete {
        /// Transaction id
        id: i64,
    },
}
