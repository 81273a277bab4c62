use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use tabled::{settings::Style, Table, Tabled};
use tracing::info;
use tracing_subscriber::EnvFilter;

use carteira::cli::{Cli, Commands, TransactionCommands};
use carteira::db;
use carteira::enrichment::{AssetInfoProvider, NullInfoProvider, YahooInfoProvider};
use carteira::importers::{self, backup, movement, negotiation, ImportFormat};
use carteira::transactions;
use carteira::utils::{format_currency, format_qty};

const PREVIEW_ROWS: usize = 15;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }

    match cli.command {
        Commands::Init => {
            db::init_database(cli.db)?;
            println!("{} Database initialized", "✓".green().bold());
            Ok(())
        }

        Commands::Import {
            file,
            confirm,
            no_enrich,
        } => handle_import(cli.db, &file, confirm, no_enrich, cli.json),

        Commands::Transactions { action } => match action {
            TransactionCommands::List => handle_transactions_list(cli.db, cli.json),
            TransactionCommands::Delete { id } => {
                let mut conn = db::open_db(cli.db)?;
                transactions::delete_transaction(&mut conn, id)?;
                println!("{} Transaction {} deleted", "✓".green().bold(), id);
                Ok(())
            }
        },

        Commands::Incomes => handle_incomes(cli.db, cli.json),
    }
}

fn handle_import(
    db_path: Option<PathBuf>,
    file_path: &str,
    confirm: bool,
    no_enrich: bool,
    json: bool,
) -> Result<()> {
    let format = importers::detect_format(file_path)?;
    info!("Importing {} file: {}", format, file_path);

    let mut conn = db::open_db(db_path)?;
    let provider: Box<dyn AssetInfoProvider> = if no_enrich {
        Box::new(NullInfoProvider)
    } else {
        Box::new(YahooInfoProvider::new())
    };

    match format {
        ImportFormat::Negotiation => {
            let rows = negotiation::parse_negotiation_file(file_path)?;
            let preview = negotiation::preview(&conn, rows)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print_negotiation_preview(&preview);
            }

            if confirm {
                let outcome = negotiation::confirm(&mut conn, &preview.rows, provider.as_ref())?;
                print_outcome(outcome.created, &outcome.assets_created, &outcome.errors, json)?;
            }
        }

        ImportFormat::Movement => {
            let rows = movement::parse_movement_file(file_path)?;
            let preview = movement::preview(&conn, rows)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print_movement_preview(&preview);
            }

            if confirm {
                let outcome = movement::confirm(&mut conn, &preview.rows, provider.as_ref())?;
                if !json {
                    println!(
                        "\n{} {} incomes recorded",
                        "✓".green().bold(),
                        outcome.incomes_created
                    );
                }
                print_outcome(
                    outcome.transactions_created,
                    &outcome.assets_created,
                    &outcome.errors,
                    json,
                )?;
            }
        }

        ImportFormat::Backup => {
            let rows = backup::parse_backup_file(file_path)?;
            let preview = backup::preview(&conn, rows)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                print_backup_preview(&preview);
            }

            if confirm {
                let outcome = backup::confirm(&mut conn, &preview.rows, provider.as_ref())?;
                print_outcome(outcome.created, &outcome.assets_created, &outcome.errors, json)?;
            }
        }
    }

    if !confirm && !json {
        println!("\nPreview only. Re-run with {} to import.", "--confirm".bold());
    }
    Ok(())
}

fn row_status(is_skipped: bool, skip_reason: Option<&str>, is_duplicate: bool) -> String {
    if is_skipped {
        skip_reason.unwrap_or("skipped").to_string()
    } else if is_duplicate {
        "duplicate".to_string()
    } else {
        "new".to_string()
    }
}

fn print_negotiation_preview(preview: &negotiation::NegotiationPreview) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Ticker")]
        ticker: String,
        #[tabled(rename = "Class")]
        class: String,
        #[tabled(rename = "Type")]
        operation: String,
        #[tabled(rename = "Qty")]
        qty: String,
        #[tabled(rename = "Price")]
        price: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<Row> = preview
        .rows
        .iter()
        .take(PREVIEW_ROWS)
        .map(|r| Row {
            date: r.date.format("%d/%m/%Y").to_string(),
            ticker: r.ticker.clone(),
            class: r.asset_class.to_string(),
            operation: r.operation.to_string(),
            qty: format_qty(r.qty),
            price: format_currency(r.unit_price),
            status: row_status(r.is_skipped, r.skip_reason.as_deref(), r.is_duplicate),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    if preview.rows.len() > PREVIEW_ROWS {
        println!("... and {} more rows", preview.rows.len() - PREVIEW_ROWS);
    }

    let s = &preview.summary;
    println!(
        "\n{} total, {} new, {} duplicates, {} skipped",
        s.total,
        s.new.to_string().green(),
        s.duplicates.to_string().yellow(),
        s.skipped
    );
    if !s.new_assets.is_empty() {
        println!("New assets: {}", s.new_assets.join(", ").cyan());
    }
}

fn print_movement_preview(preview: &movement::MovementPreview) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Movement")]
        movement: String,
        #[tabled(rename = "Product")]
        product: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Value")]
        value: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<Row> = preview
        .rows
        .iter()
        .take(PREVIEW_ROWS)
        .map(|r| Row {
            date: r.date.format("%d/%m/%Y").to_string(),
            movement: r.movement_type.clone(),
            product: carteira::importers::classify::truncate(&r.product, 40),
            category: r.category.as_str().to_string(),
            value: r
                .total_value
                .map(format_currency)
                .unwrap_or_else(|| "-".to_string()),
            status: row_status(r.is_skipped, r.skip_reason.as_deref(), r.is_duplicate),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    if preview.rows.len() > PREVIEW_ROWS {
        println!("... and {} more rows", preview.rows.len() - PREVIEW_ROWS);
    }

    let s = &preview.summary;
    println!(
        "\n{} total: {} proventos, {} renda fixa, {} eventos, {} ignored, {} duplicates",
        s.total,
        s.proventos.to_string().green(),
        s.renda_fixa,
        s.eventos,
        s.ignorados,
        s.duplicates.to_string().yellow()
    );
    if !s.new_assets.is_empty() {
        println!("New assets: {}", s.new_assets.join(", ").cyan());
    }
}

fn print_backup_preview(preview: &backup::BackupPreview) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Operation")]
        operation: String,
        #[tabled(rename = "Class")]
        class: String,
        #[tabled(rename = "Asset")]
        asset: String,
        #[tabled(rename = "Qty")]
        qty: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<Row> = preview
        .rows
        .iter()
        .take(PREVIEW_ROWS)
        .map(|r| Row {
            date: r.date.format("%d/%m/%Y").to_string(),
            operation: r.operation.to_string(),
            class: r.asset_class.to_string(),
            asset: r
                .ticker
                .clone()
                .or_else(|| r.asset_id.clone())
                .unwrap_or_else(|| r.asset_name.clone()),
            qty: r.qty.map(format_qty).unwrap_or_else(|| "-".to_string()),
            status: row_status(false, None, r.is_duplicate),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    if preview.rows.len() > PREVIEW_ROWS {
        println!("... and {} more rows", preview.rows.len() - PREVIEW_ROWS);
    }

    let s = &preview.summary;
    println!(
        "\n{} total, {} new, {} duplicates",
        s.total,
        s.new.to_string().green(),
        s.duplicates.to_string().yellow()
    );
}

fn print_outcome(created: usize, assets_created: &[String], errors: &[String], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "created": created,
                "assets_created": assets_created,
                "errors": errors,
            }))?
        );
        return Ok(());
    }

    println!("\n{} {} transactions imported", "✓".green().bold(), created);
    if !assets_created.is_empty() {
        println!("Assets created: {}", assets_created.join(", ").cyan());
    }
    for error in errors {
        println!("{} {}", "✗".red().bold(), error);
    }
    Ok(())
}

fn handle_transactions_list(db_path: Option<PathBuf>, json: bool) -> Result<()> {
    let conn = db::open_db(db_path)?;
    let txs = db::list_transactions(&conn)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&txs)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Id")]
        id: String,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Operation")]
        operation: String,
        #[tabled(rename = "Class")]
        class: String,
        #[tabled(rename = "Asset")]
        asset: String,
        #[tabled(rename = "Qty")]
        qty: String,
        #[tabled(rename = "Total")]
        total: String,
    }

    let rows: Vec<Row> = txs
        .iter()
        .map(|tx| Row {
            id: tx.id.map(|id| id.to_string()).unwrap_or_default(),
            date: tx.date.format("%d/%m/%Y").to_string(),
            operation: tx.operation.to_string(),
            class: tx.asset_class.to_string(),
            asset: tx
                .ticker
                .clone()
                .or_else(|| tx.asset_id.clone())
                .unwrap_or_else(|| tx.asset_name.clone()),
            qty: tx.qty.map(format_qty).unwrap_or_else(|| "-".to_string()),
            total: tx
                .total_value
                .map(format_currency)
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{} transactions", txs.len());
    Ok(())
}

fn handle_incomes(db_path: Option<PathBuf>, json: bool) -> Result<()> {
    let conn = db::open_db(db_path)?;
    let incomes = db::list_incomes(&conn)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&incomes)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Ticker")]
        ticker: String,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Value")]
        value: String,
    }

    let rows: Vec<Row> = incomes
        .iter()
        .map(|income| Row {
            date: income.date.format("%d/%m/%Y").to_string(),
            ticker: income.ticker.clone(),
            kind: income.kind.as_str().to_string(),
            value: format_currency(income.value),
        })
        .collect();

    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{} income events", incomes.len());
    Ok(())
}
