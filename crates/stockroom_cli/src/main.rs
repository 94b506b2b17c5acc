//! Command-line front end over the SQLite-backed inventory.
//!
//! # Responsibility
//! - Map `list | add | edit | delete` onto `InventoryService` operations.
//! - Print notices to stdout and errors to stderr.

use clap::{Parser, Subcommand};
use log::info;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use stockroom_core::{
    CoreConfig, DeleteOutcome, DraftField, InventoryService, Notice, ProductId, SessionError,
    SqliteStore, SyncStatus,
};

const DEFAULT_DB_FILE: &str = "stockroom.sqlite3";

#[derive(Parser, Debug)]
#[command(name = "stockroom_cli")]
#[command(about = "Manage the Stockroom product inventory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List products and the inventory summary
    List,
    /// Add a product
    Add {
        name: String,
        price: String,
        count: String,
    },
    /// Replace the fields of an existing product
    Edit {
        id: String,
        name: String,
        price: String,
        count: String,
    },
    /// Delete a product
    Delete {
        id: String,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

type Service = InventoryService<SqliteStore>;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let config = CoreConfig::default()
        .with_env_overrides()
        .map_err(|err| err.to_string())?;
    config.init_logging()?;

    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
    let store = SqliteStore::open(&db_path).map_err(|err| err.to_string())?;
    let mut service = InventoryService::from_config(store, &config, |notice: Notice| {
        println!("{}", notice.message);
    });

    service.start().map_err(|err| err.to_string())?;
    if service.status() == SyncStatus::LoadFailed {
        let detail = service
            .last_error()
            .map_or_else(|| "unknown error".to_string(), ToString::to_string);
        return Err(format!("could not load products: {detail}"));
    }
    info!("event=cli_command module=cli status=start command={}", command_name(&cli.command));

    match cli.command {
        Command::List => {
            list(&service);
            Ok(())
        }
        Command::Add { name, price, count } => {
            service.begin_create().map_err(|err| err.to_string())?;
            save(&mut service, name, price, count)
        }
        Command::Edit {
            id,
            name,
            price,
            count,
        } => {
            service
                .begin_edit(&ProductId::new(id))
                .map_err(|err| err.to_string())?;
            save(&mut service, name, price, count)
        }
        Command::Delete { id, yes } => {
            let confirm = |prompt: &str| yes || ask(prompt);
            match service
                .delete(&ProductId::new(id), &confirm)
                .map_err(|err| err.to_string())?
            {
                DeleteOutcome::Deleted => Ok(()),
                DeleteOutcome::Aborted => {
                    println!("Nothing deleted.");
                    Ok(())
                }
            }
        }
    }
}

fn list(service: &Service) {
    for product in service.products() {
        println!(
            "{}\t{}\t{:.2}\t{}",
            product.id, product.name, product.price, product.count
        );
    }
    let summary = service.summary();
    println!(
        "{} products, {} units, total value {:.2}",
        summary.product_count, summary.total_units, summary.total_value
    );
}

fn save(service: &mut Service, name: String, price: String, count: String) -> Result<(), String> {
    service
        .update_draft(DraftField::Name, name)
        .and_then(|()| service.update_draft(DraftField::Price, price))
        .and_then(|()| service.update_draft(DraftField::Count, count))
        .map_err(|err| err.to_string())?;

    match service.commit() {
        Ok(id) => {
            println!("{id}");
            Ok(())
        }
        // The notice already told the user what went wrong.
        Err(SessionError::Validation(_)) => Err("product not saved".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn ask(prompt: &str) -> bool {
    print!("{prompt} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::List => "list",
        Command::Add { .. } => "add",
        Command::Edit { .. } => "edit",
        Command::Delete { .. } => "delete",
    }
}
