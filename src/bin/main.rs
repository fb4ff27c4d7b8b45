// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use stock_ledger::config::ConfigError;
use stock_ledger::{
    Actor, Context, Database, LedgerConfig, LedgerError, MutationId, NewStock, Pagination,
    Pharmacy, PharmacyId, Product, ProductId, StockFilter, StockService,
    StockUpdate, TransferRequest, UnitOfWork,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Stock Ledger - Replay stock commands from a CSV file
///
/// Reads ledger commands from a CSV file and writes the resulting stock
/// table to stdout. Supports adding, updating, and deleting stock, and the
/// request/approve/cancel transfer workflow.
#[derive(Parser, Debug)]
#[command(name = "stock-ledger")]
#[command(about = "Replays stock ledger commands from a CSV file", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: type,source,target,product,amount,price,mutation
    /// Example: cargo run -- commands.csv > stocks.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Optional YAML configuration file
    #[arg(long, value_name = "YAML")]
    config: Option<PathBuf>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn main() {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not set up yet.
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    init_logging(&config);

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %args.input.display(), error = %e, "cannot open input");
            process::exit(1);
        }
    };

    let service = match process_commands(BufReader::new(file), config) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "cannot process commands");
            process::exit(1);
        }
    };

    if let Err(e) = write_stocks(&service, std::io::stdout()) {
        tracing::error!(error = %e, "cannot write output");
        process::exit(1);
    }
}

/// Loads the YAML config at `path`, or the defaults when none is given.
fn load_config(path: Option<&Path>) -> Result<LedgerConfig, CliError> {
    match path {
        Some(path) => Ok(LedgerConfig::load(path)?),
        None => Ok(LedgerConfig::default()),
    }
}

/// Logs go to stderr so stdout carries only the CSV report.
fn init_logging(config: &LedgerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, source, target, product, amount, price, mutation`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    command: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    source: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    target: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    product: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    price: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    mutation: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    AddStock(NewStock),
    UpdateStock {
        pharmacy_id: PharmacyId,
        product_id: ProductId,
        update: StockUpdate,
    },
    DeleteStock {
        pharmacy_id: PharmacyId,
        product_id: ProductId,
    },
    Request(TransferRequest),
    Approve(MutationId),
    Cancel(MutationId),
    Auto(TransferRequest),
}

impl CsvRecord {
    /// Converts CSV record to a ledger command.
    ///
    /// Returns `None` for unknown command types or missing required fields.
    fn into_command(self) -> Option<Command> {
        let transfer = |record: &CsvRecord| -> Option<TransferRequest> {
            Some(TransferRequest {
                source_pharmacy_id: PharmacyId(record.source?),
                target_pharmacy_id: PharmacyId(record.target?),
                product_id: ProductId(record.product?),
                amount: record.amount?,
            })
        };

        match self.command.to_lowercase().as_str() {
            "stock" => Some(Command::AddStock(NewStock {
                pharmacy_id: PharmacyId(self.source?),
                product_id: ProductId(self.product?),
                quantity: self.amount.unwrap_or(0),
                price: self.price.unwrap_or(0),
            })),
            "update" => Some(Command::UpdateStock {
                pharmacy_id: PharmacyId(self.source?),
                product_id: ProductId(self.product?),
                update: StockUpdate {
                    quantity: self.amount,
                    price: self.price,
                },
            }),
            "delete" => Some(Command::DeleteStock {
                pharmacy_id: PharmacyId(self.source?),
                product_id: ProductId(self.product?),
            }),
            "request" => transfer(&self).map(Command::Request),
            "auto" => transfer(&self).map(Command::Auto),
            "approve" => Some(Command::Approve(MutationId(self.mutation?))),
            "cancel" => Some(Command::Cancel(MutationId(self.mutation?))),
            _ => None,
        }
    }
}

/// Registers placeholder catalog entries for ids first seen in the input.
fn register_catalog(db: &Database, command: &Command) {
    let (pharmacies, product) = match command {
        Command::AddStock(stock) => (vec![stock.pharmacy_id], Some(stock.product_id)),
        Command::Request(request) | Command::Auto(request) => (
            vec![request.source_pharmacy_id, request.target_pharmacy_id],
            Some(request.product_id),
        ),
        _ => return,
    };
    for id in pharmacies {
        db.register_pharmacy(Pharmacy {
            id,
            name: format!("pharmacy-{id}"),
            manager: None,
        });
    }
    if let Some(id) = product {
        db.register_product(Product {
            id,
            name: format!("product-{id}"),
            slug: format!("product-{id}"),
        });
    }
}

fn apply(
    service: &StockService<Database>,
    ctx: &Context,
    command: Command,
) -> Result<(), LedgerError> {
    let find = |pharmacy_id: PharmacyId, product_id: ProductId| {
        service
            .unit_of_work()
            .atomic(ctx, |repo| repo.get_by_pharmacy_and_product(pharmacy_id, product_id))
    };

    match command {
        Command::AddStock(stock) => {
            service.add(ctx, Actor::Admin, stock)?;
        }
        Command::UpdateStock {
            pharmacy_id,
            product_id,
            update,
        } => {
            let stock = find(pharmacy_id, product_id)?;
            service.update(ctx, Actor::Admin, stock.id, update)?;
        }
        Command::DeleteStock {
            pharmacy_id,
            product_id,
        } => {
            let stock = find(pharmacy_id, product_id)?;
            service.delete_by_id(ctx, Actor::Admin, stock.id)?;
        }
        Command::Request(request) => {
            service.request_stock_transfer(ctx, Actor::Admin, request)?;
        }
        Command::Approve(id) => {
            service.approve_stock_transfer(ctx, Actor::Admin, id)?;
        }
        Command::Cancel(id) => {
            service.cancel_stock_transfer(ctx, Actor::Admin, id)?;
        }
        Command::Auto(request) => {
            service.auto_transfer(ctx, request)?;
        }
    }
    Ok(())
}

/// Replays commands from a CSV reader.
///
/// Malformed rows and rejected commands are logged and skipped; they never
/// stop processing. Mutation ids are assigned sequentially from 1, so later
/// `approve`/`cancel` rows can refer to earlier `request` rows by position.
///
/// # CSV Format
///
/// ```csv
/// type,source,target,product,amount,price,mutation
/// stock,1,,7,10,1500,
/// stock,2,,7,5,1500,
/// request,1,2,7,10,,
/// approve,,,,,,1
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_commands<R: Read>(
    reader: R,
    config: LedgerConfig,
) -> Result<StockService<Database>, csv::Error> {
    let db = Database::with_config(config);
    let service = StockService::new(db.clone());
    let ctx = Context::background();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(command) = record.into_command() else {
            tracing::warn!(line, "skipping invalid command");
            continue;
        };

        register_catalog(&db, &command);
        if let Err(e) = apply(&service, &ctx, command) {
            tracing::warn!(line, ?command, error = %e, "command rejected");
        }
    }

    Ok(service)
}

#[derive(Debug, Serialize)]
struct StockRow {
    id: u64,
    pharmacy: u64,
    product: u64,
    quantity: u64,
    price: u64,
}

/// Writes every live stock, ordered by id, as CSV.
///
/// # CSV Format
///
/// ```csv
/// id,pharmacy,product,quantity,price
/// 1,1,7,0,1500
/// 2,2,7,15,1500
/// ```
fn write_stocks<W: Write>(service: &StockService<Database>, writer: W) -> Result<(), CliError> {
    let ctx = Context::background();
    let limit = service.unit_of_work().config().max_page_limit;
    let mut stocks = Vec::new();
    let mut page = 1;
    loop {
        let filter = StockFilter {
            pagination: Pagination::new(page, limit),
            ..StockFilter::default()
        };
        let result = service.list(&ctx, &filter)?;
        stocks.extend(result.items);
        if u64::from(page) >= result.page_info.page_count {
            break;
        }
        page += 1;
    }
    stocks.sort_by_key(|stock| stock.id);

    let mut wtr = Writer::from_writer(writer);
    for stock in stocks {
        wtr.serialize(StockRow {
            id: stock.id.0,
            pharmacy: stock.pharmacy_id.0,
            product: stock.product_id.0,
            quantity: stock.quantity,
            price: stock.price,
        })?;
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
