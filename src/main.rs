//! Margin Ledger - Main Entry Point
//!
//! Validates configuration, quotes prices for a target markup and replays
//! sale files through the offset ledger.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use margin_ledger::config::load_config;
use margin_ledger::{
    Channel, ConsumptionRecord, Currency, GroupStatus, InMemorySaleHistory, MarginService, PricingContext,
    ReconciliationReport, Sale, SaleEvaluation, SaleId, ShipmentShare,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", env = "MARGIN_LEDGER_CONFIG")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate schedules, offsets and groups
    Check,
    /// Find the lowest price reaching a target markup
    Quote {
        /// Unit cost before VAT
        #[arg(long)]
        cost: Decimal,
        /// Currency of the cost (defaults to settlement currency)
        #[arg(long)]
        cost_currency: Option<String>,
        /// Target markup as a fraction (0.3 = 30%)
        #[arg(long)]
        markup: Decimal,
        #[arg(long)]
        subcategory: String,
        #[arg(long, default_value = "classic")]
        price_list: String,
        #[arg(long, value_enum, default_value_t = ChannelArg::Marketplace)]
        channel: ChannelArg,
        /// Pricing date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// VAT percentage
        #[arg(long, default_value = "21")]
        vat: Decimal,
        /// VAT-inclusive shipment cost
        #[arg(long)]
        shipping_cost: Option<Decimal>,
        #[arg(long, default_value_t = 1)]
        items_in_pack: u32,
    },
    /// Allocate a JSON array of sales and print cap statuses
    Replay {
        /// Path to the sales file
        #[arg(long)]
        sales: String,
        /// Rebuild every target from the replayed sales afterwards
        #[arg(long)]
        reconcile: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ChannelArg {
    Marketplace,
    Direct,
    Storefront,
}

impl From<ChannelArg> for Channel {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Marketplace => Channel::Marketplace,
            ChannelArg::Direct => Channel::Direct,
            ChannelArg::Storefront => Channel::Storefront,
        }
    }
}

#[derive(Serialize)]
struct ReplayOutput {
    sales: usize,
    evaluations: Vec<(SaleId, SaleEvaluation)>,
    records: Vec<ConsumptionRecord>,
    statuses: Vec<GroupStatus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reconciliation: Vec<ReconciliationReport>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    dotenvy::dotenv().ok();
    info!("Configuration file: {}", args.config);
    let config = load_config(Some(&args.config))?;

    match args.command {
        Command::Check => {
            let service = MarginService::from_config(&config, Arc::new(InMemorySaleHistory::new()))?;
            info!(
                "Configuration valid: {} schedule version(s), {} offset(s), {} group(s), settlement {}",
                config.commission.schedules.len(),
                config.offsets.len(),
                config.groups.len(),
                service.settlement()
            );
        }
        Command::Quote {
            cost,
            cost_currency,
            markup,
            subcategory,
            price_list,
            channel,
            date,
            vat,
            shipping_cost,
            items_in_pack,
        } => {
            let service = MarginService::from_config(&config, Arc::new(InMemorySaleHistory::new()))?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let currency = cost_currency
                .map(Currency::new)
                .unwrap_or_else(|| service.settlement().clone());
            let cost = service.snapshot_cost(cost, currency, date).await?;

            let ctx = PricingContext {
                scope: channel.into(),
                subcategory,
                price_list,
                date,
                vat_pct: vat,
                shipping: shipping_cost.map(|cost| ShipmentShare { cost, items_in_pack }),
            };
            let price = service.solve_price_for_markup(&cost, markup, &ctx)?;
            println!("{}", price);
        }
        Command::Replay { sales, reconcile } => {
            let raw = std::fs::read_to_string(&sales).with_context(|| format!("reading {}", sales))?;
            let sales: Vec<Sale> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", sales))?;
            let history = Arc::new(InMemorySaleHistory::from_sales(sales.clone()));
            let service = MarginService::from_config(&config, history)?;

            let mut evaluations = Vec::with_capacity(sales.len());
            let mut records = Vec::new();
            for sale in &sales {
                match service.evaluate_sale(sale) {
                    Ok(evaluation) => evaluations.push((sale.id.clone(), evaluation)),
                    Err(e) => warn!("Could not evaluate sale {}: {}", sale.id, e),
                }
                records.extend(service.allocate_offsets(sale).await?);
            }

            let reconciliation = if reconcile {
                service.reconcile_all().await?
            } else {
                Vec::new()
            };

            let output = ReplayOutput {
                sales: sales.len(),
                evaluations,
                records,
                statuses: service.statuses().await?,
                reconciliation,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
