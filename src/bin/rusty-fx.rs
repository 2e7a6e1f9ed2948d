//! rusty-fx CLI - fetch, cache and forecast exchange rates
//!
//! ## Example Usage
//!
//! ```bash
//! # Fill the cache for a range (only missing dates are requested)
//! rusty-fx fetch USD_EUR --start 2025-01-01 --end 2025-03-31
//!
//! # Bring the cache up to today
//! rusty-fx update USD_EUR
//!
//! # Predict 7 days from a date (backtests when the date is already cached)
//! rusty-fx predict USD_EUR --date 2025-04-01 --days 7
//!
//! # Bare quote codes use the configured base currency
//! rusty-fx train EUR
//!
//! # Show the last 50 logged predictions
//! rusty-fx logs --limit 50
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rusty_fx::config::Config;
use rusty_fx::currency::CurrencyPair;
use rusty_fx::data::{FetchSummary, HttpRateProvider};
use rusty_fx::error::{ErrorResponse, FxError};
use rusty_fx::ForecastService;
use serde::Serialize;
use std::path::PathBuf;
use std::process;

type Service = ForecastService<HttpRateProvider>;

/// rusty-fx: exchange-rate cache with a moving-average baseline forecast
#[derive(Parser)]
#[command(name = "rusty-fx")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Exchange-rate fetch/cache pipeline with a baseline forecaster", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and cache rates for a date range
    Fetch {
        /// Currency pair, e.g. USD_EUR, or a quote code like EUR
        #[arg(value_name = "PAIR")]
        pair: String,

        /// Start date (YYYY-MM-DD)
        #[arg(short = 's', long)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD), defaults to the start date
        #[arg(short = 'e', long)]
        end: Option<NaiveDate>,
    },

    /// Fetch everything after the latest cached date
    Update {
        #[arg(value_name = "PAIR")]
        pair: String,
    },

    /// Predict rates from a date
    Predict {
        #[arg(value_name = "PAIR")]
        pair: String,

        /// First predicted date (YYYY-MM-DD)
        #[arg(short = 'd', long)]
        date: NaiveDate,

        /// Number of days to predict
        #[arg(short = 'n', long, default_value = "1")]
        days: u32,
    },

    /// Check a pair has enough history to predict
    Train {
        #[arg(value_name = "PAIR")]
        pair: String,
    },

    /// List cached pairs and their date ranges
    Pairs,

    /// List currencies quoted against the base currency
    Currencies,

    /// Show the cached date range for a pair
    Range {
        #[arg(value_name = "PAIR")]
        pair: String,
    },

    /// Print the cached series for a pair
    Series {
        #[arg(value_name = "PAIR")]
        pair: String,
    },

    /// Show recent logged predictions
    Logs {
        #[arg(short = 'l', long, default_value = "50")]
        limit: usize,
    },

    /// Delete cached rates
    Purge {
        /// Pair to delete; omit with --all to delete everything
        #[arg(value_name = "PAIR")]
        pair: Option<String>,

        #[arg(long)]
        all: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = Config::load(cli.config.as_deref())
        .map_err(anyhow::Error::from)
        .and_then(|config| {
            if cli.verbose {
                println!("{} v{}", "rusty-fx".cyan().bold(), env!("CARGO_PKG_VERSION"));
                println!("Data dir: {}", config.data_dir.display().to_string().dimmed());
            }
            let service = ForecastService::from_config(&config)?;
            run(&cli, &service)
        });

    if let Err(e) = result {
        if cli.json {
            if let Some(fx) = e.downcast_ref::<FxError>() {
                let body = serde_json::to_string_pretty(&ErrorResponse::from(fx)).unwrap_or_default();
                eprintln!("{}", body);
                process::exit(1);
            }
        }
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn run(cli: &Cli, service: &Service) -> Result<()> {
    match &cli.command {
        Commands::Fetch { pair, start, end } => {
            let pair = parse_pair(service, pair)?;
            let end = end.unwrap_or(*start);
            let summary = fetch_with_progress(service, &pair, *start, end, cli.json)?;
            print_fetch(cli.json, &summary)
        }
        Commands::Update { pair } => {
            let pair = parse_pair(service, pair)?;
            let summary = service.update_to_latest(&pair)?;
            print_fetch(cli.json, &summary)
        }
        Commands::Predict { pair, date, days } => {
            let pair = parse_pair(service, pair)?;
            let response = service.predict(&pair, *date, *days)?;
            if cli.json {
                return print_json(&response);
            }
            println!(
                "{} {} ({}, window {}, data through {})",
                "Forecast".green().bold(),
                response.pair.cyan(),
                response.forecast.model,
                response.forecast.window,
                response.forecast.as_of
            );
            for point in &response.forecast.points {
                match point.actual {
                    Some(actual) => println!(
                        "  {}  {:.6}  actual {:.6}  error {:.6}",
                        point.date,
                        point.predicted,
                        actual,
                        point.error.unwrap_or_default()
                    ),
                    None => println!("  {}  {:.6}", point.date, point.predicted),
                }
            }
            if let (Some(rmse), Some(mae)) = (response.rmse, response.mae) {
                println!("  {} {:.6}  {} {:.6}", "RMSE".bold(), rmse, "MAE".bold(), mae);
            }
            Ok(())
        }
        Commands::Train { pair } => {
            let pair = parse_pair(service, pair)?;
            let summary = service.train(&pair)?;
            if cli.json {
                return print_json(&summary);
            }
            println!(
                "{} {}: {} points ({}..{}), window {}, current average {:.6}",
                "Ready".green().bold(),
                summary.pair.cyan(),
                summary.data_points,
                summary.first_date,
                summary.last_date,
                summary.window,
                summary.moving_average
            );
            println!("  mean {:.6}  std {:.6}", summary.mean_rate, summary.std_rate);
            Ok(())
        }
        Commands::Currencies => {
            let codes = service.currencies();
            if cli.json {
                return print_json(&codes);
            }
            println!("{} {}", "Base".bold(), service.base_currency().to_string().cyan());
            let codes: Vec<&str> = codes.iter().map(|c| c.as_str()).collect();
            println!("{}", codes.join(" "));
            Ok(())
        }
        Commands::Pairs => {
            let pairs = service.pairs()?;
            if cli.json {
                let rows: Vec<_> = pairs
                    .iter()
                    .map(|p| (p.key(), service.date_range(p)))
                    .collect();
                return print_json(&rows);
            }
            if pairs.is_empty() {
                println!("{}", "No cached pairs".yellow());
            }
            for pair in pairs {
                match service.date_range(&pair) {
                    Some((first, last)) => println!("  {}  {}..{}", pair.to_string().cyan(), first, last),
                    None => println!("  {}  {}", pair.to_string().cyan(), "(empty)".dimmed()),
                }
            }
            Ok(())
        }
        Commands::Range { pair } => {
            let pair = parse_pair(service, pair)?;
            let range = service.date_range(&pair);
            if cli.json {
                return print_json(&range);
            }
            match range {
                Some((first, last)) => println!("{}  {}..{}", pair.to_string().cyan(), first, last),
                None => anyhow::bail!(FxError::UnknownPair(pair.key())),
            }
            Ok(())
        }
        Commands::Series { pair } => {
            let pair = parse_pair(service, pair)?;
            let chart = service.chart_data(&pair)?;
            if cli.json {
                return print_json(&chart);
            }
            for (date, rate) in chart.dates.iter().zip(&chart.rates) {
                println!("{},{}", date, rate);
            }
            Ok(())
        }
        Commands::Logs { limit } => {
            let records = service.recent_predictions(*limit)?;
            if cli.json {
                return print_json(&records);
            }
            for r in records {
                println!(
                    "{}  {}  {}  h={}  predicted {:.6}  actual {}",
                    r.issued_at.format("%Y-%m-%d %H:%M:%S"),
                    r.pair.cyan(),
                    r.target_date,
                    r.horizon_days,
                    r.predicted_rate,
                    r.actual_rate
                        .map(|a| format!("{:.6}", a))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            Ok(())
        }
        Commands::Purge { pair, all } => match (pair, all) {
            (Some(pair), _) => {
                let pair = parse_pair(service, pair)?;
                if service.purge(&pair)? {
                    println!("{} cached rates for {}", "Deleted".green().bold(), pair);
                } else {
                    println!("{} {}", "Nothing cached for".yellow(), pair);
                }
                Ok(())
            }
            (None, true) => {
                let removed = service.purge_all()?;
                println!("{} {} cached pair(s)", "Deleted".green().bold(), removed);
                Ok(())
            }
            (None, false) => anyhow::bail!("Specify a pair or --all"),
        },
    }
}

fn parse_pair(service: &Service, raw: &str) -> Result<CurrencyPair> {
    service
        .resolve_pair(raw)
        .with_context(|| format!("'{}' is not a currency pair like USD_EUR or a code like EUR", raw))
}

fn fetch_with_progress(
    service: &Service,
    pair: &CurrencyPair,
    start: NaiveDate,
    end: NaiveDate,
    quiet: bool,
) -> Result<FetchSummary> {
    if quiet {
        return Ok(service.fetch_and_merge(pair, start, end)?);
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} calls {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(pair.to_string());

    let result = service.fetch_and_merge_with_progress(pair, start, end, &mut |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();
    Ok(result?)
}

fn print_fetch(json: bool, summary: &FetchSummary) -> Result<()> {
    if json {
        return print_json(summary);
    }
    println!(
        "{} {} point(s) for {} in {} call(s)",
        "Fetched".green().bold(),
        summary.fetched_count,
        summary.pair.cyan(),
        summary.calls_made
    );
    if !summary.gap_dates.is_empty() {
        let gaps: Vec<String> = summary.gap_dates.iter().map(|d| d.to_string()).collect();
        println!("{} {}", "Gaps:".yellow().bold(), gaps.join(", "));
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
