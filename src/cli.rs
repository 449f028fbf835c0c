// src/cli.rs
use crate::alerts::manager::AlertManager;
use crate::alerts::RuleLocks;
use crate::app::{self, open_stores, Engine};
use crate::config::AppConfig;
use crate::database::models::{AlertCondition, AlertFrequency, AlertRule, AlertRuleUpdate, NewAlertRule};
use crate::database::postgres::PostgresManager;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::utils::format_timestamp_ms;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "price-alert-engine")]
#[command(about = "Price tick ingestion, candle aggregation and alerting", long_about = None)]
pub struct Cli {
    /// Config file (yaml/toml/json); environment variables override it
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API, scheduler and notification dispatcher
    Serve,

    /// Run a single aggregation cycle and exit
    Aggregate,

    /// Reactivate cooldown alerts that are due and exit
    Reactivate,

    /// Create database tables and indexes
    InitDb,

    /// Manage alert rules
    Alerts {
        #[command(subcommand)]
        action: AlertCommands,
    },
}

#[derive(Subcommand)]
pub enum AlertCommands {
    /// List alert rules
    List {
        /// Only rules for this symbol
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Create an alert rule
    Create {
        #[arg(short, long)]
        symbol: String,

        /// above, below or crosses
        #[arg(long)]
        condition: AlertCondition,

        #[arg(short, long)]
        target_price: f64,

        /// once, every or cooldown
        #[arg(short, long, default_value = "once")]
        frequency: AlertFrequency,

        /// Required for cooldown rules
        #[arg(long)]
        cooldown_seconds: Option<i64>,
    },

    /// Enable or disable an alert rule
    SetActive {
        #[arg(short, long)]
        id: String,

        #[arg(long)]
        active: bool,
    },

    /// Delete an alert rule
    Delete {
        #[arg(short, long)]
        id: String,
    },
}

fn print_rules(rules: &[AlertRule]) {
    println!("Found {} alert rules:", rules.len());
    println!(
        "{:<36} | {:<8} | {:<8} | {:>12} | {:<9} | {:<6} | {}",
        "ID", "Symbol", "Cond", "Target", "Frequency", "Active", "Last triggered"
    );
    println!("{:-<36}-+-{:-<8}-+-{:-<8}-+-{:->12}-+-{:-<9}-+-{:-<6}-+-{:-<14}", "", "", "", "", "", "", "");

    for rule in rules {
        println!(
            "{:<36} | {:<8} | {:<8} | {:>12} | {:<9} | {:<6} | {}",
            rule.id,
            rule.symbol,
            rule.condition.to_string(),
            rule.target_price,
            rule.frequency.to_string(),
            if rule.active { "Yes" } else { "No" },
            rule.last_triggered_at
                .map(format_timestamp_ms)
                .unwrap_or_else(|| "-".to_string())
        );
    }
}

/// Execute a command from the CLI
pub async fn execute_command(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve => app::serve(config).await?,

        Commands::Aggregate => match app::aggregate_once(&config).await? {
            Some(report) => println!(
                "Aggregated {} symbols / {} pairs: {} candles written, {} failures in {:.2?}",
                report.symbols, report.pairs, report.candles_written, report.failures, report.elapsed
            ),
            None => println!("Aggregation skipped: another cycle holds the lock or the cycle failed (see logs)"),
        },

        Commands::Reactivate => {
            let stores = open_stores(&config).await?;
            let clock = SystemClock;
            let engine = Engine::build(&config, stores, Arc::new(clock))?;
            let count = engine.evaluator.process_due_reactivations(clock.now_ms()).await?;
            println!("Reactivated {} alert rules", count);
        }

        Commands::InitDb => {
            let Some(url) = config.database.url.as_deref() else {
                bail!("database.url is not configured");
            };
            let pg = PostgresManager::new(url, config.database.max_connections).await?;
            pg.init_tables().await?;
            println!("Database tables initialized");
        }

        Commands::Alerts { action } => {
            if config.database.url.is_none() {
                bail!("alert management from the CLI needs database.url; in-memory rules would be lost on exit");
            }
            let stores = open_stores(&config).await?;
            let manager = AlertManager::new(stores.rules.clone(), Arc::new(RuleLocks::new()), Arc::new(SystemClock));

            match action {
                AlertCommands::List { symbol } => {
                    let rules = manager.list(symbol.as_deref()).await?;
                    print_rules(&rules);
                }
                AlertCommands::Create {
                    symbol,
                    condition,
                    target_price,
                    frequency,
                    cooldown_seconds,
                } => {
                    let rule = manager
                        .create(NewAlertRule {
                            symbol,
                            condition,
                            target_price,
                            frequency,
                            cooldown_seconds,
                        })
                        .await?;
                    println!("Alert rule created with ID: {}", rule.id);
                }
                AlertCommands::SetActive { id, active } => {
                    manager
                        .update(
                            &id,
                            AlertRuleUpdate {
                                active: Some(active),
                                ..Default::default()
                            },
                        )
                        .await?;
                    println!("Alert rule {} is now {}", id, if active { "active" } else { "inactive" });
                }
                AlertCommands::Delete { id } => {
                    manager.delete(&id).await?;
                    println!("Alert rule {} deleted", id);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_alert_creation() {
        let cli = Cli::try_parse_from([
            "price-alert-engine",
            "alerts",
            "create",
            "--symbol",
            "XAU",
            "--condition",
            "ABOVE",
            "--target-price",
            "1900",
            "--frequency",
            "cooldown",
            "--cooldown-seconds",
            "60",
        ])
        .unwrap();

        match cli.command {
            Commands::Alerts {
                action:
                    AlertCommands::Create {
                        condition,
                        frequency,
                        cooldown_seconds,
                        ..
                    },
            } => {
                assert_eq!(condition, AlertCondition::Above);
                assert_eq!(frequency, AlertFrequency::Cooldown);
                assert_eq!(cooldown_seconds, Some(60));
            }
            _ => panic!("expected alerts create"),
        }
    }
}
