//! Simulated Stock Market
//!
//! A persistent toy stock market: geometric-Brownian price ticks, an
//! impact-weighted news engine, and fee-adjusted trading against an
//! average-cost portfolio ledger, all denominated in KR.

mod bot;
mod db;
mod error;
mod market;
mod models;
mod notify;
mod trading;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bot::MarketBot;
use crate::db::Database;
use crate::trading::{MarketConfig, Ranking, TradeSettlement};

/// Simulated stock market CLI.
#[derive(Parser)]
#[command(name = "marketsim")]
#[command(about = "A simulated stock market with news-driven prices", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./marketsim.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the market: price ticks plus the periodic news cycle
    Run {
        /// Minutes between price ticks
        #[arg(short, long, default_value = "30")]
        tick_interval: u64,

        /// Hours between news cycles
        #[arg(short, long, default_value = "6")]
        news_interval: u64,
    },

    /// Seed the instrument catalog without starting the market
    Init,

    /// Show current prices for all instruments
    Prices,

    /// Show recent price history for one instrument
    History {
        /// Instrument ticker
        ticker: String,

        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Buy shares
    Buy {
        /// User identifier
        user: String,

        /// Instrument ticker
        ticker: String,

        /// Number of shares
        shares: i64,
    },

    /// Sell shares
    Sell {
        /// User identifier
        user: String,

        /// Instrument ticker
        ticker: String,

        /// Number of shares
        shares: i64,
    },

    /// Show a user's balance and holdings
    Portfolio {
        /// User identifier
        user: String,
    },

    /// Show the leaderboard by unrealized profit percent
    Ranking {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Publish one news event immediately
    News {
        /// Target ticker (random instrument when omitted)
        #[arg(short, long)]
        ticker: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db = Database::new(&cli.database).await?;
    let config = MarketConfig::default();

    match cli.command {
        Commands::Run {
            tick_interval,
            news_interval,
        } => {
            let config = MarketConfig {
                tick_interval_secs: tick_interval * 60,
                news_interval_secs: news_interval * 3600,
                ..config
            };

            let mut bot = MarketBot::new(db, config)?;

            println!("\n=== Simulated Stock Market ===");
            println!("Price tick: every {} min", tick_interval);
            println!("News cycle: every {} h", news_interval);
            println!("\nPress Ctrl+C to stop.\n");

            bot.run().await?;
        }

        Commands::Init => {
            let bot = MarketBot::new(db, config)?;
            bot.initialize().await?;
            println!("Instrument catalog seeded.");
        }

        Commands::Prices => {
            seed(&db).await?;
            let states = db.list_price_states().await?;

            println!(
                "\n{:<6} {:<22} {:>12} {:>9} {:>10}",
                "TICKER", "NAME", "PRICE", "CHANGE", "VOLUME"
            );
            println!("{}", "-".repeat(64));

            let last_update = states.iter().map(|s| s.last_updated).max();
            for state in states {
                let name = db
                    .get_instrument(&state.ticker)
                    .await?
                    .map(|i| i.name)
                    .unwrap_or_default();
                println!(
                    "{:<6} {:<22} {:>12} {:>8}% {:>10}",
                    state.ticker,
                    truncate(&name, 20),
                    state.current_price.round_dp(2),
                    state.change_percent,
                    state.daily_volume
                );
            }

            if let Some(at) = last_update {
                println!("\nLast update: {}", at.format("%Y-%m-%d %H:%M UTC"));
            }
        }

        Commands::History { ticker, limit } => {
            seed(&db).await?;
            let ticker = ticker.to_uppercase();
            let history = db.price_history(&ticker, limit as i64).await?;

            if history.is_empty() {
                println!("No history for {ticker}. Is the ticker correct?");
                return Ok(());
            }

            println!("\n=== {} price history ===", ticker);
            for point in history {
                let marker = match point.reason {
                    models::UpdateReason::NewsImpact => " [news]",
                    models::UpdateReason::Tick => "",
                };
                println!(
                    "  {} {:>12} {:>8}%{}",
                    point.recorded_at.format("%Y-%m-%d %H:%M"),
                    point.price.round_dp(2),
                    point.change_percent,
                    marker
                );
            }
        }

        Commands::Buy {
            user,
            ticker,
            shares,
        } => {
            seed(&db).await?;
            let ticker = ticker.to_uppercase();
            db.ensure_user(&user, config.starting_balance).await?;
            let settlement = TradeSettlement::new(db, config);

            match settlement.buy(&user, &ticker, shares, Utc::now()).await {
                Ok(receipt) => {
                    println!("\n=== Buy executed ===");
                    println!("{} x {} @ {} KR", receipt.shares, receipt.ticker, receipt.price);
                    println!("Cost:    {} KR", receipt.gross_cost);
                    println!("Fee:     {} KR", receipt.fee);
                    println!("Total:   {} KR", receipt.total_cost);
                    println!("Balance: {} KR", receipt.new_balance);
                    println!(
                        "Holding: {} shares @ avg {} KR",
                        receipt.holding.shares,
                        receipt.holding.avg_cost.round_dp(2)
                    );
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(error = %e, "settlement failed transiently");
                    }
                    println!("Trade rejected: {}", e.user_message());
                }
            }
        }

        Commands::Sell {
            user,
            ticker,
            shares,
        } => {
            seed(&db).await?;
            let ticker = ticker.to_uppercase();
            db.ensure_user(&user, config.starting_balance).await?;
            let settlement = TradeSettlement::new(db, config);

            match settlement.sell(&user, &ticker, shares, Utc::now()).await {
                Ok(receipt) => {
                    let pnl = receipt.realized_pnl.round_dp(2);
                    let sign = if pnl.is_sign_negative() { "" } else { "+" };
                    println!("\n=== Sell executed ===");
                    println!("{} x {} @ {} KR", receipt.shares, receipt.ticker, receipt.price);
                    println!("Revenue: {} KR", receipt.gross_revenue);
                    println!("Fee:     {} KR", receipt.fee);
                    println!("Net:     {} KR", receipt.net_revenue);
                    println!("P/L:     {}{} KR", sign, pnl);
                    println!("Balance: {} KR", receipt.new_balance);
                    println!("Remaining: {} shares", receipt.remaining_shares);
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::warn!(error = %e, "settlement failed transiently");
                    }
                    println!("Trade rejected: {}", e.user_message());
                }
            }
        }

        Commands::Portfolio { user } => {
            seed(&db).await?;
            let Some(balance) = db.get_balance(&user).await? else {
                println!("No account for '{}'. A first buy creates one.", user);
                return Ok(());
            };

            let holdings = db.holdings_for_user(&user).await?;
            println!("\n=== Portfolio: {} ===", user);
            println!("Cash: {} KR", balance);

            if holdings.is_empty() {
                println!("No open positions.");
            } else {
                println!(
                    "\n{:<6} {:>8} {:>12} {:>12} {:>12}",
                    "TICKER", "SHARES", "AVG COST", "PRICE", "P/L"
                );
                println!("{}", "-".repeat(56));

                for holding in holdings {
                    let Some(state) = db.get_price_state(&holding.ticker).await? else {
                        continue;
                    };
                    let pnl = holding.unrealized_pnl(state.current_price).round_dp(2);
                    println!(
                        "{:<6} {:>8} {:>12} {:>12} {:>12}",
                        holding.ticker,
                        holding.shares,
                        holding.avg_cost.round_dp(2),
                        state.current_price.round_dp(2),
                        pnl
                    );
                }
            }

            let trades = db.recent_trades(&user, 10).await?;
            if !trades.is_empty() {
                println!("\n--- Recent trades ---");
                for trade in trades {
                    println!(
                        "  {} {:<4} {} x {} @ {} KR (fee {})",
                        trade.executed_at.format("%Y-%m-%d %H:%M"),
                        trade.side.as_str(),
                        trade.shares,
                        trade.ticker,
                        trade.price.round_dp(2),
                        trade.fee
                    );
                }
            }
        }

        Commands::Ranking { limit } => {
            seed(&db).await?;
            let entries = Ranking::new(db).top(limit).await?;

            if entries.is_empty() {
                println!("No ranked users yet. Positions appear here once trades happen.");
                return Ok(());
            }

            println!(
                "\n{:<4} {:<20} {:>12} {:>12} {:>9}",
                "#", "USER", "VALUE", "PROFIT", "PROFIT%"
            );
            println!("{}", "-".repeat(62));

            for (i, entry) in entries.iter().enumerate() {
                println!(
                    "{:<4} {:<20} {:>12} {:>12} {:>8}%",
                    i + 1,
                    truncate(&entry.user_id, 18),
                    entry.market_value.round_dp(0),
                    entry.profit.round_dp(0),
                    entry.profit_percent
                );
            }
        }

        Commands::News { ticker } => {
            let mut bot = MarketBot::new(db.clone(), config)?;
            bot.initialize().await?;

            let subject = match ticker {
                Some(t) => {
                    let t = t.to_uppercase();
                    db.get_instrument(&t)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("unknown ticker: {t}"))?
                }
                None => {
                    info!("no ticker given, forcing a full news cycle");
                    bot.news_cycle(true).await?;
                    println!("News cycle published.");
                    return Ok(());
                }
            };

            bot.publish_news(&subject).await?;
            println!("News published for {}.", subject.ticker);
        }
    }

    Ok(())
}

/// Ensure the catalog exists before read-only commands; a fresh database
/// should show prices instead of an empty table.
async fn seed(db: &Database) -> Result<()> {
    db.seed_instruments(&models::default_catalog()).await?;
    Ok(())
}

/// Truncate a string with ellipsis if too long. Counts chars, not bytes,
/// so multibyte names never split mid-character.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_strings_alone() {
        assert_eq!(truncate("WICR", 18), "WICR");
        assert_eq!(truncate("exactly-eighteen18", 18), "exactly-eighteen18");
    }

    #[test]
    fn truncate_shortens_long_ascii() {
        assert_eq!(truncate("a-very-long-user-identifier", 18), "a-very-long-use...");
    }

    #[test]
    fn truncate_handles_multibyte_names() {
        // Byte-index slicing would panic inside a CJK character here:
        // 13 chars but 37 bytes, well past an 18-column cut.
        assert_eq!(
            truncate("aユーザー名前が長いテスト", 18),
            "aユーザー名前が長いテスト"
        );

        let long = "あ".repeat(20);
        let out = truncate(&long, 18);
        assert_eq!(out, format!("{}...", "あ".repeat(15)));
        assert_eq!(out.chars().count(), 18);
    }
}
