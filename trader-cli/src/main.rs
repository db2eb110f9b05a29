use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use exchange_client::{Call, ClientConfig, Event, TraderClient, TraderSpi};
use exchange_protocol::{
    CancelOrderReject, OrderReport, OrderSide, PlaceOrder, QueryHistoryOrdersReq,
    QueryHistoryTradesReq, QueryOrdersReq, QueryPositionsReq, QueryTradesReq, TradeReport,
};
use log::debug;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "trader-cli")]
#[command(about = "Command line trader for the exchange gateway")]
struct Cli {
    /// Client configuration file (TOML, JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gateway address, overrides the configuration
    #[arg(short, long)]
    server: Option<String>,

    /// Timeout for each synchronous call, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Credentials {
    #[arg(short, long)]
    account: String,
    #[arg(short, long)]
    password: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Buy,
    Sell,
}

impl From<Side> for OrderSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => OrderSide::Buy,
            Side::Sell => OrderSide::Sell,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new user
    Register {
        #[arg(short, long)]
        user: String,
        #[arg(long)]
        check_code: String,
    },
    /// Show registration info and balances
    Account {
        #[command(flatten)]
        login: Credentials,
    },
    /// Deposit cash
    Deposit {
        #[command(flatten)]
        login: Credentials,
        #[arg(long)]
        amount: f64,
        #[arg(long, default_value = "CNY")]
        currency: String,
    },
    /// List today's orders
    Orders {
        #[command(flatten)]
        login: Credentials,
        #[arg(long)]
        order_id: Option<String>,
        #[arg(long)]
        instrument: Option<String>,
    },
    /// List today's trades
    Trades {
        #[command(flatten)]
        login: Credentials,
        #[arg(long)]
        order_id: Option<String>,
    },
    /// List positions
    Positions {
        #[command(flatten)]
        login: Credentials,
        #[arg(long)]
        instrument: Option<String>,
    },
    /// Closed orders between two dates (YYYY-MM-DD, inclusive)
    HistoryOrders {
        #[command(flatten)]
        login: Credentials,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Trades between two dates (YYYY-MM-DD, inclusive)
    HistoryTrades {
        #[command(flatten)]
        login: Credentials,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Place an order and print the reports it produces
    Order {
        #[command(flatten)]
        login: Credentials,
        #[arg(short, long)]
        instrument: String,
        #[arg(long, value_enum)]
        side: Side,
        #[arg(short, long)]
        quantity: f64,
        /// Limit price; a market order when omitted
        #[arg(long)]
        price: Option<f64>,
        /// How long to wait for reports, in milliseconds
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },
    /// Cancel an open order
    Cancel {
        #[command(flatten)]
        login: Credentials,
        #[arg(long)]
        order_id: String,
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },
}

/// Forwards trading reports to the main thread.
struct ReportSpi {
    reports: Mutex<Sender<Event>>,
}

impl ReportSpi {
    fn forward(&self, event: Event) {
        if let Ok(reports) = self.reports.lock() {
            let _ = reports.send(event);
        }
    }
}

impl TraderSpi for ReportSpi {
    fn on_order_report(&self, report: &OrderReport) {
        self.forward(report.clone().into());
    }

    fn on_trade_report(&self, report: &TradeReport) {
        self.forward(report.clone().into());
    }

    fn on_cancel_reject(&self, reject: &CancelOrderReject) {
        self.forward(reject.clone().into());
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(server) = cli.server {
        config.server_address = server;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.sync_timeout_ms = timeout_ms;
    }

    debug!("Using gateway {}", config.server_address);

    let (tx, rx) = mpsc::channel();
    let client = TraderClient::builder()
        .spi(ReportSpi {
            reports: Mutex::new(tx),
        })
        .connect_config(&config)
        .with_context(|| format!("Failed to connect to {}", config.server_address))?;

    let outcome = run(&client, cli.command, &rx);
    client.close()?;
    outcome
}

fn run(client: &TraderClient, command: Commands, reports: &Receiver<Event>) -> Result<()> {
    match command {
        Commands::Register { user, check_code } => {
            let ack = client.register(&user, &check_code, Call::SyncDefault)?;
            print_json(&expect_reply(ack, "register")?)
        }
        Commands::Account { login } => {
            sign_in(client, &login)?;
            let info = client.user_info(&login.account, Call::SyncDefault)?;
            print_json(&expect_reply(info, "user info")?)?;
            let margin = client.trading_account(&login.account, Call::SyncDefault)?;
            print_json(&expect_reply(margin, "trading account")?)
        }
        Commands::Deposit {
            login,
            amount,
            currency,
        } => {
            sign_in(client, &login)?;
            let ack = client.deposit(&login.account, &currency, amount, Call::SyncDefault)?;
            print_json(&expect_reply(ack, "deposit")?)
        }
        Commands::Orders {
            login,
            order_id,
            instrument,
        } => {
            sign_in(client, &login)?;
            let request = QueryOrdersReq {
                account_id: login.account,
                order_id,
                instrument,
            };
            let ack = client.query_orders(&request, Call::SyncDefault)?;
            print_json(&expect_reply(ack, "orders")?.orders)
        }
        Commands::Trades { login, order_id } => {
            sign_in(client, &login)?;
            let request = QueryTradesReq {
                account_id: login.account,
                order_id,
            };
            let ack = client.query_trades(&request, Call::SyncDefault)?;
            print_json(&expect_reply(ack, "trades")?.trades)
        }
        Commands::Positions { login, instrument } => {
            sign_in(client, &login)?;
            let request = QueryPositionsReq {
                account_id: login.account,
                instrument,
            };
            let ack = client.query_positions(&request, Call::SyncDefault)?;
            print_json(&expect_reply(ack, "positions")?.positions)
        }
        Commands::HistoryOrders { login, start, end } => {
            sign_in(client, &login)?;
            let request = QueryHistoryOrdersReq {
                account_id: login.account,
                start,
                end,
            };
            let ack = client.query_history_orders(&request, Call::SyncDefault)?;
            print_json(&expect_reply(ack, "order history")?.orders)
        }
        Commands::HistoryTrades { login, start, end } => {
            sign_in(client, &login)?;
            let request = QueryHistoryTradesReq {
                account_id: login.account,
                start,
                end,
            };
            let ack = client.query_history_trades(&request, Call::SyncDefault)?;
            print_json(&expect_reply(ack, "trade history")?.trades)
        }
        Commands::Order {
            login,
            instrument,
            side,
            quantity,
            price,
            wait_ms,
        } => {
            sign_in(client, &login)?;
            let client_order_id = format!("cli-{}", client.client_ref().simple());
            let order = match price {
                Some(price) => PlaceOrder::limit(
                    &login.account,
                    client_order_id,
                    instrument,
                    side.into(),
                    price,
                    quantity,
                ),
                None => PlaceOrder::market(
                    &login.account,
                    client_order_id,
                    instrument,
                    side.into(),
                    quantity,
                ),
            };
            client.place_order(&order)?;
            print_reports(reports, Duration::from_millis(wait_ms))
        }
        Commands::Cancel {
            login,
            order_id,
            wait_ms,
        } => {
            sign_in(client, &login)?;
            client.cancel_order(&login.account, &order_id)?;
            print_reports(reports, Duration::from_millis(wait_ms))
        }
    }
}

fn sign_in(client: &TraderClient, login: &Credentials) -> Result<()> {
    let ack = client.login(&login.account, &login.password, Call::SyncDefault)?;
    if ack.is_none() {
        bail!("Login for {} was not acknowledged", login.account);
    }
    Ok(())
}

fn expect_reply<T>(reply: Option<T>, what: &str) -> Result<T> {
    reply.with_context(|| format!("No {} reply from the gateway", what))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_reports(reports: &Receiver<Event>, wait: Duration) -> Result<()> {
    let deadline = Instant::now() + wait;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match reports.recv_timeout(left) {
            Ok(Event::OrderReport(report)) => print_json(&report)?,
            Ok(Event::TradeReport(report)) => print_json(&report)?,
            Ok(Event::CancelReject(reject)) => print_json(&reject)?,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    Ok(())
}
