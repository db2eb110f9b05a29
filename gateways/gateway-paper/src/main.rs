mod paper;

use anyhow::{Context, Result};
use clap::Parser;
use exchange_protocol::Envelope;
use log::{error, info, warn};

use paper::PaperExchange;

#[derive(Parser, Debug)]
#[command(name = "gateway-paper")]
#[command(about = "Paper exchange gateway speaking the trader wire protocol")]
struct Args {
    /// ZMQ endpoint to bind the ROUTER socket on
    #[arg(short, long, default_value = "tcp://*:5570")]
    bind: String,

    /// Price every market order fills at
    #[arg(long, default_value_t = 100.0)]
    reference_price: f64,

    /// Fee charged on each fill, as a fraction of its notional
    #[arg(long, default_value_t = 0.0003)]
    fee_rate: f64,

    /// Currency of every account
    #[arg(long, default_value = "CNY")]
    currency: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    info!("=== Gateway Paper Starting ===");

    let context = zmq::Context::new();
    let socket = context.socket(zmq::ROUTER)?;
    socket
        .bind(&args.bind)
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!("Bound to {}", args.bind);

    let mut exchange = PaperExchange::new(args.reference_price, args.fee_rate, args.currency);

    loop {
        let parts = socket.recv_multipart(0)?;
        let (Some(identity), Some(frame)) = (parts.first(), parts.last()) else {
            continue;
        };
        if parts.len() < 2 {
            warn!("Dropping frame without peer identity");
            continue;
        }

        let request = match Envelope::from_bytes(frame) {
            Ok(request) => request,
            Err(e) => {
                error!("Failed to decode envelope: {}", e);
                continue;
            }
        };
        if request.is_response() {
            warn!("Ignoring response-class frame from a client");
            continue;
        }

        let replies = match exchange.handle(&request) {
            Ok(replies) => replies,
            Err(e) => {
                error!("Failed to handle request: {}", e);
                continue;
            }
        };
        for reply in replies {
            let bytes = reply.to_bytes()?;
            socket.send_multipart([identity.as_slice(), bytes.as_slice()], 0)?;
        }
    }
}
