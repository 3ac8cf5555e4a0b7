//! byb-spy: console subscriber for the shared-memory IPC stream.
//!
//! Attaches to one stream's log, decodes every frame, and prints it.
//! Useful for verifying that the bot is publishing without wiring up a
//! full downstream consumer.
//!
//! Usage:
//!   byb-spy [--channel ipc:///dev/shm/byb] [--stream 1001]

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use byb_common::codec::{decode, DecodedMessage};
use byb_common::ipc::{IpcPublisherConfig, SharedLog};

/// CLI arguments for byb-spy.
#[derive(Parser, Debug)]
#[command(name = "byb-spy")]
#[command(about = "Console subscriber for the byb IPC stream")]
struct Args {
    /// Channel URI the bot publishes on
    #[arg(long, default_value = "ipc:///dev/shm/byb")]
    channel: String,

    /// Stream ID (1001 = orderbook, 1002 = signals/orders)
    #[arg(long, default_value_t = 1001)]
    stream: i32,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_frame(payload: &[u8]) {
    match decode(payload) {
        Ok(DecodedMessage::Snapshot(msg)) => {
            let bid = msg
                .bids
                .first()
                .map(|l| format!("{}({})", l.price, l.qty))
                .unwrap_or_else(|| "-".to_string());
            let ask = msg
                .asks
                .first()
                .map(|l| format!("{}({})", l.price, l.qty))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "[{}] SNAPSHOT {} bid {} ask {} ({} x {} levels)",
                msg.timestamp_ns,
                msg.symbol,
                bid,
                ask,
                msg.bids.len(),
                msg.asks.len()
            );
        }
        Ok(DecodedMessage::Signal(msg)) => {
            let action = if msg.action == 0 { "BUY" } else { "SELL" };
            println!(
                "[{}] SIGNAL {} {} {} @ {}",
                msg.timestamp_ns, msg.symbol, action, msg.qty, msg.price
            );
        }
        Ok(DecodedMessage::Order(msg)) => {
            println!(
                "[{}] ORDER {} {} {} {} @ {} active={}",
                msg.timestamp_ns,
                msg.symbol,
                msg.order_id,
                msg.side,
                msg.qty,
                msg.price,
                msg.is_active
            );
        }
        Err(e) => println!("  undecodable frame ({} bytes): {}", payload.len(), e),
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let cfg = IpcPublisherConfig {
        channel: args.channel.clone(),
        stream_id: args.stream,
        ..IpcPublisherConfig::default()
    };
    let path = cfg.log_path();

    let log = SharedLog::open(&path)
        .with_context(|| format!("failed to open log at {}", path.display()))?;
    log.attach_consumer();
    println!(
        "watching {} stream {} ({})",
        args.channel,
        args.stream,
        path.display()
    );

    let mut received = 0u64;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(10)) => {
                received += log.poll(print_frame, 64) as u64;
            }
        }
    }

    println!("stopped after {received} frames");
    Ok(())
}
