//! Two clients on one channel sharing a token.
//!
//! Run twice in separate terminals to watch the second process join the
//! first one's channel:
//!
//! ```text
//! RUST_LOG=debug cargo run -p syncobj --example client_demo -- --hold 10
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use syncobj::{Client, StoreConfig, SyncConfig};

/// Shared client demo
#[derive(Debug, Parser)]
struct Args {
    /// Directory holding the channel regions
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Region capacity in bytes
    #[arg(long, default_value_t = 1024)]
    capacity: usize,

    /// Channel prefix
    #[arg(long, default_value = "SyncedObject")]
    prefix: String,

    /// Seconds to keep the second client open before exiting
    #[arg(long, default_value_t = 0)]
    hold: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let store = args
        .directory
        .map_or_else(StoreConfig::default, StoreConfig::new);
    let config = SyncConfig::new(args.capacity, args.prefix).with_store(store);

    let client1 = Client::open(&config)?;
    client1.set_token("aaa.bbb.ccc")?;
    println!("client1 id={} eldest={}", client1.id(), client1.is_eldest()?);
    println!("client1.token={:?}", client1.token()?);
    println!("client1 shared={}", serde_json::to_string(&client1.snapshot()?)?);

    let client2 = Client::open(&config)?;
    println!("client2 id={} eldest={}", client2.id(), client2.is_eldest()?);
    println!("client2.token={:?}", client2.token()?);
    println!("client2 shared={}", serde_json::to_string(&client2.snapshot()?)?);

    anyhow::ensure!(
        client1.token()? == client2.token()?,
        "clients disagree on the shared token"
    );

    client1.close()?;
    println!("{client2:?} eldest={}", client2.is_eldest()?);

    if args.hold > 0 {
        std::thread::sleep(Duration::from_secs(args.hold));
    }
    client2.close()?;
    Ok(())
}
