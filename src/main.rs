//! Wallet Ledger CLI
//!
//! Command-line interface for inspecting and administering a ledger store.
//!
//! # Usage
//!
//! ```bash
//! wallet-ledger --backend sled --data ledger.sled add <identity> 100
//! wallet-ledger --backend sled --data ledger.sled pay <from> <to> 40
//! wallet-ledger --backend sqlite --data sqlite://ledger.db top --limit 5 > top.csv
//! wallet-ledger --config ledger.toml export --encoding base64 --output backup.txt
//! ```
//!
//! User-facing output goes to stdout; logs go to stderr and are filtered with
//! `RUST_LOG` (default `info`, raised by `-v`).
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (invalid identity, insufficient funds, backend failure, etc.)

use std::process;
use tracing_subscriber::EnvFilter;
use wallet_ledger::cli;

fn main() {
    // Parse command-line arguments using clap
    let args = cli::parse_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            process::exit(1);
        }
    };

    let result = runtime.block_on(async {
        let config = args.to_ledger_config()?;
        let mut output = std::io::stdout();
        cli::run(&args.command, &config, &mut output).await
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
