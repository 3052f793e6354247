use crate::config::LedgerConfig;
use crate::io::SnapshotEncoding;
use crate::store::BackendConfig;
use crate::types::{Balance, IdentityFormat, LedgerResult};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const DEFAULT_SLED_PATH: &str = "ledger.sled";
const DEFAULT_SQLITE_URL: &str = "sqlite://ledger.db";

/// Manage wallets, balances and history of a ledger store
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "Manage wallets, balances and history of a ledger store", long_about = None)]
pub struct CliArgs {
    /// TOML configuration file
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Store backend, overrides the configuration file
    #[arg(long = "backend", value_name = "BACKEND", global = true)]
    pub backend: Option<BackendKind>,

    /// Database path (sled) or URL (sqlite)
    #[arg(long = "data", value_name = "PATH|URL", global = true)]
    pub data: Option<String>,

    /// Accepted identity shape
    #[arg(long = "identity-format", value_name = "FORMAT", global = true)]
    pub identity_format: Option<IdentityFormat>,

    /// Flush quiet period in milliseconds, 0 for write-through
    #[arg(long = "flush-interval-ms", value_name = "MS", global = true)]
    pub flush_interval_ms: Option<u64>,

    /// Log more (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available store backends
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Memory,
    Sled,
    Sqlite,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Show the balance of an identity
    Balance { identity: String },

    /// Credit an identity
    Add {
        identity: String,
        #[arg(allow_hyphen_values = true)]
        amount: Balance,
        #[arg(long, default_value = "Added via Admin Command")]
        reason: String,
    },

    /// Debit an identity
    Remove {
        identity: String,
        #[arg(allow_hyphen_values = true)]
        amount: Balance,
        #[arg(long, default_value = "Removed by Admin Command")]
        reason: String,
    },

    /// Replace the balance of an identity
    Set {
        identity: String,
        #[arg(allow_hyphen_values = true)]
        amount: Balance,
        #[arg(long, default_value = "Set via Admin Command")]
        reason: String,
    },

    /// Send funds from one identity to another
    Pay {
        from: String,
        to: String,
        #[arg(allow_hyphen_values = true)]
        amount: Balance,
        /// Let the sender go below zero
        #[arg(long)]
        allow_negative: bool,
    },

    /// Print the most recent history of an identity as CSV
    History {
        identity: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Print the richest identities as CSV
    Top {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Store a display name for an identity
    Nick { identity: String, name: String },

    /// Write a snapshot of the whole store
    Export {
        /// Output file, stdout when omitted
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = SnapshotEncoding::Json)]
        encoding: SnapshotEncoding,
    },

    /// Replace the store content with a snapshot file
    Import {
        input: PathBuf,
        /// Confirmation phrase
        #[arg(long)]
        confirm: String,
    },

    /// Delete all balances, history and nicknames
    Reset {
        /// Confirmation phrase
        #[arg(long)]
        confirm: String,
    },
}

impl CliArgs {
    /// Build the runtime configuration
    ///
    /// Starts from the configuration file (or defaults) and applies every flag
    /// that was given on the command line.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the configuration file cannot be read or parsed.
    pub fn to_ledger_config(&self) -> LedgerResult<LedgerConfig> {
        let mut config = match &self.config {
            Some(path) => LedgerConfig::load(path)?,
            None => LedgerConfig::default(),
        };

        let kind = self.backend.unwrap_or(match config.backend {
            BackendConfig::Memory => BackendKind::Memory,
            BackendConfig::Sled { .. } => BackendKind::Sled,
            BackendConfig::Sqlite { .. } => BackendKind::Sqlite,
        });
        config.backend = match (kind, &self.data, &config.backend) {
            (BackendKind::Memory, _, _) => BackendConfig::Memory,
            (BackendKind::Sled, Some(data), _) => BackendConfig::Sled { path: data.into() },
            (BackendKind::Sled, None, BackendConfig::Sled { path }) => BackendConfig::Sled { path: path.clone() },
            (BackendKind::Sled, None, _) => BackendConfig::Sled {
                path: DEFAULT_SLED_PATH.into(),
            },
            (BackendKind::Sqlite, Some(data), _) => BackendConfig::Sqlite { url: data.clone() },
            (BackendKind::Sqlite, None, BackendConfig::Sqlite { url }) => BackendConfig::Sqlite { url: url.clone() },
            (BackendKind::Sqlite, None, _) => BackendConfig::Sqlite {
                url: DEFAULT_SQLITE_URL.to_string(),
            },
        };

        if let Some(format) = self.identity_format {
            config.identity_format = format;
        }
        if let Some(interval) = self.flush_interval_ms {
            config.bank.flush_interval_ms = interval;
            config.bank = config.bank.sanitized();
        }
        Ok(config)
    }

    /// Default log filter for the verbosity flag
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
