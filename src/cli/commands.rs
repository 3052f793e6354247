//! Command execution
//!
//! Every command runs against a freshly opened bank and ends with
//! [`Bank::shutdown`], so all mutations are persisted before the process exits.

use super::args::Command;
use crate::config::{CurrencyConfig, LedgerConfig};
use crate::core::{Bank, ImportConfirmation, TransferPolicy};
use crate::io::{
    encode_snapshot, read_snapshot_file, write_history_csv, write_snapshot_file, write_top_list_csv,
};
use crate::store::open_store;
use crate::types::{IdentityCodec, LedgerResult};
use std::io::Write;

/// Open the configured store, run one command and shut the bank down
///
/// # Arguments
///
/// * `command` - Parsed subcommand
/// * `config` - Resolved runtime configuration
/// * `output` - Writer for user-facing output (stdout in the binary)
///
/// # Returns
///
/// The first error of the command itself, otherwise the shutdown result.
pub async fn run(command: &Command, config: &LedgerConfig, output: &mut dyn Write) -> LedgerResult<()> {
    let store = open_store(&config.backend).await?;
    let bank = Bank::new(
        store,
        config.bank.clone(),
        IdentityCodec::new(config.identity_format),
    );

    let result = execute(&bank, command, &config.currency, output).await;
    let shutdown = bank.shutdown().await;
    result?;
    shutdown?;
    Ok(())
}

/// Run one command against an open bank
pub async fn execute(
    bank: &Bank,
    command: &Command,
    currency: &CurrencyConfig,
    output: &mut dyn Write,
) -> LedgerResult<()> {
    match command {
        Command::Balance { identity } => {
            let identity = bank.resolve(identity.as_str())?;
            let wallet = bank.get_wallet(&identity).await?;
            let nickname = bank.get_nickname(&identity).await?;
            writeln!(output, "{} owns {}", nickname, currency.format(wallet.balance()))?;
        }
        Command::Add {
            identity,
            amount,
            reason,
        } => {
            let identity = bank.resolve(identity.as_str())?;
            let wallet = bank.get_wallet(&identity).await?;
            wallet.add_balance(amount.clone(), reason)?;
            writeln!(
                output,
                "{} have been added to {}, new balance {}",
                currency.format(amount),
                identity,
                currency.format(wallet.balance())
            )?;
        }
        Command::Remove {
            identity,
            amount,
            reason,
        } => {
            let identity = bank.resolve(identity.as_str())?;
            let wallet = bank.get_wallet(&identity).await?;
            wallet.remove_balance(amount.clone(), reason)?;
            writeln!(
                output,
                "{} have been removed from {}, new balance {}",
                currency.format(amount),
                identity,
                currency.format(wallet.balance())
            )?;
        }
        Command::Set {
            identity,
            amount,
            reason,
        } => {
            let identity = bank.resolve(identity.as_str())?;
            bank.get_wallet(&identity)
                .await?
                .set_balance(amount.clone(), reason)?;
            writeln!(
                output,
                "Balance has been set to {} for {}",
                currency.format(amount),
                identity
            )?;
        }
        Command::Pay {
            from,
            to,
            amount,
            allow_negative,
        } => {
            let from = bank.resolve(from.as_str())?;
            let to = bank.resolve(to.as_str())?;
            let policy = TransferPolicy {
                allow_negative: *allow_negative,
            };
            let receipt = bank.transfer(&from, &to, amount.clone(), policy).await?;
            writeln!(
                output,
                "Sent {} from {} to {}, sender now owns {}",
                currency.format(&receipt.amount),
                receipt.from,
                receipt.to,
                currency.format(&receipt.sender_balance)
            )?;
        }
        Command::History { identity, limit } => {
            let identity = bank.resolve(identity.as_str())?;
            let history = bank.get_history(&identity, *limit).await?;
            write_history_csv(&history, output)?;
        }
        Command::Top { offset, limit } => {
            let rows = bank.get_top_list(*offset, *limit).await?;
            write_top_list_csv(&rows, *offset, output)?;
        }
        Command::Nick { identity, name } => {
            let identity = bank.resolve(identity.as_str())?;
            bank.update_nickname(&identity, name).await?;
            writeln!(output, "Nickname of {} set to {}", identity, name)?;
        }
        Command::Export {
            output: path,
            encoding,
        } => {
            let snapshot = bank.export_snapshot().await?;
            match path {
                Some(path) => {
                    write_snapshot_file(path, &snapshot, *encoding)?;
                    tracing::info!(path = %path.display(), "snapshot written");
                }
                None => writeln!(output, "{}", encode_snapshot(&snapshot, *encoding)?)?,
            }
        }
        Command::Import { input, confirm } => {
            let confirmation = ImportConfirmation::from_phrase(confirm)?;
            let snapshot = read_snapshot_file(input)?;
            bank.import_snapshot(&snapshot, confirmation).await?;
            writeln!(
                output,
                "Imported {} balances, {} history entries and {} nicknames",
                snapshot.balances.len(),
                snapshot.history_len(),
                snapshot.nicknames.len()
            )?;
        }
        Command::Reset { confirm } => {
            let confirmation = ImportConfirmation::from_phrase(confirm)?;
            bank.reset(confirmation).await?;
            writeln!(output, "Store has been reset")?;
        }
    }
    Ok(())
}
