//! Wallet-to-wallet payments

use super::bank::Bank;
use crate::types::{Balance, IdentityKey, LedgerError, LedgerResult};

/// Caller-level rules for a transfer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferPolicy {
    /// Let the sender's balance go below zero
    pub allow_negative: bool,
}

/// Balances of both parties right after a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub from: IdentityKey,
    pub to: IdentityKey,
    pub amount: Balance,
    pub sender_balance: Balance,
    pub receiver_balance: Balance,
}

impl Bank {
    /// Move `amount` from one wallet to another
    ///
    /// The sender is debited with reason `Sent to <receiver>` and the receiver
    /// credited with `Received from <sender>`. Both wallets are queued for the
    /// next flush.
    ///
    /// # Errors
    ///
    /// * `NonPositiveAmount` - `amount` is zero or negative
    /// * `InsufficientFunds` - the sender cannot cover `amount` and the policy
    ///   does not allow negative balances; nothing is mutated
    /// * backend errors while loading either wallet
    pub async fn transfer(
        &self,
        from: &IdentityKey,
        to: &IdentityKey,
        amount: Balance,
        policy: TransferPolicy,
    ) -> LedgerResult<TransferReceipt> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount { amount });
        }

        let (sender, receiver) =
            futures::try_join!(self.get_wallet(from), self.get_wallet(to))?;

        let sent = format!("Sent to {}", to);
        if policy.allow_negative {
            sender.remove_balance(amount.clone(), &sent)?;
        } else {
            sender.withdraw(amount.clone(), &sent)?;
        }
        receiver.add_balance(amount.clone(), &format!("Received from {}", from))?;

        tracing::info!(%from, %to, %amount, "transfer completed");
        Ok(TransferReceipt {
            from: from.clone(),
            to: to.clone(),
            amount,
            sender_balance: sender.balance(),
            receiver_balance: receiver.balance(),
        })
    }
}
