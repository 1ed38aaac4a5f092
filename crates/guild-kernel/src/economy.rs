//! Economy collaborator: the ledger that pays for guild creation and feeds
//! guild banks. Calls are synchronous and only valid on the global authority.

use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use crate::affinity::assert_owning_thread;
use crate::error::GuildError;
use crate::guild::Money;
use crate::ids::ActorId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EconomyError {
    #[error("insufficient funds: need {needed}, have {available}")]
    Insufficient { needed: Money, available: Money },

    #[error("no account for {0}")]
    NoAccount(ActorId),

    #[error("balance overflow")]
    Overflow,
}

impl From<EconomyError> for GuildError {
    fn from(e: EconomyError) -> Self {
        match e {
            EconomyError::Insufficient { needed, available } => {
                GuildError::InsufficientFunds { needed, available }
            }
            EconomyError::NoAccount(_) => GuildError::InsufficientFunds {
                needed: Money::ZERO,
                available: Money::ZERO,
            },
            EconomyError::Overflow => GuildError::internal("economy balance overflow"),
        }
    }
}

pub trait Economy: Send + Sync {
    fn balance(&self, actor: ActorId) -> Money;
    /// Returns the new balance.
    fn withdraw(&self, actor: ActorId, amount: Money) -> Result<Money, EconomyError>;
    /// Returns the new balance.
    fn deposit(&self, actor: ActorId, amount: Money) -> Result<Money, EconomyError>;
    fn format(&self, amount: Money) -> String;
}

/// Ledger held in memory, one account per actor.
#[derive(Debug, Default)]
pub struct MemoryEconomy {
    accounts: DashMap<ActorId, Money>,
    currency: String,
}

impl MemoryEconomy {
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            accounts: DashMap::new(),
            currency: currency.into(),
        }
    }

    /// Seed an account. Setup only; does not require the owning thread.
    pub fn open_account(&self, actor: ActorId, opening: Money) {
        self.accounts.insert(actor, opening);
    }

    /// Balance read for reporting, without the owner check.
    pub fn peek(&self, actor: ActorId) -> Money {
        self.accounts.get(&actor).map(|b| *b).unwrap_or(Money::ZERO)
    }
}

impl Economy for MemoryEconomy {
    fn balance(&self, actor: ActorId) -> Money {
        assert_owning_thread("economy.balance");
        self.peek(actor)
    }

    fn withdraw(&self, actor: ActorId, amount: Money) -> Result<Money, EconomyError> {
        assert_owning_thread("economy.withdraw");
        let mut balance = self
            .accounts
            .get_mut(&actor)
            .ok_or(EconomyError::NoAccount(actor))?;
        let remaining = balance.checked_sub(amount).ok_or(EconomyError::Insufficient {
            needed: amount,
            available: *balance,
        })?;
        *balance = remaining;
        debug!(actor = %actor, amount = %amount, remaining = %remaining, "Withdrew from account");
        Ok(remaining)
    }

    fn deposit(&self, actor: ActorId, amount: Money) -> Result<Money, EconomyError> {
        assert_owning_thread("economy.deposit");
        let mut balance = self.accounts.entry(actor).or_insert(Money::ZERO);
        let updated = balance.checked_add(amount).ok_or(EconomyError::Overflow)?;
        *balance = updated;
        debug!(actor = %actor, amount = %amount, balance = %updated, "Deposited to account");
        Ok(updated)
    }

    fn format(&self, amount: Money) -> String {
        if self.currency.is_empty() {
            amount.to_string()
        } else {
            format!("{} {}", amount, self.currency)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::{enter, OwnerLabel};

    #[test]
    fn test_withdraw_and_deposit() {
        let economy = MemoryEconomy::new("coins");
        let actor = ActorId::named("alice");
        economy.open_account(actor, Money(1_000));

        let _scope = enter(OwnerLabel::Global);
        assert_eq!(economy.withdraw(actor, Money(400)), Ok(Money(600)));
        assert_eq!(
            economy.withdraw(actor, Money(700)),
            Err(EconomyError::Insufficient {
                needed: Money(700),
                available: Money(600)
            })
        );
        assert_eq!(economy.deposit(actor, Money(50)), Ok(Money(650)));
        assert_eq!(economy.balance(actor), Money(650));
    }

    #[test]
    fn test_format_includes_currency() {
        let economy = MemoryEconomy::new("coins");
        assert_eq!(economy.format(Money(1_250)), "12.50 coins");
    }

    #[test]
    fn test_missing_account_maps_to_insufficient_funds() {
        let err: GuildError = EconomyError::NoAccount(ActorId::named("nobody")).into();
        assert_eq!(err.code(), "error.insufficient_funds");
    }
}
