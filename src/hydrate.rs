//! Domain view of raw engine balances.
//!
//! Everything stays in `u128` minor units; posted and pending positions are
//! reported side by side and never merged.

use std::cmp::Ordering;

use crate::amount::{Amount, ScaledAmount};
use crate::engine::Account;
use crate::id::EngineId;
use crate::model::{AccountSpec, Bucket, Currency, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Debits exceed credits.
    Debit,
    /// Credits exceed debits.
    Credit,
    Balanced,
}

/// Magnitude and side of `credits - debits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetPosition {
    pub amount: u128,
    pub direction: Direction,
}

impl NetPosition {
    pub fn of(debits: u128, credits: u128) -> Self {
        match credits.cmp(&debits) {
            Ordering::Greater => Self {
                amount: credits - debits,
                direction: Direction::Credit,
            },
            Ordering::Less => Self {
                amount: debits - credits,
                direction: Direction::Debit,
            },
            Ordering::Equal => Self {
                amount: 0,
                direction: Direction::Balanced,
            },
        }
    }

    /// Signed decimal, credit-heavy positions positive.
    pub fn display(self, scale: u8) -> ScaledAmount {
        let amount = Amount::from_minor(self.amount);
        match self.direction {
            Direction::Debit => amount.display_negative(scale),
            Direction::Credit | Direction::Balanced => amount.display(scale),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountBalance {
    pub id: EngineId,
    pub posted: NetPosition,
    pub pending: NetPosition,
}

pub fn hydrate(account: &Account) -> AccountBalance {
    AccountBalance {
        id: account.id,
        posted: NetPosition::of(account.debits_posted, account.credits_posted),
        pending: NetPosition::of(account.debits_pending, account.credits_pending),
    }
}

/// Hydrated balances of every bucket of one account set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantBalances {
    pub participant_id: ParticipantId,
    pub currency: Currency,
    pub collateral: AccountBalance,
    pub reserve: AccountBalance,
    pub clearing: AccountBalance,
    pub settlement: AccountBalance,
}

impl ParticipantBalances {
    /// `accounts` must hold the spec's four accounts, in any order.
    pub(crate) fn from_accounts(spec: &AccountSpec, accounts: &[Account]) -> Option<Self> {
        let find = |bucket: Bucket| {
            let id = spec.account_id(bucket);
            accounts.iter().find(|a| a.id == id).map(hydrate)
        };
        Some(Self {
            participant_id: spec.participant_id.clone(),
            currency: spec.currency.clone(),
            collateral: find(Bucket::Collateral)?,
            reserve: find(Bucket::Reserve)?,
            clearing: find(Bucket::Clearing)?,
            settlement: find(Bucket::Settlement)?,
        })
    }

    pub fn bucket(&self, bucket: Bucket) -> &AccountBalance {
        match bucket {
            Bucket::Collateral => &self.collateral,
            Bucket::Reserve => &self.reserve,
            Bucket::Clearing => &self.clearing,
            Bucket::Settlement => &self.settlement,
        }
    }
}
