//! Boundary to the double-entry accounting engine.
//!
//! The engine only knows balanced debit/credit transfers between numeric
//! accounts. Batched calls answer with a sparse list of `(index, result)`
//! pairs covering just the events that failed.

use std::ops::BitOr;

use async_trait::async_trait;

use crate::id::EngineId;

mod error;
pub use error::{CreateAccountResult, CreateTransferResult, EngineError};

mod memory;
pub use memory::MemoryEngine;

#[cfg(feature = "tigerbeetle")]
mod tigerbeetle;
#[cfg(feature = "tigerbeetle")]
pub use tigerbeetle::TigerBeetleEngine;

mod state;
pub use state::TransferState;

/// Posting a pending transfer with this amount posts its full amount.
pub const AMOUNT_MAX: u128 = u128::MAX;

/// A result tied to the position of the event in the submitted slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indexed<R> {
    pub index: usize,
    pub result: R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AccountFlags(u16);

impl AccountFlags {
    pub const NONE: AccountFlags = AccountFlags(0);
    /// Chain this event with the next one; all apply or none does.
    pub const LINKED: AccountFlags = AccountFlags(1 << 0);
    pub const DEBITS_MUST_NOT_EXCEED_CREDITS: AccountFlags = AccountFlags(1 << 1);
    pub const CREDITS_MUST_NOT_EXCEED_DEBITS: AccountFlags = AccountFlags(1 << 2);

    pub fn contains(self, other: AccountFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AccountFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        AccountFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct TransferFlags(u16);

impl TransferFlags {
    pub const NONE: TransferFlags = TransferFlags(0);
    /// Chain this event with the next one; all apply or none does.
    pub const LINKED: TransferFlags = TransferFlags(1 << 0);
    /// First phase: reserve the amount without posting it.
    pub const PENDING: TransferFlags = TransferFlags(1 << 1);
    /// Second phase: post the pending transfer named by `pending_id`.
    pub const POST_PENDING_TRANSFER: TransferFlags = TransferFlags(1 << 2);
    /// Second phase: release the pending transfer named by `pending_id`.
    pub const VOID_PENDING_TRANSFER: TransferFlags = TransferFlags(1 << 3);

    pub fn contains(self, other: TransferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: TransferFlags) -> TransferFlags {
        TransferFlags(self.0 & !other.0)
    }
}

impl BitOr for TransferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        TransferFlags(self.0 | rhs.0)
    }
}

/// Engine account with its four running totals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Account {
    pub id: EngineId,
    pub ledger: u32,
    pub code: u16,
    pub flags: AccountFlags,
    pub debits_pending: u128,
    pub debits_posted: u128,
    pub credits_pending: u128,
    pub credits_posted: u128,
}

impl Account {
    pub fn new(id: EngineId, ledger: u32, code: u16) -> Self {
        Self {
            id,
            ledger,
            code,
            ..Default::default()
        }
    }

    pub fn with_flags(mut self, flags: AccountFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Engine transfer. Post/void records may leave accounts, ledger and code
/// zero to inherit them from the pending transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transfer {
    pub id: EngineId,
    pub debit_account_id: EngineId,
    pub credit_account_id: EngineId,
    pub amount: u128,
    pub pending_id: EngineId,
    pub ledger: u32,
    pub code: u16,
    pub flags: TransferFlags,
}

impl Transfer {
    pub fn new(id: EngineId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_debit_account_id(mut self, id: EngineId) -> Self {
        self.debit_account_id = id;
        self
    }

    pub fn with_credit_account_id(mut self, id: EngineId) -> Self {
        self.credit_account_id = id;
        self
    }

    pub fn with_amount(mut self, amount: u128) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_pending_id(mut self, id: EngineId) -> Self {
        self.pending_id = id;
        self
    }

    pub fn with_ledger(mut self, ledger: u32) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    pub fn with_flags(mut self, flags: TransferFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// The engine primitives the core relies on.
#[async_trait]
pub trait AccountingEngine: Send + Sync {
    /// Create accounts; only failed events are reported.
    async fn create_accounts(
        &self,
        accounts: &[Account],
    ) -> Result<Vec<Indexed<CreateAccountResult>>, EngineError>;

    /// Create transfers; only failed events are reported.
    async fn create_transfers(
        &self,
        transfers: &[Transfer],
    ) -> Result<Vec<Indexed<CreateTransferResult>>, EngineError>;

    /// Look up accounts; ids that do not exist are omitted from the answer.
    async fn lookup_accounts(&self, ids: &[EngineId]) -> Result<Vec<Account>, EngineError>;
}
