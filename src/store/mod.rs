//! Spec store: the authoritative record of account-id sets, transfer
//! metadata, funding actions and net debit caps.
//!
//! [`MemorySpecStore`] is the durable layer; [`CachedSpecStore`] wraps any
//! [`SpecStore`] with the process-local caches and is what the ledger is
//! normally built with.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::CacheError;
use crate::model::{
    AccountSpec, Currency, FulfilmentAttachment, FundingSpec, NetDebitCapQuery, NetDebitCapSpec,
    Participant, ParticipantId, TransferSpec,
};

mod cached;
pub use cached::CachedSpecStore;

mod directory;
pub use directory::Directory;

mod memory;
pub use memory::MemorySpecStore;

/// Failure of a store call as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("spec store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt {table} row: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("spec cache rejected write: {0}")]
    Cache(#[from] CacheError),

    #[error("store answered {returned} results for {requested} items")]
    CountMismatch { requested: usize, returned: usize },
}

/// Successful outcome of one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecWrite {
    /// The row was inserted or the column updated.
    Written,
    /// Nothing to do: the row (or identical value) was already there.
    Unchanged,
}

/// Outcome of [`SpecStore::associate_accounts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Association {
    Associated,
    /// The pair already has an active set; nothing was written.
    AlreadyActive(AccountSpec),
}

/// Per-item failure of a batched write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecWriteFailure {
    #[error("transfer spec {0} not found")]
    NotFound(Uuid),

    #[error("transfer {0} already carries a different fulfilment")]
    FulfilmentConflict(Uuid),

    #[error("rolled back with the rest of the batch")]
    RolledBack,
}

pub type SpecWriteResult = Result<SpecWrite, SpecWriteFailure>;

/// Per-query failure of a bulk lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupFailure {
    #[error("no net debit cap recorded for {participant_id}/{currency}")]
    NetDebitCapNotFound {
        participant_id: ParticipantId,
        currency: Currency,
    },
}

/// First failed check of [`SpecStore::validate_transfer_participants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParticipantRejection {
    #[error("payer {0} not found")]
    PayerNotFound(ParticipantId),

    #[error("payee {0} not found")]
    PayeeNotFound(ParticipantId),

    #[error("payer {0} has no accounts in {1}")]
    PayerAccountsNotFound(ParticipantId, Currency),

    #[error("payee {0} has no accounts in {1}")]
    PayeeAccountsNotFound(ParticipantId, Currency),
}

/// Account sets of both sides of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferParties {
    pub payer: AccountSpec,
    pub payee: AccountSpec,
}

#[async_trait]
pub trait SpecStore: Send + Sync {
    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, StoreError>;

    async fn save_participant(&self, participant: Participant) -> Result<(), StoreError>;

    /// Newest non-tombstoned account set of the pair; `None` when absent.
    async fn get_account_spec(
        &self,
        participant_id: &str,
        currency: &str,
    ) -> Result<Option<AccountSpec>, StoreError>;

    /// Every active account set, ordered by participant then currency.
    async fn account_specs(&self) -> Result<Vec<AccountSpec>, StoreError>;

    /// Record a new active account set for the spec's pair. A pair holds at
    /// most one active set: the current one must be tombstoned first.
    async fn associate_accounts(&self, spec: AccountSpec) -> Result<Association, StoreError>;

    /// Tombstone the rows matching the pair and every account id; returns
    /// how many rows changed.
    async fn tombstone_accounts(&self, spec: &AccountSpec) -> Result<usize, StoreError>;

    /// One slot per id, in request order.
    async fn lookup_transfer_spec(&self, ids: &[Uuid])
    -> Result<Vec<Option<TransferSpec>>, StoreError>;

    /// Insert, ignoring ids that already exist.
    async fn save_transfer_spec(
        &self,
        specs: &[TransferSpec],
    ) -> Result<Vec<SpecWriteResult>, StoreError>;

    /// Set the fulfilment column of existing specs, all or nothing.
    async fn attach_transfer_spec_fulfilment(
        &self,
        attachments: &[FulfilmentAttachment],
    ) -> Result<Vec<SpecWriteResult>, StoreError>;

    /// Insert, ignoring a transfer id that already exists.
    async fn save_funding_spec(&self, spec: FundingSpec) -> Result<SpecWrite, StoreError>;

    async fn get_funding_spec(&self, transfer_id: Uuid) -> Result<Option<FundingSpec>, StoreError>;

    /// Last write wins; no history is kept.
    async fn upsert_net_debit_cap(&self, spec: NetDebitCapSpec) -> Result<(), StoreError>;

    /// A missing record is a failure, never a default.
    async fn get_net_debit_caps(
        &self,
        queries: &[NetDebitCapQuery],
    ) -> Result<Vec<Result<NetDebitCapSpec, LookupFailure>>, StoreError>;

    /// Check payer, payee, payer accounts, payee accounts in that order and
    /// stop at the first failure.
    async fn validate_transfer_participants(
        &self,
        payer_id: &str,
        payee_id: &str,
        currency: &str,
    ) -> Result<Result<TransferParties, ParticipantRejection>, StoreError> {
        Directory::new(self, currency)
            .parties(payer_id, payee_id)
            .await
    }
}
