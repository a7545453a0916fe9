use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::amount::AmountError;
use crate::batcher::BatcherError;
use crate::engine::{CreateAccountResult, CreateTransferResult, EngineError};
use crate::model::{Currency, ParticipantId};
use crate::store::{ParticipantRejection, SpecWriteFailure, StoreError};

/// Malformed or incomplete input, caught before any external call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transfer id is missing")]
    MissingTransferId,

    #[error("transfer id {0:?} is not a UUID")]
    InvalidTransferId(String),

    #[error("payer is missing")]
    MissingPayer,

    #[error("payee is missing")]
    MissingPayee,

    #[error("amount is missing")]
    MissingAmount,

    #[error("invalid amount {amount:?}: {source}")]
    InvalidAmount {
        amount: String,
        #[source]
        source: AmountError,
    },

    #[error("amount must be positive")]
    ZeroAmount,

    #[error("payer and payee are both {0}")]
    SameParticipant(ParticipantId),

    #[error("transfer {0} appears more than once in the batch")]
    DuplicateInBatch(Uuid),

    #[error("currency {0} is not configured")]
    UnknownCurrency(Currency),

    #[error("batch mixes currencies {0} and {1}")]
    MixedCurrency(Currency, Currency),

    #[error("fulfilment is not hex encoded")]
    MalformedFulfilment,
}

/// Domain-level grouping of per-item failures, for callers that branch on
/// the kind of failure rather than its detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Validation,
    ParticipantNotFound,
    TransferNotFound,
    InsufficientLiquidity,
    Duplicate,
    InvalidState,
    LinkedFailure,
    Persistence,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::ParticipantNotFound => "participant_not_found",
            ErrorCategory::TransferNotFound => "transfer_not_found",
            ErrorCategory::InsufficientLiquidity => "insufficient_liquidity",
            ErrorCategory::Duplicate => "duplicate",
            ErrorCategory::InvalidState => "invalid_state",
            ErrorCategory::LinkedFailure => "linked_failure",
            ErrorCategory::Persistence => "persistence",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl From<CreateTransferResult> for ErrorCategory {
    fn from(result: CreateTransferResult) -> Self {
        use CreateTransferResult::*;

        match result {
            ExceedsCredits | ExceedsDebits => ErrorCategory::InsufficientLiquidity,
            ExistsWithDifferentFlags
            | ExistsWithDifferentDebitAccountId
            | ExistsWithDifferentCreditAccountId
            | ExistsWithDifferentAmount
            | ExistsWithDifferentPendingId
            | ExistsWithDifferentLedger
            | ExistsWithDifferentCode
            | Exists => ErrorCategory::Duplicate,
            PendingTransferNotFound => ErrorCategory::TransferNotFound,
            PendingTransferNotPending
            | PendingTransferAlreadyPosted
            | PendingTransferAlreadyVoided
            | ExceedsPendingTransferAmount => ErrorCategory::InvalidState,
            LinkedEventFailed | LinkedEventChainOpen => ErrorCategory::LinkedFailure,
            _ => ErrorCategory::Internal,
        }
    }
}

/// Typed failure of one item of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFailure {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Participant(#[from] ParticipantRejection),

    #[error("{0} has no accounts in {1}")]
    AccountsNotFound(ParticipantId, Currency),

    #[error("transfer {0} was never prepared")]
    TransferNotFound(Uuid),

    #[error("fulfilment does not match the condition of transfer {0}")]
    InvalidFulfilment(Uuid),

    #[error("transfer {0} was already recorded with different terms")]
    Conflict(Uuid),

    #[error("engine rejected record {index}: {result}")]
    Engine {
        index: usize,
        result: CreateTransferResult,
    },

    #[error("transfer metadata not saved: {0}")]
    Persistence(#[from] SpecWriteFailure),
}

impl TransferFailure {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TransferFailure::Validation(_) | TransferFailure::InvalidFulfilment(_) => {
                ErrorCategory::Validation
            }
            TransferFailure::Participant(_) | TransferFailure::AccountsNotFound(..) => {
                ErrorCategory::ParticipantNotFound
            }
            TransferFailure::TransferNotFound(_) => ErrorCategory::TransferNotFound,
            TransferFailure::Conflict(_) => ErrorCategory::Duplicate,
            TransferFailure::Engine { result, .. } => ErrorCategory::from(*result),
            TransferFailure::Persistence(_) => ErrorCategory::Persistence,
        }
    }
}

/// Call-level failure: nothing in the batch can be trusted to have a
/// meaningful per-item outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("batch rejected: {0}")]
    Validation(ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("batcher failed: {0}")]
    Batcher(BatcherError),

    #[error("engine rejected account {index} for {participant_id}/{currency}: {result}")]
    AccountsRejected {
        participant_id: ParticipantId,
        currency: Currency,
        index: usize,
        result: CreateAccountResult,
    },

    #[error("{participant_id} has no accounts in {currency}")]
    AccountsNotFound {
        participant_id: ParticipantId,
        currency: Currency,
    },

    #[error("inconsistent state: {0}")]
    Consistency(String),
}

impl From<ValidationError> for LedgerError {
    fn from(e: ValidationError) -> Self {
        LedgerError::Validation(e)
    }
}
