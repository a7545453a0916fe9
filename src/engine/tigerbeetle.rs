//! Accounting engine backed by a TigerBeetle cluster.
//!
//! Records and flags are translated one to one; the cluster answers with the
//! same sparse `(index, result)` pairs the rest of the crate expects.

use async_trait::async_trait;
use tigerbeetle_unofficial as tb;
use tigerbeetle_unofficial::error::{
    CreateAccountErrorKind, CreateAccountsError, CreateTransferErrorKind, CreateTransfersError,
};
use tracing::{debug, error};

use super::{
    Account, AccountFlags, AccountingEngine, CreateAccountResult, CreateTransferResult,
    EngineError, Indexed, Transfer, TransferFlags,
};
use crate::id::EngineId;

pub struct TigerBeetleEngine {
    client: tb::Client,
}

impl TigerBeetleEngine {
    /// Connect to the cluster; `addresses` is a comma-separated replica list.
    pub fn connect(cluster_id: u128, addresses: &str) -> Result<Self, EngineError> {
        let client = tb::Client::new(cluster_id, addresses)
            .map_err(|e| EngineError::Unavailable(format!("cannot create client: {e}")))?;
        debug!(cluster_id, addresses, "tigerbeetle client created");
        Ok(Self { client })
    }
}

#[async_trait]
impl AccountingEngine for TigerBeetleEngine {
    async fn create_accounts(
        &self,
        accounts: &[Account],
    ) -> Result<Vec<Indexed<CreateAccountResult>>, EngineError> {
        let records: Vec<tb::Account> = accounts.iter().map(to_tb_account).collect();
        match self.client.create_accounts(records).await {
            Ok(()) => Ok(Vec::new()),
            Err(CreateAccountsError::Api(api)) => api
                .as_slice()
                .iter()
                .map(|failure| {
                    let index = failure.index() as usize;
                    account_result(failure.kind())
                        .map(|result| Indexed { index, result })
                        .ok_or_else(|| unhandled(index, failure.inner().code().get()))
                })
                .collect(),
            Err(CreateAccountsError::Send(e)) => Err(EngineError::Unavailable(e.to_string())),
            Err(e) => Err(EngineError::Unavailable(e.to_string())),
        }
    }

    async fn create_transfers(
        &self,
        transfers: &[Transfer],
    ) -> Result<Vec<Indexed<CreateTransferResult>>, EngineError> {
        let records: Vec<tb::Transfer> = transfers.iter().map(to_tb_transfer).collect();
        match self.client.create_transfers(records).await {
            Ok(()) => Ok(Vec::new()),
            Err(CreateTransfersError::Api(api)) => api
                .as_slice()
                .iter()
                .map(|failure| {
                    let index = failure.index() as usize;
                    transfer_result(failure.kind())
                        .map(|result| Indexed { index, result })
                        .ok_or_else(|| unhandled(index, failure.inner().code().get()))
                })
                .collect(),
            Err(CreateTransfersError::Send(e)) => Err(EngineError::Unavailable(e.to_string())),
            Err(e) => Err(EngineError::Unavailable(e.to_string())),
        }
    }

    async fn lookup_accounts(&self, ids: &[EngineId]) -> Result<Vec<Account>, EngineError> {
        let found = self
            .client
            .lookup_accounts(ids.to_vec())
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(found.iter().map(from_tb_account).collect())
    }
}

fn unhandled(index: usize, code: u32) -> EngineError {
    error!(index, code, "engine answered with a result code outside the ledger's contract");
    EngineError::UnhandledResult { index, code }
}

fn to_tb_account(account: &Account) -> tb::Account {
    let mut flags = tb::account::Flags::empty();
    flags.set(tb::account::Flags::LINKED, account.flags.contains(AccountFlags::LINKED));
    flags.set(
        tb::account::Flags::DEBITS_MUST_NOT_EXCEED_CREDITS,
        account.flags.contains(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS),
    );
    flags.set(
        tb::account::Flags::CREDITS_MUST_NOT_EXCEED_DEBITS,
        account.flags.contains(AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS),
    );
    tb::Account::new(account.id, account.ledger, account.code).with_flags(flags)
}

fn from_tb_account(account: &tb::Account) -> Account {
    let tb_flags = account.flags();
    let mut flags = AccountFlags::NONE;
    for (tb_flag, flag) in [
        (tb::account::Flags::LINKED, AccountFlags::LINKED),
        (
            tb::account::Flags::DEBITS_MUST_NOT_EXCEED_CREDITS,
            AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS,
        ),
        (
            tb::account::Flags::CREDITS_MUST_NOT_EXCEED_DEBITS,
            AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS,
        ),
    ] {
        if tb_flags.contains(tb_flag) {
            flags = flags | flag;
        }
    }

    Account {
        id: account.id(),
        ledger: account.ledger(),
        code: account.code(),
        flags,
        debits_pending: account.debits_pending(),
        debits_posted: account.debits_posted(),
        credits_pending: account.credits_pending(),
        credits_posted: account.credits_posted(),
    }
}

fn to_tb_transfer(transfer: &Transfer) -> tb::Transfer {
    let mut flags = tb::transfer::Flags::empty();
    for (flag, tb_flag) in [
        (TransferFlags::LINKED, tb::transfer::Flags::LINKED),
        (TransferFlags::PENDING, tb::transfer::Flags::PENDING),
        (
            TransferFlags::POST_PENDING_TRANSFER,
            tb::transfer::Flags::POST_PENDING_TRANSFER,
        ),
        (
            TransferFlags::VOID_PENDING_TRANSFER,
            tb::transfer::Flags::VOID_PENDING_TRANSFER,
        ),
    ] {
        flags.set(tb_flag, transfer.flags.contains(flag));
    }

    tb::Transfer::new(transfer.id)
        .with_debit_account_id(transfer.debit_account_id)
        .with_credit_account_id(transfer.credit_account_id)
        .with_amount(transfer.amount)
        .with_pending_id(transfer.pending_id)
        .with_ledger(transfer.ledger)
        .with_code(transfer.code)
        .with_flags(flags)
}

fn account_result(kind: CreateAccountErrorKind) -> Option<CreateAccountResult> {
    use CreateAccountErrorKind as K;

    Some(match kind {
        K::LinkedEventFailed => CreateAccountResult::LinkedEventFailed,
        K::LinkedEventChainOpen => CreateAccountResult::LinkedEventChainOpen,
        K::IdMustNotBeZero => CreateAccountResult::IdMustNotBeZero,
        K::IdMustNotBeIntMax => CreateAccountResult::IdMustNotBeIntMax,
        K::FlagsAreMutuallyExclusive => CreateAccountResult::FlagsAreMutuallyExclusive,
        K::LedgerMustNotBeZero => CreateAccountResult::LedgerMustNotBeZero,
        K::CodeMustNotBeZero => CreateAccountResult::CodeMustNotBeZero,
        K::ExistsWithDifferentFlags => CreateAccountResult::ExistsWithDifferentFlags,
        K::ExistsWithDifferentLedger => CreateAccountResult::ExistsWithDifferentLedger,
        K::ExistsWithDifferentCode => CreateAccountResult::ExistsWithDifferentCode,
        K::Exists => CreateAccountResult::Exists,
        _ => return None,
    })
}

fn transfer_result(kind: CreateTransferErrorKind) -> Option<CreateTransferResult> {
    use CreateTransferErrorKind as K;
    use CreateTransferResult as R;

    Some(match kind {
        K::LinkedEventFailed => R::LinkedEventFailed,
        K::LinkedEventChainOpen => R::LinkedEventChainOpen,
        K::IdMustNotBeZero => R::IdMustNotBeZero,
        K::IdMustNotBeIntMax => R::IdMustNotBeIntMax,
        K::FlagsAreMutuallyExclusive => R::FlagsAreMutuallyExclusive,
        K::DebitAccountIdMustNotBeZero => R::DebitAccountIdMustNotBeZero,
        K::CreditAccountIdMustNotBeZero => R::CreditAccountIdMustNotBeZero,
        K::AccountsMustBeDifferent => R::AccountsMustBeDifferent,
        K::PendingIdMustBeZero => R::PendingIdMustBeZero,
        K::PendingIdMustNotBeZero => R::PendingIdMustNotBeZero,
        K::PendingIdMustBeDifferent => R::PendingIdMustBeDifferent,
        K::LedgerMustNotBeZero => R::LedgerMustNotBeZero,
        K::CodeMustNotBeZero => R::CodeMustNotBeZero,
        K::DebitAccountNotFound => R::DebitAccountNotFound,
        K::CreditAccountNotFound => R::CreditAccountNotFound,
        K::AccountsMustHaveTheSameLedger => R::AccountsMustHaveTheSameLedger,
        K::TransferMustHaveTheSameLedgerAsAccounts => R::TransferMustHaveTheSameLedgerAsAccounts,
        K::PendingTransferNotFound => R::PendingTransferNotFound,
        K::PendingTransferNotPending => R::PendingTransferNotPending,
        K::PendingTransferHasDifferentDebitAccountId => {
            R::PendingTransferHasDifferentDebitAccountId
        }
        K::PendingTransferHasDifferentCreditAccountId => {
            R::PendingTransferHasDifferentCreditAccountId
        }
        K::PendingTransferHasDifferentLedger => R::PendingTransferHasDifferentLedger,
        K::PendingTransferHasDifferentCode => R::PendingTransferHasDifferentCode,
        K::ExceedsPendingTransferAmount => R::ExceedsPendingTransferAmount,
        K::PendingTransferAlreadyPosted => R::PendingTransferAlreadyPosted,
        K::PendingTransferAlreadyVoided => R::PendingTransferAlreadyVoided,
        K::ExistsWithDifferentFlags => R::ExistsWithDifferentFlags,
        K::ExistsWithDifferentDebitAccountId => R::ExistsWithDifferentDebitAccountId,
        K::ExistsWithDifferentCreditAccountId => R::ExistsWithDifferentCreditAccountId,
        K::ExistsWithDifferentAmount => R::ExistsWithDifferentAmount,
        K::ExistsWithDifferentPendingId => R::ExistsWithDifferentPendingId,
        K::ExistsWithDifferentLedger => R::ExistsWithDifferentLedger,
        K::ExistsWithDifferentCode => R::ExistsWithDifferentCode,
        K::Exists => R::Exists,
        K::ExceedsCredits => R::ExceedsCredits,
        K::ExceedsDebits => R::ExceedsDebits,
        _ => return None,
    })
}
