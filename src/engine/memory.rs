//! In-process accounting engine.
//!
//! Keeps the engine's contract (linked chains, balance limits, two-phase
//! transfers, sparse per-index results) so the core can run without an
//! external cluster, in tests and in the replay binary.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{
    AMOUNT_MAX, Account, AccountFlags, AccountingEngine, CreateAccountResult,
    CreateTransferResult, EngineError, Indexed, Transfer, TransferFlags, TransferState,
};
use crate::id::EngineId;

#[derive(Default)]
pub struct MemoryEngine {
    books: Mutex<Books>,
    unavailable: AtomicBool,
    transfer_batches: Mutex<Vec<usize>>,
}

#[derive(Default)]
struct Books {
    accounts: HashMap<EngineId, Account>,
    transfers: HashMap<EngineId, Transfer>,
    states: HashMap<EngineId, TransferState>,
}

/// Inverse of one mutation, replayed when a linked chain fails.
enum Undo {
    Account(EngineId),
    Transfer(EngineId),
    Balance(Account),
    State(EngineId, Option<TransferState>),
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`EngineError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sizes of the `create_transfers` calls received so far.
    pub fn transfer_batches(&self) -> Vec<usize> {
        self.transfer_batches.lock().clone()
    }

    pub fn account(&self, id: EngineId) -> Option<Account> {
        self.books.lock().accounts.get(&id).cloned()
    }

    pub fn transfer(&self, id: EngineId) -> Option<Transfer> {
        self.books.lock().transfers.get(&id).cloned()
    }

    /// State of a pending transfer; `None` if it was never prepared.
    pub fn transfer_state(&self, id: EngineId) -> Option<TransferState> {
        self.books.lock().states.get(&id).copied()
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EngineError::Unavailable("memory engine switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountingEngine for MemoryEngine {
    async fn create_accounts(
        &self,
        accounts: &[Account],
    ) -> Result<Vec<Indexed<CreateAccountResult>>, EngineError> {
        self.check_available()?;
        let mut books = self.books.lock();
        let mut results = Vec::new();

        for (range, open) in chains(accounts, |a| a.flags.contains(AccountFlags::LINKED)) {
            let mut journal = Vec::new();
            let mut failure = None;
            for index in range.clone() {
                if open && index + 1 == range.end {
                    failure = Some((index, CreateAccountResult::LinkedEventChainOpen));
                    break;
                }
                if let Err(code) = books.create_account(&accounts[index], &mut journal) {
                    failure = Some((index, code));
                    break;
                }
            }
            if let Some((failed, code)) = failure {
                books.rollback(journal);
                results.extend(chain_failure(range, failed, code, CreateAccountResult::LinkedEventFailed));
            }
        }

        debug!(count = accounts.len(), failed = results.len(), "create_accounts");
        Ok(results)
    }

    async fn create_transfers(
        &self,
        transfers: &[Transfer],
    ) -> Result<Vec<Indexed<CreateTransferResult>>, EngineError> {
        self.check_available()?;
        self.transfer_batches.lock().push(transfers.len());
        let mut books = self.books.lock();
        let mut results = Vec::new();

        for (range, open) in chains(transfers, |t| t.flags.contains(TransferFlags::LINKED)) {
            let mut journal = Vec::new();
            let mut failure = None;
            for index in range.clone() {
                if open && index + 1 == range.end {
                    failure = Some((index, CreateTransferResult::LinkedEventChainOpen));
                    break;
                }
                if let Err(code) = books.create_transfer(&transfers[index], &mut journal) {
                    failure = Some((index, code));
                    break;
                }
            }
            if let Some((failed, code)) = failure {
                books.rollback(journal);
                results.extend(chain_failure(range, failed, code, CreateTransferResult::LinkedEventFailed));
            }
        }

        debug!(count = transfers.len(), failed = results.len(), "create_transfers");
        Ok(results)
    }

    async fn lookup_accounts(&self, ids: &[EngineId]) -> Result<Vec<Account>, EngineError> {
        self.check_available()?;
        let books = self.books.lock();
        Ok(ids
            .iter()
            .filter_map(|id| books.accounts.get(id).cloned())
            .collect())
    }
}

/// Split a batch into chains: runs of linked events closed by the first
/// unlinked one. The flag is true for a chain still open at the batch end.
fn chains<T>(events: &[T], linked: impl Fn(&T) -> bool) -> Vec<(Range<usize>, bool)> {
    let mut chains = Vec::new();
    let mut start = 0;
    for (index, event) in events.iter().enumerate() {
        if !linked(event) {
            chains.push((start..index + 1, false));
            start = index + 1;
        }
    }
    if start < events.len() {
        chains.push((start..events.len(), true));
    }
    chains
}

/// Results for a failed chain: the culprit keeps its code, every other
/// member reports `linked`.
fn chain_failure<R: Copy>(
    range: Range<usize>,
    failed: usize,
    code: R,
    linked: R,
) -> impl Iterator<Item = Indexed<R>> {
    range.map(move |index| Indexed {
        index,
        result: if index == failed { code } else { linked },
    })
}

impl Books {
    fn rollback(&mut self, journal: Vec<Undo>) {
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Account(id) => {
                    self.accounts.remove(&id);
                }
                Undo::Transfer(id) => {
                    self.transfers.remove(&id);
                }
                Undo::Balance(account) => {
                    self.accounts.insert(account.id, account);
                }
                Undo::State(id, Some(state)) => {
                    self.states.insert(id, state);
                }
                Undo::State(id, None) => {
                    self.states.remove(&id);
                }
            }
        }
    }

    fn create_account(
        &mut self,
        account: &Account,
        journal: &mut Vec<Undo>,
    ) -> Result<(), CreateAccountResult> {
        use CreateAccountResult::*;

        if account.id == 0 {
            return Err(IdMustNotBeZero);
        }
        if account.id == u128::MAX {
            return Err(IdMustNotBeIntMax);
        }
        if account.flags.contains(
            AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS | AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS,
        ) {
            return Err(FlagsAreMutuallyExclusive);
        }
        if account.ledger == 0 {
            return Err(LedgerMustNotBeZero);
        }
        if account.code == 0 {
            return Err(CodeMustNotBeZero);
        }
        if let Some(existing) = self.accounts.get(&account.id) {
            return Err(if existing.flags != account.flags {
                ExistsWithDifferentFlags
            } else if existing.ledger != account.ledger {
                ExistsWithDifferentLedger
            } else if existing.code != account.code {
                ExistsWithDifferentCode
            } else {
                Exists
            });
        }

        // totals always start at zero whatever the caller sent
        let stored = Account::new(account.id, account.ledger, account.code).with_flags(account.flags);
        self.accounts.insert(account.id, stored);
        journal.push(Undo::Account(account.id));
        Ok(())
    }

    fn create_transfer(
        &mut self,
        transfer: &Transfer,
        journal: &mut Vec<Undo>,
    ) -> Result<(), CreateTransferResult> {
        use CreateTransferResult::*;

        if transfer.id == 0 {
            return Err(IdMustNotBeZero);
        }
        if transfer.id == u128::MAX {
            return Err(IdMustNotBeIntMax);
        }

        let flags = transfer.flags;
        let phases = [
            TransferFlags::PENDING,
            TransferFlags::POST_PENDING_TRANSFER,
            TransferFlags::VOID_PENDING_TRANSFER,
        ]
        .into_iter()
        .filter(|f| flags.contains(*f))
        .count();
        if phases > 1 {
            return Err(FlagsAreMutuallyExclusive);
        }

        if let Some(existing) = self.transfers.get(&transfer.id) {
            return Err(compare_existing(existing, transfer));
        }

        if flags.contains(TransferFlags::POST_PENDING_TRANSFER) {
            return self.resolve_pending(transfer, TransferState::Posted, journal);
        }
        if flags.contains(TransferFlags::VOID_PENDING_TRANSFER) {
            return self.resolve_pending(transfer, TransferState::Voided, journal);
        }

        if transfer.debit_account_id == 0 {
            return Err(DebitAccountIdMustNotBeZero);
        }
        if transfer.credit_account_id == 0 {
            return Err(CreditAccountIdMustNotBeZero);
        }
        if transfer.debit_account_id == transfer.credit_account_id {
            return Err(AccountsMustBeDifferent);
        }
        if transfer.pending_id != 0 {
            return Err(PendingIdMustBeZero);
        }
        if transfer.amount == 0 {
            return Err(AmountMustNotBeZero);
        }
        if transfer.ledger == 0 {
            return Err(LedgerMustNotBeZero);
        }
        if transfer.code == 0 {
            return Err(CodeMustNotBeZero);
        }

        let debit = self
            .accounts
            .get(&transfer.debit_account_id)
            .ok_or(DebitAccountNotFound)?;
        let credit = self
            .accounts
            .get(&transfer.credit_account_id)
            .ok_or(CreditAccountNotFound)?;
        if debit.ledger != credit.ledger {
            return Err(AccountsMustHaveTheSameLedger);
        }
        if transfer.ledger != debit.ledger {
            return Err(TransferMustHaveTheSameLedgerAsAccounts);
        }
        if debit.exceeds_credits(transfer.amount) {
            return Err(ExceedsCredits);
        }
        if credit.exceeds_debits(transfer.amount) {
            return Err(ExceedsDebits);
        }

        let pending = flags.contains(TransferFlags::PENDING);
        let mut debit = debit.clone();
        let mut credit = credit.clone();
        journal.push(Undo::Balance(debit.clone()));
        journal.push(Undo::Balance(credit.clone()));
        debit.debit(transfer.amount, pending);
        credit.credit(transfer.amount, pending);
        self.accounts.insert(debit.id, debit);
        self.accounts.insert(credit.id, credit);

        if pending {
            journal.push(Undo::State(transfer.id, None));
            self.states.insert(transfer.id, TransferState::Pending);
        }
        journal.push(Undo::Transfer(transfer.id));
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    /// Post or void the pending transfer referenced by `transfer.pending_id`.
    fn resolve_pending(
        &mut self,
        transfer: &Transfer,
        to: TransferState,
        journal: &mut Vec<Undo>,
    ) -> Result<(), CreateTransferResult> {
        use CreateTransferResult::*;

        if transfer.pending_id == 0 {
            return Err(PendingIdMustNotBeZero);
        }
        if transfer.pending_id == transfer.id {
            return Err(PendingIdMustBeDifferent);
        }
        let pending = self
            .transfers
            .get(&transfer.pending_id)
            .ok_or(PendingTransferNotFound)?;
        if !pending.flags.contains(TransferFlags::PENDING) {
            return Err(PendingTransferNotPending);
        }
        if transfer.debit_account_id != 0 && transfer.debit_account_id != pending.debit_account_id {
            return Err(PendingTransferHasDifferentDebitAccountId);
        }
        if transfer.credit_account_id != 0 && transfer.credit_account_id != pending.credit_account_id {
            return Err(PendingTransferHasDifferentCreditAccountId);
        }
        if transfer.ledger != 0 && transfer.ledger != pending.ledger {
            return Err(PendingTransferHasDifferentLedger);
        }
        if transfer.code != 0 && transfer.code != pending.code {
            return Err(PendingTransferHasDifferentCode);
        }

        let state = self
            .states
            .get(&transfer.pending_id)
            .copied()
            .ok_or(PendingTransferNotPending)?;
        let next = state.transition(to)?;

        let posted_amount = match to {
            TransferState::Posted if transfer.amount == AMOUNT_MAX => pending.amount,
            TransferState::Posted if transfer.amount > pending.amount => {
                return Err(ExceedsPendingTransferAmount);
            }
            TransferState::Posted => transfer.amount,
            _ => 0,
        };

        let reserved = pending.amount;
        let (debit_id, credit_id) = (pending.debit_account_id, pending.credit_account_id);
        let mut debit = self.accounts.get(&debit_id).cloned().ok_or(DebitAccountNotFound)?;
        let mut credit = self.accounts.get(&credit_id).cloned().ok_or(CreditAccountNotFound)?;

        journal.push(Undo::Balance(debit.clone()));
        journal.push(Undo::Balance(credit.clone()));
        debit.release_debit(reserved);
        credit.release_credit(reserved);
        if posted_amount > 0 {
            debit.debit(posted_amount, false);
            credit.credit(posted_amount, false);
        }
        self.accounts.insert(debit_id, debit);
        self.accounts.insert(credit_id, credit);

        journal.push(Undo::State(transfer.pending_id, Some(state)));
        self.states.insert(transfer.pending_id, next);
        journal.push(Undo::Transfer(transfer.id));
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }
}

fn compare_existing(existing: &Transfer, transfer: &Transfer) -> CreateTransferResult {
    use CreateTransferResult::*;

    if existing.flags != transfer.flags {
        ExistsWithDifferentFlags
    } else if existing.pending_id != transfer.pending_id {
        ExistsWithDifferentPendingId
    } else if existing.debit_account_id != transfer.debit_account_id {
        ExistsWithDifferentDebitAccountId
    } else if existing.credit_account_id != transfer.credit_account_id {
        ExistsWithDifferentCreditAccountId
    } else if existing.amount != transfer.amount {
        ExistsWithDifferentAmount
    } else if existing.ledger != transfer.ledger {
        ExistsWithDifferentLedger
    } else if existing.code != transfer.code {
        ExistsWithDifferentCode
    } else {
        Exists
    }
}
