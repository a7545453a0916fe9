use super::{Account, AccountFlags, CreateTransferResult};

/// Two-phase lifecycle of a pending transfer.
///
/// A transfer without a state has never been prepared; there is no way from
/// there straight to `Posted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Amount reserved on both accounts, not yet final.
    Pending,
    /// Reservation committed.
    Posted,
    /// Reservation released.
    Voided,
}

impl TransferState {
    /// Move a pending transfer to `to`; finalised transfers never move again.
    pub fn transition(self, to: TransferState) -> Result<TransferState, CreateTransferResult> {
        match (self, to) {
            (TransferState::Pending, TransferState::Posted | TransferState::Voided) => Ok(to),
            (TransferState::Posted, _) => Err(CreateTransferResult::PendingTransferAlreadyPosted),
            (TransferState::Voided, _) => Err(CreateTransferResult::PendingTransferAlreadyVoided),
            (TransferState::Pending, TransferState::Pending) => {
                Err(CreateTransferResult::PendingTransferNotPending)
            }
        }
    }
}

impl Account {
    /// Would debiting `amount` more break `DEBITS_MUST_NOT_EXCEED_CREDITS`?
    pub(super) fn exceeds_credits(&self, amount: u128) -> bool {
        if !self.flags.contains(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS) {
            return false;
        }
        self.debits_pending
            .checked_add(self.debits_posted)
            .and_then(|v| v.checked_add(amount))
            .is_none_or(|debits| debits > self.credits_posted)
    }

    /// Would crediting `amount` more break `CREDITS_MUST_NOT_EXCEED_DEBITS`?
    pub(super) fn exceeds_debits(&self, amount: u128) -> bool {
        if !self.flags.contains(AccountFlags::CREDITS_MUST_NOT_EXCEED_DEBITS) {
            return false;
        }
        self.credits_pending
            .checked_add(self.credits_posted)
            .and_then(|v| v.checked_add(amount))
            .is_none_or(|credits| credits > self.debits_posted)
    }

    pub(super) fn debit(&mut self, amount: u128, pending: bool) {
        if pending {
            self.debits_pending = self.debits_pending.saturating_add(amount);
        } else {
            self.debits_posted = self.debits_posted.saturating_add(amount);
        }
    }

    pub(super) fn credit(&mut self, amount: u128, pending: bool) {
        if pending {
            self.credits_pending = self.credits_pending.saturating_add(amount);
        } else {
            self.credits_posted = self.credits_posted.saturating_add(amount);
        }
    }

    /// Drop a reservation made by a pending debit.
    pub(super) fn release_debit(&mut self, amount: u128) {
        self.debits_pending = self.debits_pending.saturating_sub(amount);
    }

    /// Drop a reservation made by a pending credit.
    pub(super) fn release_credit(&mut self, amount: u128) {
        self.credits_pending = self.credits_pending.saturating_sub(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_moves_to_either_final_state() {
        assert_eq!(
            TransferState::Pending.transition(TransferState::Posted),
            Ok(TransferState::Posted)
        );
        assert_eq!(
            TransferState::Pending.transition(TransferState::Voided),
            Ok(TransferState::Voided)
        );
    }

    #[test]
    fn final_states_are_terminal() {
        assert_eq!(
            TransferState::Posted.transition(TransferState::Voided),
            Err(CreateTransferResult::PendingTransferAlreadyPosted)
        );
        assert_eq!(
            TransferState::Voided.transition(TransferState::Posted),
            Err(CreateTransferResult::PendingTransferAlreadyVoided)
        );
    }

    #[test]
    fn limit_flags_count_pending_debits() {
        let mut account = Account::new(1, 840, 30).with_flags(AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS);
        account.credit(100, false);
        account.debit(60, true);

        assert!(!account.exceeds_credits(40));
        assert!(account.exceeds_credits(41));

        account.release_debit(60);
        assert!(!account.exceeds_credits(100));
    }

    #[test]
    fn unflagged_account_has_no_limit() {
        let account = Account::new(1, 840, 10);
        assert!(!account.exceeds_credits(u128::MAX));
        assert!(!account.exceeds_debits(u128::MAX));
    }
}
