use std::collections::HashMap;

use super::{ParticipantRejection, SpecStore, StoreError, TransferParties};
use crate::model::{AccountSpec, Currency, ParticipantId};

/// Participant and account lookups of one currency, memoised so the items of
/// a batch share them.
pub struct Directory<'a, S: SpecStore + ?Sized> {
    store: &'a S,
    currency: Currency,
    participants: HashMap<ParticipantId, bool>,
    accounts: HashMap<ParticipantId, Option<AccountSpec>>,
}

impl<'a, S: SpecStore + ?Sized> Directory<'a, S> {
    pub fn new(store: &'a S, currency: &str) -> Self {
        Self {
            store,
            currency: currency.to_string(),
            participants: HashMap::new(),
            accounts: HashMap::new(),
        }
    }

    pub async fn is_active(&mut self, participant_id: &str) -> Result<bool, StoreError> {
        if let Some(active) = self.participants.get(participant_id) {
            return Ok(*active);
        }
        let active = self
            .store
            .get_participant(participant_id)
            .await?
            .is_some_and(|p| p.is_active);
        self.participants.insert(participant_id.to_string(), active);
        Ok(active)
    }

    pub async fn accounts(
        &mut self,
        participant_id: &str,
    ) -> Result<Option<AccountSpec>, StoreError> {
        if let Some(spec) = self.accounts.get(participant_id) {
            return Ok(spec.clone());
        }
        let spec = self
            .store
            .get_account_spec(participant_id, &self.currency)
            .await?;
        self.accounts
            .insert(participant_id.to_string(), spec.clone());
        Ok(spec)
    }

    /// Check payer, payee, payer accounts, payee accounts in that order and
    /// stop at the first failure.
    pub async fn parties(
        &mut self,
        payer_id: &str,
        payee_id: &str,
    ) -> Result<Result<TransferParties, ParticipantRejection>, StoreError> {
        if !self.is_active(payer_id).await? {
            return Ok(Err(ParticipantRejection::PayerNotFound(payer_id.into())));
        }
        if !self.is_active(payee_id).await? {
            return Ok(Err(ParticipantRejection::PayeeNotFound(payee_id.into())));
        }
        let Some(payer) = self.accounts(payer_id).await? else {
            return Ok(Err(ParticipantRejection::PayerAccountsNotFound(
                payer_id.into(),
                self.currency.clone(),
            )));
        };
        let Some(payee) = self.accounts(payee_id).await? else {
            return Ok(Err(ParticipantRejection::PayeeAccountsNotFound(
                payee_id.into(),
                self.currency.clone(),
            )));
        };
        Ok(Ok(TransferParties { payer, payee }))
    }
}
