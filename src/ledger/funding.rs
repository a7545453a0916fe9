use tracing::{info, warn};

use super::{Ledger, LedgerError, TransferFailure, ValidationError};
use crate::amount::Amount;
use crate::batcher::BatcherError;
use crate::config::CurrencyConfig;
use crate::engine::{CreateTransferResult, Transfer};
use crate::id::to_engine_id;
use crate::model::{FundingRequest, FundingSpec};
use crate::store::SpecWrite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingOutcome {
    Applied,
    /// The transfer id was used before; nothing moved this time.
    AlreadyApplied,
}

impl Ledger {
    /// Move funds between two buckets of one participant.
    ///
    /// The caller's transfer id becomes the engine transfer id, so redelivered
    /// requests are answered with [`FundingOutcome::AlreadyApplied`].
    pub async fn fund(
        &self,
        request: FundingRequest,
    ) -> Result<Result<FundingOutcome, TransferFailure>, LedgerError> {
        let result = self.apply_funding(&request).await;
        match &result {
            Ok(Ok(outcome)) => {
                info!(
                    participant = %request.participant_id,
                    transfer_id = %request.transfer_id,
                    amount = %request.amount,
                    outcome = ?outcome,
                    "{} applied",
                    request.action
                );
            }
            Ok(Err(e)) => {
                warn!(
                    participant = %request.participant_id,
                    transfer_id = %request.transfer_id,
                    amount = %request.amount,
                    reason = %e,
                    "{} rejected",
                    request.action
                );
            }
            Err(_) => {}
        }
        result
    }

    async fn apply_funding(
        &self,
        request: &FundingRequest,
    ) -> Result<Result<FundingOutcome, TransferFailure>, LedgerError> {
        let (currency_config, amount) = match self.validate_funding(request) {
            Ok(valid) => valid,
            Err(e) => return Ok(Err(e.into())),
        };

        if let Some(stored) = self.store.get_funding_spec(request.transfer_id).await? {
            if !same_funding(&stored, request, amount, currency_config.scale) {
                return Ok(Err(TransferFailure::Conflict(request.transfer_id)));
            }
            return Ok(Ok(FundingOutcome::AlreadyApplied));
        }

        let Some(spec) = self
            .store
            .get_account_spec(&request.participant_id, &request.currency)
            .await?
        else {
            return Ok(Err(TransferFailure::AccountsNotFound(
                request.participant_id.clone(),
                request.currency.clone(),
            )));
        };

        let (debit, credit) = request.action.legs();
        let transfer = Transfer::new(to_engine_id(&request.transfer_id))
            .with_debit_account_id(spec.account_id(debit))
            .with_credit_account_id(spec.account_id(credit))
            .with_amount(amount.minor())
            .with_ledger(currency_config.ledger)
            .with_code(request.action.code());

        let replayed = match self.batcher.submit(transfer).await {
            Ok(()) => false,
            Err(BatcherError::Rejected {
                result: CreateTransferResult::Exists,
                ..
            }) => true,
            Err(BatcherError::Rejected { index, result }) => {
                return Ok(Err(TransferFailure::Engine { index, result }));
            }
            Err(e) => return Err(LedgerError::Batcher(e)),
        };

        let write = self
            .store
            .save_funding_spec(FundingSpec {
                transfer_id: request.transfer_id,
                participant_id: request.participant_id.clone(),
                currency: request.currency.clone(),
                action: request.action,
                amount: request.amount.clone(),
                reason: request.reason.clone(),
            })
            .await?;

        Ok(Ok(match (replayed, write) {
            (false, SpecWrite::Written) => FundingOutcome::Applied,
            _ => FundingOutcome::AlreadyApplied,
        }))
    }

    fn validate_funding(
        &self,
        request: &FundingRequest,
    ) -> Result<(CurrencyConfig, Amount), ValidationError> {
        let currency_config = self.currency(&request.currency)?;
        let amount = Amount::parse(&request.amount, currency_config.scale).map_err(|source| {
            ValidationError::InvalidAmount {
                amount: request.amount.clone(),
                source,
            }
        })?;
        if amount.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }
        Ok((currency_config, amount))
    }
}

fn same_funding(stored: &FundingSpec, request: &FundingRequest, amount: Amount, scale: u8) -> bool {
    stored.participant_id == request.participant_id
        && stored.currency == request.currency
        && stored.action == request.action
        && Amount::parse(&stored.amount, scale).is_ok_and(|stored| stored == amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ErrorCategory;
    use crate::ledger::fixture::{Harness, funding_request};
    use crate::model::FundingAction;
    use crate::store::SpecStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn funding_moves_between_own_buckets() {
        let harness = Harness::new().await;
        let spec = harness.onboarded("dfsp1").await;

        let deposit = funding_request("dfsp1", FundingAction::Deposit, "100.00");
        let outcome = harness.ledger.fund(deposit.clone()).await.unwrap();
        assert_eq!(outcome, Ok(FundingOutcome::Applied));

        let allocate = funding_request("dfsp1", FundingAction::AllocateLiquidity, "60.00");
        assert_eq!(
            harness.ledger.fund(allocate).await.unwrap(),
            Ok(FundingOutcome::Applied)
        );

        let collateral = harness.engine.account(spec.collateral).unwrap();
        let reserve = harness.engine.account(spec.reserve).unwrap();
        let clearing = harness.engine.account(spec.clearing).unwrap();
        assert_eq!(collateral.debits_posted, 10_000);
        assert_eq!(reserve.credits_posted - reserve.debits_posted, 4_000);
        assert_eq!(clearing.credits_posted, 6_000);

        let stored = harness.store.get_funding_spec(deposit.transfer_id).await.unwrap();
        assert_eq!(stored.unwrap().action, FundingAction::Deposit);
    }

    #[tokio::test]
    async fn redelivered_funding_applies_once() {
        let harness = Harness::new().await;
        let spec = harness.onboarded("dfsp1").await;
        let deposit = funding_request("dfsp1", FundingAction::Deposit, "5");

        assert_eq!(harness.ledger.fund(deposit.clone()).await.unwrap(), Ok(FundingOutcome::Applied));
        assert_eq!(
            harness.ledger.fund(deposit).await.unwrap(),
            Ok(FundingOutcome::AlreadyApplied)
        );
        assert_eq!(harness.engine.account(spec.reserve).unwrap().credits_posted, 500);
    }

    #[tokio::test]
    async fn reused_funding_id_with_other_terms_is_a_conflict() {
        let harness = Harness::new().await;
        let spec = harness.onboarded("dfsp1").await;
        let deposit = funding_request("dfsp1", FundingAction::Deposit, "5");
        harness.ledger.fund(deposit.clone()).await.unwrap().unwrap();

        let mut larger = deposit.clone();
        larger.amount = "50".into();
        let failure = harness.ledger.fund(larger).await.unwrap().unwrap_err();
        assert_eq!(failure, TransferFailure::Conflict(deposit.transfer_id));
        assert_eq!(failure.category(), ErrorCategory::Duplicate);

        let mut withdrawal = deposit.clone();
        withdrawal.action = FundingAction::Withdrawal;
        assert_eq!(
            harness.ledger.fund(withdrawal).await.unwrap(),
            Err(TransferFailure::Conflict(deposit.transfer_id))
        );

        // same value written differently is the same request
        let mut padded = deposit.clone();
        padded.amount = "5.00".into();
        assert_eq!(
            harness.ledger.fund(padded).await.unwrap(),
            Ok(FundingOutcome::AlreadyApplied)
        );
        assert_eq!(harness.engine.account(spec.reserve).unwrap().credits_posted, 500);
    }

    #[tokio::test]
    async fn engine_applied_but_spec_missing_is_still_once() {
        let harness = Harness::new().await;
        let spec = harness.onboarded("dfsp1").await;
        let deposit = funding_request("dfsp1", FundingAction::Deposit, "5");
        harness.ledger.fund(deposit.clone()).await.unwrap().unwrap();

        // a second store over the same engine has never seen the funding spec
        let replay = Harness::with_engine(harness.engine.clone());
        replay.store.associate_accounts(spec.clone()).await.unwrap();
        assert_eq!(
            replay.ledger.fund(deposit).await.unwrap(),
            Ok(FundingOutcome::AlreadyApplied)
        );
        assert_eq!(harness.engine.account(spec.reserve).unwrap().credits_posted, 500);
    }

    #[tokio::test]
    async fn withdrawal_beyond_reserve_is_rejected() {
        let harness = Harness::new().await;
        harness.onboarded("dfsp1").await;
        harness
            .ledger
            .fund(funding_request("dfsp1", FundingAction::Deposit, "10"))
            .await
            .unwrap()
            .unwrap();

        let outcome = harness
            .ledger
            .fund(funding_request("dfsp1", FundingAction::Withdrawal, "11"))
            .await
            .unwrap();
        let failure = outcome.unwrap_err();
        assert_eq!(failure.category(), ErrorCategory::InsufficientLiquidity);
    }

    #[tokio::test]
    async fn funding_input_is_validated() {
        let harness = Harness::new().await;
        harness.onboarded("dfsp1").await;

        let zero = funding_request("dfsp1", FundingAction::Deposit, "0.00");
        assert_eq!(
            harness.ledger.fund(zero).await.unwrap(),
            Err(ValidationError::ZeroAmount.into())
        );

        let mut unknown = funding_request("dfsp1", FundingAction::Deposit, "1");
        unknown.currency = "ZZZ".into();
        assert_eq!(
            harness.ledger.fund(unknown).await.unwrap(),
            Err(ValidationError::UnknownCurrency("ZZZ".into()).into())
        );

        let mut stranger = funding_request("ghost", FundingAction::Deposit, "1");
        stranger.transfer_id = Uuid::new_v4();
        assert_eq!(
            harness.ledger.fund(stranger).await.unwrap(),
            Err(TransferFailure::AccountsNotFound("ghost".into(), "USD".into()))
        );
    }
}
