//! Ledger orchestrator.
//!
//! Turns domain operations (onboarding, funding, prepare, fulfil, abort)
//! into correctly shaped engine records. Account ids come from the
//! [`SpecStore`]; transfers go through the [`Batcher`]; account creation and
//! balance lookups call the engine directly.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batcher::Batcher;
use crate::config::{Config, CurrencyConfig};
use crate::engine::{Account, AccountFlags, AccountingEngine, CreateAccountResult, EngineError};
use crate::hydrate::ParticipantBalances;
use crate::id::random_id;
use crate::model::{
    AccountSpec, Bucket, FulfilRequest, LedgerEvent, NetDebitCapQuery, NetDebitCapSpec,
    Participant,
};
use crate::store::{Association, LookupFailure, SpecStore, StoreError};

mod error;
#[cfg(test)]
mod fixture;
pub use error::{ErrorCategory, LedgerError, TransferFailure, ValidationError};

mod funding;
pub use funding::FundingOutcome;

mod transfer;
pub use transfer::{TRANSFER_CODE_CLEARING, TRANSFER_CODE_SETTLEMENT};

/// Per-item outcomes of a batch operation, in request order.
pub type BatchOutcome = Vec<Result<(), TransferFailure>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnboardOutcome {
    Created(AccountSpec),
    /// The pair was already provisioned; its active set is returned.
    AlreadyExists(AccountSpec),
}

impl OnboardOutcome {
    pub fn spec(&self) -> &AccountSpec {
        match self {
            OnboardOutcome::Created(spec) | OnboardOutcome::AlreadyExists(spec) => spec,
        }
    }
}

pub struct Ledger {
    config: Config,
    store: Arc<dyn SpecStore>,
    engine: Arc<dyn AccountingEngine>,
    batcher: Batcher,
}

/// Public API
impl Ledger {
    pub fn new(
        config: Config,
        store: Arc<dyn SpecStore>,
        engine: Arc<dyn AccountingEngine>,
        batcher: Batcher,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            batcher,
        }
    }

    /// Apply a stream of events, grouping consecutive transfer events of the
    /// same kind into batches.
    pub async fn run(&self, stream: impl Stream<Item = LedgerEvent>) {
        let chunks = stream.chunks_timeout(
            self.config.batch_size,
            Duration::from_millis(self.config.flush_interval_ms),
        );
        tokio::pin!(chunks);
        while let Some(events) = chunks.next().await {
            self.apply_events(events).await;
        }
    }

    /// Register the participant if needed and provision its account set for
    /// `currency`. Re-running for a provisioned pair is not an error.
    pub async fn onboard_participant(
        &self,
        participant_id: &str,
        currency: &str,
    ) -> Result<OnboardOutcome, LedgerError> {
        let currency_config = self.currency(currency)?;

        if self.store.get_participant(participant_id).await?.is_none() {
            self.store
                .save_participant(Participant::new(participant_id))
                .await?;
            info!(participant = %participant_id, "participant registered");
        }

        if let Some(spec) = self.store.get_account_spec(participant_id, currency).await? {
            info!(
                participant = %participant_id,
                currency = %currency,
                "accounts already provisioned"
            );
            return Ok(OnboardOutcome::AlreadyExists(spec));
        }

        let spec = self
            .create_account_set(participant_id, currency, currency_config)
            .await?;
        if let Association::AlreadyActive(existing) =
            self.store.associate_accounts(spec.clone()).await?
        {
            warn!(
                participant = %participant_id,
                currency = %currency,
                unused = ?spec.account_ids(),
                "accounts provisioned concurrently; new engine accounts left unused"
            );
            return Ok(OnboardOutcome::AlreadyExists(existing));
        }
        info!(
            participant = %participant_id,
            currency = %currency,
            "accounts provisioned"
        );
        Ok(OnboardOutcome::Created(spec))
    }

    /// Onboard the configured hub participant.
    pub async fn onboard_hub(&self, currency: &str) -> Result<OnboardOutcome, LedgerError> {
        self.onboard_participant(&self.config.hub_participant_id, currency)
            .await
    }

    /// Replace the active account set of the pair with a freshly created one.
    /// The old set is tombstoned, never mutated.
    pub async fn reprovision_participant(
        &self,
        participant_id: &str,
        currency: &str,
    ) -> Result<AccountSpec, LedgerError> {
        let currency_config = self.currency(currency)?;
        let current = self.account_spec(participant_id, currency).await?;

        let spec = self
            .create_account_set(participant_id, currency, currency_config)
            .await?;
        let tombstoned = self.store.tombstone_accounts(&current).await?;
        if tombstoned == 0 {
            return Err(LedgerError::Consistency(format!(
                "active accounts of {participant_id}/{currency} vanished during reprovisioning"
            )));
        }
        if let Association::AlreadyActive(_) = self.store.associate_accounts(spec.clone()).await? {
            return Err(LedgerError::Consistency(format!(
                "{participant_id}/{currency} was provisioned concurrently during reprovisioning"
            )));
        }
        info!(
            participant = %participant_id,
            currency = %currency,
            "accounts reprovisioned"
        );
        Ok(spec)
    }

    pub async fn participant_balances(
        &self,
        participant_id: &str,
        currency: &str,
    ) -> Result<ParticipantBalances, LedgerError> {
        let spec = self.account_spec(participant_id, currency).await?;
        let ids = spec.account_ids();
        let accounts = self.engine.lookup_accounts(&ids).await?;
        if accounts.len() != ids.len() {
            return Err(LedgerError::Engine(EngineError::LookupMismatch {
                requested: ids.len(),
                returned: accounts.len(),
            }));
        }
        ParticipantBalances::from_accounts(&spec, &accounts).ok_or_else(|| {
            LedgerError::Consistency(format!(
                "account lookup for {participant_id}/{currency} answered with foreign ids"
            ))
        })
    }

    /// Balances of every active account set, ordered by participant then
    /// currency.
    pub async fn all_balances(&self) -> Result<Vec<ParticipantBalances>, LedgerError> {
        let mut balances = Vec::new();
        for spec in self.store.account_specs().await? {
            balances.push(
                self.participant_balances(&spec.participant_id, &spec.currency)
                    .await?,
            );
        }
        Ok(balances)
    }

    pub async fn set_net_debit_cap(&self, spec: NetDebitCapSpec) -> Result<(), LedgerError> {
        self.currency(&spec.currency)?;
        self.account_spec(&spec.participant_id, &spec.currency)
            .await?;
        let (participant_id, currency, cap) =
            (spec.participant_id.clone(), spec.currency.clone(), spec.cap);
        self.store.upsert_net_debit_cap(spec).await?;
        info!(participant = %participant_id, currency = %currency, cap = ?cap, "net debit cap set");
        Ok(())
    }

    pub async fn net_debit_caps(
        &self,
        queries: &[NetDebitCapQuery],
    ) -> Result<Vec<Result<NetDebitCapSpec, LookupFailure>>, LedgerError> {
        let results = self.store.get_net_debit_caps(queries).await?;
        if results.len() != queries.len() {
            return Err(StoreError::CountMismatch {
                requested: queries.len(),
                returned: results.len(),
            }
            .into());
        }
        Ok(results)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Private API
impl Ledger {
    fn currency(&self, code: &str) -> Result<CurrencyConfig, ValidationError> {
        self.config
            .currency(code)
            .ok_or_else(|| ValidationError::UnknownCurrency(code.to_string()))
    }

    async fn account_spec(
        &self,
        participant_id: &str,
        currency: &str,
    ) -> Result<AccountSpec, LedgerError> {
        self.store
            .get_account_spec(participant_id, currency)
            .await?
            .ok_or_else(|| LedgerError::AccountsNotFound {
                participant_id: participant_id.to_string(),
                currency: currency.to_string(),
            })
    }

    /// Create the four accounts of a new set as one linked chain, so either
    /// all of them exist afterwards or none does.
    async fn create_account_set(
        &self,
        participant_id: &str,
        currency: &str,
        currency_config: CurrencyConfig,
    ) -> Result<AccountSpec, LedgerError> {
        let spec = AccountSpec {
            participant_id: participant_id.to_string(),
            currency: currency.to_string(),
            collateral: random_id(),
            reserve: random_id(),
            clearing: random_id(),
            settlement: random_id(),
        };

        let last = Bucket::ALL.len() - 1;
        let accounts: Vec<Account> = Bucket::ALL
            .iter()
            .enumerate()
            .map(|(i, bucket)| {
                let mut flags = bucket_flags(*bucket);
                if i < last {
                    flags = flags | AccountFlags::LINKED;
                }
                Account::new(spec.account_id(*bucket), currency_config.ledger, bucket.code())
                    .with_flags(flags)
            })
            .collect();

        let failures = self.engine.create_accounts(&accounts).await?;
        let culprit = failures
            .iter()
            .find(|f| f.result != CreateAccountResult::LinkedEventFailed)
            .or(failures.first());
        if let Some(failure) = culprit {
            warn!(
                participant = %participant_id,
                currency = %currency,
                reason = %failure.result,
                "account creation rejected"
            );
            return Err(LedgerError::AccountsRejected {
                participant_id: participant_id.to_string(),
                currency: currency.to_string(),
                index: failure.index,
                result: failure.result,
            });
        }
        Ok(spec)
    }

    async fn apply_events(&self, events: Vec<LedgerEvent>) {
        let mut events = events.into_iter().peekable();
        while let Some(event) = events.next() {
            match event {
                LedgerEvent::Onboard {
                    participant_id,
                    currency,
                } => {
                    if let Err(e) = self.onboard_participant(&participant_id, &currency).await {
                        error!(participant = %participant_id, currency = %currency, reason = %e, "onboarding failed");
                    }
                }
                LedgerEvent::Fund(request) => {
                    let transfer_id = request.transfer_id;
                    if let Err(e) = self.fund(request).await {
                        error!(transfer_id = %transfer_id, reason = %e, "funding failed");
                    }
                }
                LedgerEvent::Prepare(first) => {
                    let currency = first.amount.as_ref().map(|m| m.currency.clone());
                    let mut batch = vec![first];
                    while let Some(LedgerEvent::Prepare(next)) = events.peek() {
                        let next_currency = next.amount.as_ref().map(|m| &m.currency);
                        if next_currency.is_some() && next_currency != currency.as_ref() {
                            break;
                        }
                        if let Some(LedgerEvent::Prepare(next)) = events.next() {
                            batch.push(next);
                        }
                    }
                    if let Err(e) = self.prepare(batch).await {
                        error!(reason = %e, "prepare batch failed");
                    }
                }
                LedgerEvent::Fulfil(first) => {
                    let mut batch: Vec<FulfilRequest> = vec![first];
                    while let Some(LedgerEvent::Fulfil(_)) = events.peek() {
                        if let Some(LedgerEvent::Fulfil(next)) = events.next() {
                            batch.push(next);
                        }
                    }
                    if let Err(e) = self.fulfil(batch).await {
                        error!(reason = %e, "fulfil batch failed");
                    }
                }
                LedgerEvent::Abort { transfer_id } => {
                    let mut batch: Vec<Uuid> = vec![transfer_id];
                    while let Some(LedgerEvent::Abort { .. }) = events.peek() {
                        if let Some(LedgerEvent::Abort { transfer_id }) = events.next() {
                            batch.push(transfer_id);
                        }
                    }
                    if let Err(e) = self.abort(batch).await {
                        error!(reason = %e, "abort batch failed");
                    }
                }
            }
        }
    }
}

/// Reserve and clearing may never go below zero; collateral and settlement
/// carry positions in both directions.
fn bucket_flags(bucket: Bucket) -> AccountFlags {
    match bucket {
        Bucket::Reserve | Bucket::Clearing => AccountFlags::DEBITS_MUST_NOT_EXCEED_CREDITS,
        Bucket::Collateral | Bucket::Settlement => AccountFlags::NONE,
    }
}

/// Log per-item outcomes and a summary line for one batch operation.
fn log_batch<I: Display>(operation: &str, ids: &[I], outcomes: &BatchOutcome) {
    let mut rejected = 0;
    for (id, outcome) in ids.iter().zip(outcomes) {
        match outcome {
            Ok(()) => debug!(transfer_id = %id, "{operation} applied"),
            Err(e) => {
                rejected += 1;
                warn!(
                    transfer_id = %id,
                    category = %e.category(),
                    reason = %e,
                    "{operation} rejected"
                );
            }
        }
    }
    info!(
        items = outcomes.len(),
        rejected,
        "{operation} batch processed"
    );
}
