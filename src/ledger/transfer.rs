use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BatchOutcome, Ledger, LedgerError, TransferFailure, ValidationError, log_batch};
use crate::amount::Amount;
use crate::batcher::{BatcherError, Ticket};
use crate::engine::{AMOUNT_MAX, CreateTransferResult, Transfer, TransferFlags};
use crate::id::{derived_id, to_engine_id};
use crate::model::{Currency, FulfilRequest, FulfilmentAttachment, PrepareRequest, TransferSpec};
use crate::store::{Directory, SpecStore, SpecWrite, StoreError};

/// Engine code of the pending clearing leg and its post.
pub const TRANSFER_CODE_CLEARING: u16 = 1;
/// Engine code of the payer → payee settlement leg.
pub const TRANSFER_CODE_SETTLEMENT: u16 = 2;

/// A prepare request that passed input validation.
struct ValidPrepare {
    spec: TransferSpec,
    amount: Amount,
}

impl Ledger {
    /// Reserve funds for a batch of transfers sharing one currency.
    ///
    /// Each valid item becomes a pending transfer between the payer's and the
    /// payee's clearing accounts. A mixed-currency or unknown-currency batch
    /// is rejected as a whole before any store or engine call.
    pub async fn prepare(&self, requests: Vec<PrepareRequest>) -> Result<BatchOutcome, LedgerError> {
        let currency = batch_currency(&requests)?;
        let currency_config = match &currency {
            Some(code) => Some(self.currency(code)?),
            None => None,
        };

        let mut outcomes: BatchOutcome = Vec::with_capacity(requests.len());
        let mut valid = Vec::new();
        let mut seen = HashSet::new();
        for (index, request) in requests.iter().enumerate() {
            match self.validate_prepare(request, &mut seen) {
                Ok(item) => {
                    valid.push((index, item));
                    outcomes.push(Ok(()));
                }
                Err(e) => outcomes.push(Err(e.into())),
            }
        }
        let labels: Vec<&str> = requests
            .iter()
            .map(|r| r.transfer_id.as_deref().unwrap_or("-"))
            .collect();

        let (Some(currency), Some(currency_config)) = (currency, currency_config) else {
            log_batch("prepare", &labels, &outcomes);
            return Ok(outcomes);
        };

        let mut directory = Directory::new(self.store.as_ref(), &currency);
        let mut resolved = Vec::with_capacity(valid.len());
        for (index, item) in valid {
            match directory
                .parties(&item.spec.payer_id, &item.spec.payee_id)
                .await?
            {
                Ok(parties) => resolved.push((index, item, parties)),
                Err(rejection) => outcomes[index] = Err(rejection.into()),
            }
        }

        let specs: Vec<TransferSpec> = resolved.iter().map(|(_, item, _)| item.spec.clone()).collect();
        let writes = self.store.save_transfer_spec(&specs).await?;
        expect_count(specs.len(), writes.len())?;

        let mut accepted = Vec::with_capacity(resolved.len());
        let mut redelivered = Vec::new();
        for ((index, item, parties), write) in resolved.into_iter().zip(writes) {
            match write {
                Ok(SpecWrite::Written) => accepted.push((index, item, parties)),
                Ok(SpecWrite::Unchanged) => redelivered.push((index, item, parties)),
                Err(failure) => outcomes[index] = Err(failure.into()),
            }
        }

        // A redelivered id must carry the terms already on record; the engine
        // record is only ever built from those.
        if !redelivered.is_empty() {
            let ids: Vec<Uuid> = redelivered.iter().map(|(_, item, _)| item.spec.id).collect();
            let stored = self.store.lookup_transfer_spec(&ids).await?;
            expect_count(ids.len(), stored.len())?;
            for ((index, item, parties), stored) in redelivered.into_iter().zip(stored) {
                let Some(stored) = stored else {
                    outcomes[index] = Err(TransferFailure::TransferNotFound(item.spec.id));
                    continue;
                };
                if same_terms(&stored, &item, currency_config.scale) {
                    accepted.push((index, item, parties));
                } else {
                    warn!(transfer_id = %item.spec.id, "prepare redelivered with different terms");
                    outcomes[index] = Err(TransferFailure::Conflict(item.spec.id));
                }
            }
            accepted.sort_by_key(|(index, _, _)| *index);
        }

        let mut tickets = Vec::with_capacity(accepted.len());
        for (index, item, parties) in accepted {
            let transfer = Transfer::new(to_engine_id(&item.spec.id))
                .with_debit_account_id(parties.payer.clearing)
                .with_credit_account_id(parties.payee.clearing)
                .with_amount(item.amount.minor())
                .with_ledger(currency_config.ledger)
                .with_code(TRANSFER_CODE_CLEARING)
                .with_flags(TransferFlags::PENDING);
            tickets.push((index, self.enqueue(vec![transfer]).await?));
        }
        for (index, ticket) in tickets {
            outcomes[index] = engine_outcome(ticket.wait().await)?;
        }

        log_batch("prepare", &labels, &outcomes);
        Ok(outcomes)
    }

    /// Commit prepared transfers.
    ///
    /// Amount and parties come from the stored transfer specs. Each transfer
    /// becomes a linked pair: a post of the pending clearing transfer at its
    /// full amount and a payer → payee movement between settlement accounts.
    /// The fulfilment is attached to the spec once the engine accepts.
    pub async fn fulfil(&self, requests: Vec<FulfilRequest>) -> Result<BatchOutcome, LedgerError> {
        let ids: Vec<Uuid> = requests.iter().map(|r| r.transfer_id).collect();
        let specs = self.store.lookup_transfer_spec(&ids).await?;
        expect_count(ids.len(), specs.len())?;

        let mut outcomes: BatchOutcome = Vec::with_capacity(requests.len());
        let mut checked = Vec::new();
        let mut seen = HashSet::new();
        for (index, (request, spec)) in requests.iter().zip(specs).enumerate() {
            match self.check_fulfilment(request, spec, &mut seen) {
                Ok((spec, amount)) => {
                    checked.push((index, request, spec, amount));
                    outcomes.push(Ok(()));
                }
                Err(failure) => outcomes.push(Err(failure)),
            }
        }

        let mut directories: HashMap<Currency, Directory<'_, dyn SpecStore>> = HashMap::new();
        let mut tickets = Vec::with_capacity(checked.len());
        for (index, request, spec, amount) in checked {
            let currency_config = self.currency(&spec.currency)?;
            let directory = directories
                .entry(spec.currency.clone())
                .or_insert_with(|| Directory::new(self.store.as_ref(), &spec.currency));

            let Some(payer) = directory.accounts(&spec.payer_id).await? else {
                outcomes[index] = Err(TransferFailure::AccountsNotFound(
                    spec.payer_id.clone(),
                    spec.currency.clone(),
                ));
                continue;
            };
            let Some(payee) = directory.accounts(&spec.payee_id).await? else {
                outcomes[index] = Err(TransferFailure::AccountsNotFound(
                    spec.payee_id.clone(),
                    spec.currency.clone(),
                ));
                continue;
            };

            let post = Transfer::new(derived_id(&spec.id, "post"))
                .with_pending_id(to_engine_id(&spec.id))
                .with_amount(AMOUNT_MAX)
                .with_flags(TransferFlags::POST_PENDING_TRANSFER);
            let settlement = Transfer::new(derived_id(&spec.id, "settlement"))
                .with_debit_account_id(payer.settlement)
                .with_credit_account_id(payee.settlement)
                .with_amount(amount.minor())
                .with_ledger(currency_config.ledger)
                .with_code(TRANSFER_CODE_SETTLEMENT);

            let attachment = FulfilmentAttachment {
                id: spec.id,
                fulfilment: request.fulfilment.clone(),
            };
            tickets.push((index, attachment, self.enqueue(vec![post, settlement]).await?));
        }

        let mut attachments = Vec::new();
        let mut attached = Vec::new();
        for (index, attachment, ticket) in tickets {
            let outcome = engine_outcome(ticket.wait().await)?;
            if outcome.is_ok() {
                attachments.push(attachment);
                attached.push(index);
            }
            outcomes[index] = outcome;
        }

        if !attachments.is_empty() {
            let writes = self
                .store
                .attach_transfer_spec_fulfilment(&attachments)
                .await?;
            expect_count(attachments.len(), writes.len())?;
            for (index, write) in attached.into_iter().zip(writes) {
                if let Err(failure) = write {
                    outcomes[index] = Err(failure.into());
                }
            }
        }

        log_batch("fulfil", &ids, &outcomes);
        Ok(outcomes)
    }

    /// Release the reservation of prepared transfers with the engine's void
    /// primitive.
    pub async fn abort(&self, transfer_ids: Vec<Uuid>) -> Result<BatchOutcome, LedgerError> {
        let specs = self.store.lookup_transfer_spec(&transfer_ids).await?;
        expect_count(transfer_ids.len(), specs.len())?;

        let mut outcomes: BatchOutcome = Vec::with_capacity(transfer_ids.len());
        let mut tickets = Vec::new();
        let mut seen = HashSet::new();
        for (index, (id, spec)) in transfer_ids.iter().zip(specs).enumerate() {
            if !seen.insert(*id) {
                outcomes.push(Err(ValidationError::DuplicateInBatch(*id).into()));
                continue;
            }
            if spec.is_none() {
                outcomes.push(Err(TransferFailure::TransferNotFound(*id)));
                continue;
            }
            outcomes.push(Ok(()));

            let void = Transfer::new(derived_id(id, "void"))
                .with_pending_id(to_engine_id(id))
                .with_flags(TransferFlags::VOID_PENDING_TRANSFER);
            tickets.push((index, self.enqueue(vec![void]).await?));
        }
        for (index, ticket) in tickets {
            outcomes[index] = engine_outcome(ticket.wait().await)?;
        }

        log_batch("abort", &transfer_ids, &outcomes);
        Ok(outcomes)
    }
}

/// Private API
impl Ledger {
    async fn enqueue(&self, chain: Vec<Transfer>) -> Result<Ticket, LedgerError> {
        self.batcher
            .enqueue_linked(chain)
            .await
            .map_err(LedgerError::Batcher)
    }

    fn validate_prepare(
        &self,
        request: &PrepareRequest,
        seen: &mut HashSet<Uuid>,
    ) -> Result<ValidPrepare, ValidationError> {
        let raw_id = present(&request.transfer_id).ok_or(ValidationError::MissingTransferId)?;
        let id = Uuid::parse_str(raw_id)
            .map_err(|_| ValidationError::InvalidTransferId(raw_id.to_string()))?;
        let payer_id = present(&request.payer_id).ok_or(ValidationError::MissingPayer)?;
        let payee_id = present(&request.payee_id).ok_or(ValidationError::MissingPayee)?;
        let money = request.amount.as_ref().ok_or(ValidationError::MissingAmount)?;

        let scale = self.currency(&money.currency)?.scale;
        let amount =
            Amount::parse(&money.amount, scale).map_err(|source| ValidationError::InvalidAmount {
                amount: money.amount.clone(),
                source,
            })?;
        if amount.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }
        if payer_id == payee_id {
            return Err(ValidationError::SameParticipant(payer_id.to_string()));
        }
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateInBatch(id));
        }

        Ok(ValidPrepare {
            spec: TransferSpec {
                id,
                currency: money.currency.clone(),
                amount: money.amount.clone(),
                payer_id: payer_id.to_string(),
                payee_id: payee_id.to_string(),
                condition: request.condition.clone(),
                ilp_packet: request.ilp_packet.clone(),
                fulfilment: None,
            },
            amount,
        })
    }

    fn check_fulfilment(
        &self,
        request: &FulfilRequest,
        spec: Option<TransferSpec>,
        seen: &mut HashSet<Uuid>,
    ) -> Result<(TransferSpec, Amount), TransferFailure> {
        let id = request.transfer_id;
        if !seen.insert(id) {
            return Err(ValidationError::DuplicateInBatch(id).into());
        }
        let spec = spec.ok_or(TransferFailure::TransferNotFound(id))?;

        if !fulfilment_matches(&request.fulfilment, &spec.condition)? {
            return Err(TransferFailure::InvalidFulfilment(id));
        }

        let scale = self.currency(&spec.currency)?.scale;
        let amount =
            Amount::parse(&spec.amount, scale).map_err(|source| ValidationError::InvalidAmount {
                amount: spec.amount.clone(),
                source,
            })?;
        Ok((spec, amount))
    }
}

/// The single currency of a prepare batch, if any item names one.
fn batch_currency(requests: &[PrepareRequest]) -> Result<Option<Currency>, ValidationError> {
    let mut currencies = requests
        .iter()
        .filter_map(|r| r.amount.as_ref())
        .map(|money| &money.currency);
    let Some(first) = currencies.next() else {
        return Ok(None);
    };
    if let Some(other) = currencies.find(|c| *c != first) {
        return Err(ValidationError::MixedCurrency(first.clone(), other.clone()));
    }
    Ok(Some(first.clone()))
}

/// Whether a stored spec records the same transfer as a validated request.
/// Amounts compare by value, so `5` and `5.00` agree.
fn same_terms(stored: &TransferSpec, item: &ValidPrepare, scale: u8) -> bool {
    let request = &item.spec;
    stored.currency == request.currency
        && Amount::parse(&stored.amount, scale).is_ok_and(|amount| amount == item.amount)
        && stored.payer_id == request.payer_id
        && stored.payee_id == request.payee_id
        && stored.condition == request.condition
        && stored.ilp_packet == request.ilp_packet
}

/// `condition` is the hex SHA-256 of the decoded fulfilment.
fn fulfilment_matches(fulfilment: &str, condition: &str) -> Result<bool, ValidationError> {
    let preimage = hex::decode(fulfilment).map_err(|_| ValidationError::MalformedFulfilment)?;
    let digest = hex::encode(Sha256::digest(&preimage));
    Ok(digest.eq_ignore_ascii_case(condition))
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|value| !value.is_empty())
}

fn expect_count(requested: usize, returned: usize) -> Result<(), LedgerError> {
    if requested != returned {
        return Err(StoreError::CountMismatch { requested, returned }.into());
    }
    Ok(())
}

/// Item outcome of a flushed chain. `exists` means a redelivery of work the
/// engine already applied; anything but a per-item rejection aborts the call.
fn engine_outcome(
    result: Result<(), BatcherError>,
) -> Result<Result<(), TransferFailure>, LedgerError> {
    match result {
        Ok(()) => Ok(Ok(())),
        Err(BatcherError::Rejected {
            result: CreateTransferResult::Exists,
            ..
        }) => {
            debug!("engine already holds the record");
            Ok(Ok(()))
        }
        Err(BatcherError::Rejected { index, result }) => {
            Ok(Err(TransferFailure::Engine { index, result }))
        }
        Err(e) => Err(LedgerError::Batcher(e)),
    }
}
