use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Association, LookupFailure, SpecStore, SpecWrite, SpecWriteResult, StoreError};
use crate::cache::{AccountSpecCache, TransferSpecCache};
use crate::model::{
    AccountSpec, FulfilmentAttachment, FundingSpec, NetDebitCapQuery, NetDebitCapSpec, Participant,
    TransferSpec,
};

/// Cache-aside front of a [`SpecStore`].
///
/// Account specs are read through the unbounded [`AccountSpecCache`];
/// transfer specs through the bounded [`TransferSpecCache`]. Everything else
/// goes straight to the wrapped store.
pub struct CachedSpecStore {
    inner: Arc<dyn SpecStore>,
    accounts: Mutex<AccountSpecCache>,
    transfers: Mutex<TransferSpecCache>,
}

impl CachedSpecStore {
    pub fn new(inner: Arc<dyn SpecStore>, transfer_cache_max: usize) -> Self {
        Self {
            inner,
            accounts: Mutex::new(AccountSpecCache::new()),
            transfers: Mutex::new(TransferSpecCache::new(transfer_cache_max)),
        }
    }

    pub fn cached_transfer_specs(&self) -> usize {
        self.transfers.lock().len()
    }
}

fn check_count(requested: usize, returned: usize) -> Result<(), StoreError> {
    if requested != returned {
        return Err(StoreError::CountMismatch { requested, returned });
    }
    Ok(())
}

#[async_trait]
impl SpecStore for CachedSpecStore {
    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, StoreError> {
        self.inner.get_participant(id).await
    }

    async fn save_participant(&self, participant: Participant) -> Result<(), StoreError> {
        self.inner.save_participant(participant).await
    }

    async fn get_account_spec(
        &self,
        participant_id: &str,
        currency: &str,
    ) -> Result<Option<AccountSpec>, StoreError> {
        let cached = self.accounts.lock().get(participant_id, currency).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let fetched = self.inner.get_account_spec(participant_id, currency).await?;
        if let Some(spec) = &fetched {
            self.accounts
                .lock()
                .put(participant_id, currency, spec.clone())?;
        }
        Ok(fetched)
    }

    async fn account_specs(&self) -> Result<Vec<AccountSpec>, StoreError> {
        self.inner.account_specs().await
    }

    async fn associate_accounts(&self, spec: AccountSpec) -> Result<Association, StoreError> {
        self.accounts.lock().delete(&spec.participant_id, &spec.currency);
        self.inner.associate_accounts(spec).await
    }

    async fn tombstone_accounts(&self, spec: &AccountSpec) -> Result<usize, StoreError> {
        let changed = self.inner.tombstone_accounts(spec).await?;
        self.accounts.lock().delete(&spec.participant_id, &spec.currency);
        Ok(changed)
    }

    async fn lookup_transfer_spec(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<Option<TransferSpec>>, StoreError> {
        let mut found = self.transfers.lock().get(ids);
        let misses: Vec<Uuid> = ids
            .iter()
            .zip(&found)
            .filter(|(_, hit)| hit.is_none())
            .map(|(id, _)| *id)
            .collect();
        if misses.is_empty() {
            return Ok(found);
        }

        warn!(
            requested = ids.len(),
            misses = misses.len(),
            "transfer spec cache miss"
        );
        let fetched = self.inner.lookup_transfer_spec(&misses).await?;
        check_count(misses.len(), fetched.len())?;

        let mut fetched_iter = fetched.iter();
        for slot in found.iter_mut().filter(|slot| slot.is_none()) {
            *slot = fetched_iter.next().cloned().flatten();
        }
        self.transfers.lock().put(fetched.into_iter().flatten());
        Ok(found)
    }

    async fn save_transfer_spec(
        &self,
        specs: &[TransferSpec],
    ) -> Result<Vec<SpecWriteResult>, StoreError> {
        let results = self.inner.save_transfer_spec(specs).await?;
        check_count(specs.len(), results.len())?;

        let written = specs
            .iter()
            .zip(&results)
            .filter(|(_, result)| matches!(result, Ok(SpecWrite::Written)))
            .map(|(spec, _)| spec.clone());
        self.transfers.lock().put(written);
        Ok(results)
    }

    async fn attach_transfer_spec_fulfilment(
        &self,
        attachments: &[FulfilmentAttachment],
    ) -> Result<Vec<SpecWriteResult>, StoreError> {
        let results = self.inner.attach_transfer_spec_fulfilment(attachments).await?;
        check_count(attachments.len(), results.len())?;

        let applied: Vec<FulfilmentAttachment> = attachments
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_ok())
            .map(|(attachment, _)| attachment.clone())
            .collect();
        debug!(applied = applied.len(), "fulfilments attached");
        self.transfers.lock().put_fulfilment(&applied);
        Ok(results)
    }

    async fn save_funding_spec(&self, spec: FundingSpec) -> Result<SpecWrite, StoreError> {
        self.inner.save_funding_spec(spec).await
    }

    async fn get_funding_spec(&self, transfer_id: Uuid) -> Result<Option<FundingSpec>, StoreError> {
        self.inner.get_funding_spec(transfer_id).await
    }

    async fn upsert_net_debit_cap(&self, spec: NetDebitCapSpec) -> Result<(), StoreError> {
        self.inner.upsert_net_debit_cap(spec).await
    }

    async fn get_net_debit_caps(
        &self,
        queries: &[NetDebitCapQuery],
    ) -> Result<Vec<Result<NetDebitCapSpec, LookupFailure>>, StoreError> {
        self.inner.get_net_debit_caps(queries).await
    }
}
