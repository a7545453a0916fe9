//! Durable spec store kept in process memory.
//!
//! Rows are shaped like the relational tables they stand in for: account
//! ids are persisted as decimal strings and only become `u128` when a row is
//! read back.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    Association, LookupFailure, SpecStore, SpecWrite, SpecWriteFailure, SpecWriteResult, StoreError,
};
use crate::id::EngineId;
use crate::model::{
    AccountSpec, Currency, FulfilmentAttachment, FundingSpec, NetDebitCap, NetDebitCapQuery,
    NetDebitCapSpec, Participant, ParticipantId, TransferSpec,
};

#[derive(Debug, Clone)]
struct AccountSpecRow {
    participant_id: ParticipantId,
    currency: Currency,
    collateral: String,
    reserve: String,
    clearing: String,
    settlement: String,
    tombstoned: bool,
    created_at: u64,
}

impl AccountSpecRow {
    fn from_spec(spec: &AccountSpec, created_at: u64) -> Self {
        Self {
            participant_id: spec.participant_id.clone(),
            currency: spec.currency.clone(),
            collateral: spec.collateral.to_string(),
            reserve: spec.reserve.to_string(),
            clearing: spec.clearing.to_string(),
            settlement: spec.settlement.to_string(),
            tombstoned: false,
            created_at,
        }
    }

    fn to_spec(&self) -> Result<AccountSpec, StoreError> {
        Ok(AccountSpec {
            participant_id: self.participant_id.clone(),
            currency: self.currency.clone(),
            collateral: parse_id(&self.collateral)?,
            reserve: parse_id(&self.reserve)?,
            clearing: parse_id(&self.clearing)?,
            settlement: parse_id(&self.settlement)?,
        })
    }

    fn matches(&self, spec: &AccountSpec) -> bool {
        self.participant_id == spec.participant_id
            && self.currency == spec.currency
            && self.collateral == spec.collateral.to_string()
            && self.reserve == spec.reserve.to_string()
            && self.clearing == spec.clearing.to_string()
            && self.settlement == spec.settlement.to_string()
    }
}

fn parse_id(text: &str) -> Result<EngineId, StoreError> {
    text.parse().map_err(|_| StoreError::Corrupt {
        table: "account_spec",
        reason: format!("account id {text:?} is not a 128-bit integer"),
    })
}

#[derive(Debug, Default)]
struct Tables {
    participants: HashMap<ParticipantId, Participant>,
    account_specs: Vec<AccountSpecRow>,
    transfer_specs: HashMap<Uuid, TransferSpec>,
    funding_specs: HashMap<Uuid, FundingSpec>,
    net_debit_caps: HashMap<(ParticipantId, Currency), NetDebitCap>,
    next_created_at: u64,
}

#[derive(Debug, Default)]
pub struct MemorySpecStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    account_spec_queries: AtomicUsize,
    transfer_spec_queries: AtomicUsize,
}

impl MemorySpecStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of account-spec reads that reached this store.
    pub fn account_spec_queries(&self) -> usize {
        self.account_spec_queries.load(Ordering::SeqCst)
    }

    /// Number of transfer-spec lookups that reached this store.
    pub fn transfer_spec_queries(&self) -> usize {
        self.transfer_spec_queries.load(Ordering::SeqCst)
    }

    fn tables(&self) -> Result<parking_lot::MutexGuard<'_, Tables>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(self.tables.lock())
    }
}

#[async_trait]
impl SpecStore for MemorySpecStore {
    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, StoreError> {
        Ok(self.tables()?.participants.get(id).cloned())
    }

    async fn save_participant(&self, participant: Participant) -> Result<(), StoreError> {
        self.tables()?
            .participants
            .insert(participant.id.clone(), participant);
        Ok(())
    }

    async fn get_account_spec(
        &self,
        participant_id: &str,
        currency: &str,
    ) -> Result<Option<AccountSpec>, StoreError> {
        let tables = self.tables()?;
        self.account_spec_queries.fetch_add(1, Ordering::SeqCst);
        tables
            .account_specs
            .iter()
            .filter(|row| {
                !row.tombstoned && row.participant_id == participant_id && row.currency == currency
            })
            .max_by_key(|row| row.created_at)
            .map(AccountSpecRow::to_spec)
            .transpose()
    }

    async fn account_specs(&self) -> Result<Vec<AccountSpec>, StoreError> {
        let tables = self.tables()?;
        let mut newest: HashMap<(&str, &str), &AccountSpecRow> = HashMap::new();
        for row in tables.account_specs.iter().filter(|row| !row.tombstoned) {
            let key = (row.participant_id.as_str(), row.currency.as_str());
            match newest.get(&key) {
                Some(current) if current.created_at > row.created_at => {}
                _ => {
                    newest.insert(key, row);
                }
            }
        }

        let mut rows: Vec<_> = newest.into_iter().collect();
        rows.sort_by(|(a, _), (b, _)| a.cmp(b));
        rows.into_iter().map(|(_, row)| row.to_spec()).collect()
    }

    async fn associate_accounts(&self, spec: AccountSpec) -> Result<Association, StoreError> {
        let mut tables = self.tables()?;
        if let Some(active) = tables.account_specs.iter().find(|row| {
            !row.tombstoned
                && row.participant_id == spec.participant_id
                && row.currency == spec.currency
        }) {
            return Ok(Association::AlreadyActive(active.to_spec()?));
        }
        tables.next_created_at += 1;
        let row = AccountSpecRow::from_spec(&spec, tables.next_created_at);
        tables.account_specs.push(row);
        Ok(Association::Associated)
    }

    async fn tombstone_accounts(&self, spec: &AccountSpec) -> Result<usize, StoreError> {
        let mut tables = self.tables()?;
        let mut changed = 0;
        for row in tables
            .account_specs
            .iter_mut()
            .filter(|row| !row.tombstoned && row.matches(spec))
        {
            row.tombstoned = true;
            changed += 1;
        }
        Ok(changed)
    }

    async fn lookup_transfer_spec(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<Option<TransferSpec>>, StoreError> {
        let tables = self.tables()?;
        self.transfer_spec_queries.fetch_add(1, Ordering::SeqCst);
        Ok(ids
            .iter()
            .map(|id| tables.transfer_specs.get(id).cloned())
            .collect())
    }

    async fn save_transfer_spec(
        &self,
        specs: &[TransferSpec],
    ) -> Result<Vec<SpecWriteResult>, StoreError> {
        let mut tables = self.tables()?;
        Ok(specs
            .iter()
            .map(|spec| match tables.transfer_specs.entry(spec.id) {
                Entry::Occupied(_) => Ok(SpecWrite::Unchanged),
                Entry::Vacant(slot) => {
                    slot.insert(spec.clone());
                    Ok(SpecWrite::Written)
                }
            })
            .collect())
    }

    async fn attach_transfer_spec_fulfilment(
        &self,
        attachments: &[FulfilmentAttachment],
    ) -> Result<Vec<SpecWriteResult>, StoreError> {
        let mut tables = self.tables()?;

        // stage every update first so a single failure leaves no trace
        let mut staged: HashMap<Uuid, &str> = HashMap::new();
        let mut results = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let current = staged.get(&attachment.id).copied().or_else(|| {
                tables
                    .transfer_specs
                    .get(&attachment.id)
                    .and_then(|spec| spec.fulfilment.as_deref())
            });
            let result = match (tables.transfer_specs.contains_key(&attachment.id), current) {
                (false, _) => Err(SpecWriteFailure::NotFound(attachment.id)),
                (true, Some(existing)) if existing == attachment.fulfilment => {
                    Ok(SpecWrite::Unchanged)
                }
                (true, Some(_)) => Err(SpecWriteFailure::FulfilmentConflict(attachment.id)),
                (true, None) => {
                    staged.insert(attachment.id, &attachment.fulfilment);
                    Ok(SpecWrite::Written)
                }
            };
            results.push(result);
        }

        if results.iter().any(Result::is_err) {
            return Ok(results
                .into_iter()
                .map(|result| result.and(Err(SpecWriteFailure::RolledBack)))
                .collect());
        }

        for (id, fulfilment) in staged {
            if let Some(spec) = tables.transfer_specs.get_mut(&id) {
                spec.fulfilment = Some(fulfilment.to_string());
            }
        }
        Ok(results)
    }

    async fn save_funding_spec(&self, spec: FundingSpec) -> Result<SpecWrite, StoreError> {
        let mut tables = self.tables()?;
        Ok(match tables.funding_specs.entry(spec.transfer_id) {
            Entry::Occupied(_) => SpecWrite::Unchanged,
            Entry::Vacant(slot) => {
                slot.insert(spec);
                SpecWrite::Written
            }
        })
    }

    async fn get_funding_spec(&self, transfer_id: Uuid) -> Result<Option<FundingSpec>, StoreError> {
        Ok(self.tables()?.funding_specs.get(&transfer_id).cloned())
    }

    async fn upsert_net_debit_cap(&self, spec: NetDebitCapSpec) -> Result<(), StoreError> {
        self.tables()?
            .net_debit_caps
            .insert((spec.participant_id, spec.currency), spec.cap);
        Ok(())
    }

    async fn get_net_debit_caps(
        &self,
        queries: &[NetDebitCapQuery],
    ) -> Result<Vec<Result<NetDebitCapSpec, LookupFailure>>, StoreError> {
        let tables = self.tables()?;
        Ok(queries
            .iter()
            .map(|query| {
                let key = (query.participant_id.clone(), query.currency.clone());
                match tables.net_debit_caps.get(&key) {
                    Some(cap) => Ok(NetDebitCapSpec {
                        participant_id: query.participant_id.clone(),
                        currency: query.currency.clone(),
                        cap: *cap,
                    }),
                    None => Err(LookupFailure::NetDebitCapNotFound {
                        participant_id: query.participant_id.clone(),
                        currency: query.currency.clone(),
                    }),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ParticipantRejection;

    fn account_spec(participant: &str, base: u128) -> AccountSpec {
        AccountSpec {
            participant_id: participant.into(),
            currency: "USD".into(),
            collateral: base + 1,
            reserve: base + 2,
            clearing: base + 3,
            settlement: base + 4,
        }
    }

    fn transfer_spec(id: Uuid) -> TransferSpec {
        TransferSpec {
            id,
            currency: "USD".into(),
            amount: "10.00".into(),
            payer_id: "dfsp1".into(),
            payee_id: "dfsp2".into(),
            condition: "abcd".into(),
            ilp_packet: "packet".into(),
            fulfilment: None,
        }
    }

    #[tokio::test]
    async fn one_active_account_spec_per_pair() {
        let store = MemorySpecStore::new();
        assert_eq!(store.get_account_spec("dfsp1", "USD").await.unwrap(), None);

        assert_eq!(
            store.associate_accounts(account_spec("dfsp1", 10)).await.unwrap(),
            Association::Associated
        );
        assert_eq!(
            store.associate_accounts(account_spec("dfsp1", 20)).await.unwrap(),
            Association::AlreadyActive(account_spec("dfsp1", 10))
        );
        assert_eq!(store.account_specs().await.unwrap(), vec![account_spec("dfsp1", 10)]);

        let changed = store.tombstone_accounts(&account_spec("dfsp1", 10)).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(store.get_account_spec("dfsp1", "USD").await.unwrap(), None);
        assert_eq!(
            store.associate_accounts(account_spec("dfsp1", 20)).await.unwrap(),
            Association::Associated
        );
        assert_eq!(
            store.get_account_spec("dfsp1", "USD").await.unwrap(),
            Some(account_spec("dfsp1", 20))
        );
        assert_eq!(store.account_spec_queries(), 3);
    }

    #[tokio::test]
    async fn other_currencies_do_not_block_association() {
        let store = MemorySpecStore::new();
        store.associate_accounts(account_spec("dfsp1", 10)).await.unwrap();
        let mut kes = account_spec("dfsp1", 20);
        kes.currency = "KES".into();
        assert_eq!(
            store.associate_accounts(kes.clone()).await.unwrap(),
            Association::Associated
        );
        assert_eq!(store.get_account_spec("dfsp1", "KES").await.unwrap(), Some(kes));
    }

    #[tokio::test]
    async fn tombstone_requires_every_id_to_match() {
        let store = MemorySpecStore::new();
        store.associate_accounts(account_spec("dfsp1", 10)).await.unwrap();

        let mut other = account_spec("dfsp1", 10);
        other.settlement = 999;
        assert_eq!(store.tombstone_accounts(&other).await.unwrap(), 0);
        assert!(store.get_account_spec("dfsp1", "USD").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn account_specs_scan_is_ordered() {
        let store = MemorySpecStore::new();
        store.associate_accounts(account_spec("dfsp2", 20)).await.unwrap();
        store.associate_accounts(account_spec("dfsp1", 10)).await.unwrap();
        store.tombstone_accounts(&account_spec("dfsp1", 10)).await.unwrap();
        store.associate_accounts(account_spec("dfsp1", 30)).await.unwrap();

        let specs = store.account_specs().await.unwrap();
        assert_eq!(specs, vec![account_spec("dfsp1", 30), account_spec("dfsp2", 20)]);
    }

    #[tokio::test]
    async fn save_transfer_spec_ignores_conflicts() {
        let store = MemorySpecStore::new();
        let id = Uuid::new_v4();
        let mut changed = transfer_spec(id);
        changed.amount = "99.00".into();

        let results = store
            .save_transfer_spec(&[transfer_spec(id), changed])
            .await
            .unwrap();
        assert_eq!(results, vec![Ok(SpecWrite::Written), Ok(SpecWrite::Unchanged)]);

        let stored = store.lookup_transfer_spec(&[id]).await.unwrap();
        assert_eq!(stored[0].as_ref().unwrap().amount, "10.00");
    }

    #[tokio::test]
    async fn attach_fulfilment_is_atomic() {
        let store = MemorySpecStore::new();
        let (known, unknown) = (Uuid::new_v4(), Uuid::new_v4());
        store.save_transfer_spec(&[transfer_spec(known)]).await.unwrap();

        let results = store
            .attach_transfer_spec_fulfilment(&[
                FulfilmentAttachment { id: known, fulfilment: "ff".into() },
                FulfilmentAttachment { id: unknown, fulfilment: "ee".into() },
            ])
            .await
            .unwrap();
        assert_eq!(
            results,
            vec![
                Err(SpecWriteFailure::RolledBack),
                Err(SpecWriteFailure::NotFound(unknown)),
            ]
        );
        let stored = store.lookup_transfer_spec(&[known]).await.unwrap();
        assert_eq!(stored[0].as_ref().unwrap().fulfilment, None);
    }

    #[tokio::test]
    async fn attach_fulfilment_once() {
        let store = MemorySpecStore::new();
        let id = Uuid::new_v4();
        store.save_transfer_spec(&[transfer_spec(id)]).await.unwrap();

        let attach = |fulfilment: &str| FulfilmentAttachment { id, fulfilment: fulfilment.into() };
        assert_eq!(
            store.attach_transfer_spec_fulfilment(&[attach("ff")]).await.unwrap(),
            vec![Ok(SpecWrite::Written)]
        );
        assert_eq!(
            store.attach_transfer_spec_fulfilment(&[attach("ff")]).await.unwrap(),
            vec![Ok(SpecWrite::Unchanged)]
        );
        assert_eq!(
            store.attach_transfer_spec_fulfilment(&[attach("ee")]).await.unwrap(),
            vec![Err(SpecWriteFailure::FulfilmentConflict(id))]
        );

        let stored = store.lookup_transfer_spec(&[id]).await.unwrap()[0].clone().unwrap();
        assert_eq!(stored.fulfilment.as_deref(), Some("ff"));
        assert_eq!(stored.amount, "10.00");
        assert_eq!(stored.condition, "abcd");
    }

    #[tokio::test]
    async fn net_debit_cap_absence_is_a_failure() {
        let store = MemorySpecStore::new();
        store
            .upsert_net_debit_cap(NetDebitCapSpec {
                participant_id: "dfsp1".into(),
                currency: "USD".into(),
                cap: NetDebitCap::Limited(500),
            })
            .await
            .unwrap();
        store
            .upsert_net_debit_cap(NetDebitCapSpec {
                participant_id: "dfsp1".into(),
                currency: "USD".into(),
                cap: NetDebitCap::Unlimited,
            })
            .await
            .unwrap();

        let query = |p: &str| NetDebitCapQuery { participant_id: p.into(), currency: "USD".into() };
        let results = store
            .get_net_debit_caps(&[query("dfsp1"), query("dfsp2")])
            .await
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap().cap, NetDebitCap::Unlimited);
        assert!(matches!(
            results[1],
            Err(LookupFailure::NetDebitCapNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn funding_spec_is_insert_once() {
        let store = MemorySpecStore::new();
        let spec = FundingSpec {
            transfer_id: Uuid::new_v4(),
            participant_id: "dfsp1".into(),
            currency: "USD".into(),
            action: crate::model::FundingAction::Deposit,
            amount: "10".into(),
            reason: "initial".into(),
        };
        assert_eq!(store.save_funding_spec(spec.clone()).await.unwrap(), SpecWrite::Written);

        let mut changed = spec.clone();
        changed.reason = "other".into();
        assert_eq!(store.save_funding_spec(changed).await.unwrap(), SpecWrite::Unchanged);
        assert_eq!(store.get_funding_spec(spec.transfer_id).await.unwrap(), Some(spec));
    }

    #[tokio::test]
    async fn validate_participants_stops_at_first_failure() {
        let store = MemorySpecStore::new();
        let check = |payer: &'static str, payee: &'static str| {
            let store = &store;
            async move {
                store
                    .validate_transfer_participants(payer, payee, "USD")
                    .await
                    .unwrap()
            }
        };

        assert_eq!(
            check("dfsp1", "dfsp2").await,
            Err(ParticipantRejection::PayerNotFound("dfsp1".into()))
        );

        store.save_participant(Participant::new("dfsp1")).await.unwrap();
        assert_eq!(
            check("dfsp1", "dfsp2").await,
            Err(ParticipantRejection::PayeeNotFound("dfsp2".into()))
        );

        store.save_participant(Participant::new("dfsp2")).await.unwrap();
        assert_eq!(
            check("dfsp1", "dfsp2").await,
            Err(ParticipantRejection::PayerAccountsNotFound("dfsp1".into(), "USD".into()))
        );

        store.associate_accounts(account_spec("dfsp1", 10)).await.unwrap();
        assert_eq!(
            check("dfsp1", "dfsp2").await,
            Err(ParticipantRejection::PayeeAccountsNotFound("dfsp2".into(), "USD".into()))
        );

        store.associate_accounts(account_spec("dfsp2", 20)).await.unwrap();
        let parties = check("dfsp1", "dfsp2").await.unwrap();
        assert_eq!(parties.payer.clearing, 13);
        assert_eq!(parties.payee.clearing, 23);
    }

    #[tokio::test]
    async fn unavailable_store_fails_calls() {
        let store = MemorySpecStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_account_spec("dfsp1", "USD").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
