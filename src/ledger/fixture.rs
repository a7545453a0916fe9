//! Test wiring of a ledger over the in-memory engine and store.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::Ledger;
use crate::batcher::Batcher;
use crate::config::Config;
use crate::engine::MemoryEngine;
use crate::model::{AccountSpec, FundingAction, FundingRequest, Money, PrepareRequest};
use crate::store::{CachedSpecStore, MemorySpecStore};

pub(crate) struct Harness {
    pub ledger: Ledger,
    pub engine: Arc<MemoryEngine>,
    /// Durable layer under the ledger's cache, for asserting on queries.
    pub store: Arc<MemorySpecStore>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_engine(Arc::new(MemoryEngine::new()))
    }

    pub fn with_engine(engine: Arc<MemoryEngine>) -> Self {
        let config = Config {
            batch_size: 64,
            flush_interval_ms: 1,
            ..Config::default()
        };
        let store = Arc::new(MemorySpecStore::new());
        let cached = Arc::new(CachedSpecStore::new(store.clone(), config.transfer_cache_max));
        let batcher = Batcher::spawn(engine.clone(), config.batcher());
        let ledger = Ledger::new(config, cached, engine.clone(), batcher);
        Self {
            ledger,
            engine,
            store,
        }
    }

    pub async fn onboarded(&self, participant_id: &str) -> AccountSpec {
        self.ledger
            .onboard_participant(participant_id, "USD")
            .await
            .unwrap()
            .spec()
            .clone()
    }

    /// Onboard in USD and move `liquidity` all the way into clearing.
    pub async fn funded(&self, participant_id: &str, liquidity: &str) -> AccountSpec {
        let spec = self.onboarded(participant_id).await;
        if liquidity.trim_start_matches(['0', '.']).is_empty() {
            return spec;
        }
        for action in [FundingAction::Deposit, FundingAction::AllocateLiquidity] {
            self.ledger
                .fund(funding_request(participant_id, action, liquidity))
                .await
                .unwrap()
                .unwrap();
        }
        spec
    }
}

pub(crate) fn prepare_request(
    id: Uuid,
    payer: &str,
    payee: &str,
    amount: &str,
    currency: &str,
) -> PrepareRequest {
    PrepareRequest {
        transfer_id: Some(id.to_string()),
        payer_id: Some(payer.into()),
        payee_id: Some(payee.into()),
        amount: Some(Money {
            currency: currency.into(),
            amount: amount.into(),
        }),
        condition: condition_for(
            "0102030405060708091011121314151617181920212223242526272829303132",
        ),
        ilp_packet: "AYIBgQAAAAAAAASw".into(),
    }
}

pub(crate) fn funding_request(
    participant_id: &str,
    action: FundingAction,
    amount: &str,
) -> FundingRequest {
    FundingRequest {
        transfer_id: Uuid::new_v4(),
        participant_id: participant_id.into(),
        currency: "USD".into(),
        amount: amount.into(),
        action,
        reason: format!("{action} in test"),
    }
}

pub(crate) fn condition_for(fulfilment: &str) -> String {
    let preimage = hex::decode(fulfilment).unwrap();
    hex::encode(Sha256::digest(&preimage))
}
