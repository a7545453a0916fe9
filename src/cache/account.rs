use std::collections::HashMap;

use super::CacheError;
use crate::model::{AccountSpec, Currency, ParticipantId};

/// (participant, currency) → account ids.
///
/// Entries never expire: one participant/currency pair keeps its accounts
/// until a write invalidates the key.
#[derive(Debug, Default)]
pub struct AccountSpecCache {
    entries: HashMap<(ParticipantId, Currency), AccountSpec>,
}

impl AccountSpecCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, participant_id: &str, currency: &str) -> Option<&AccountSpec> {
        self.entries
            .get(&(participant_id.to_string(), currency.to_string()))
    }

    pub fn put(
        &mut self,
        participant_id: &str,
        currency: &str,
        spec: AccountSpec,
    ) -> Result<(), CacheError> {
        if spec.participant_id != participant_id || spec.currency != currency {
            return Err(CacheError::KeyMismatch {
                key: format!("{participant_id}/{currency}"),
                found: format!("{}/{}", spec.participant_id, spec.currency),
            });
        }
        if spec.account_ids().contains(&0) {
            return Err(CacheError::ZeroAccountId(format!("{participant_id}/{currency}")));
        }

        self.entries
            .insert((participant_id.to_string(), currency.to_string()), spec);
        Ok(())
    }

    pub fn delete(&mut self, participant_id: &str, currency: &str) {
        self.entries
            .remove(&(participant_id.to_string(), currency.to_string()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
