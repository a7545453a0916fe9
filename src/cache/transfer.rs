use std::collections::{HashMap, VecDeque};

use uuid::Uuid;

use crate::model::{FulfilmentAttachment, TransferSpec};

/// Bounded transfer id → [`TransferSpec`] map with FIFO eviction.
///
/// Eviction follows insertion order only; reading an entry does not keep it
/// alive. Deleted ids leave a stale slot in `order` that `sweep` skips: a slot
/// is live only while its sequence number matches the entry's.
#[derive(Debug)]
pub struct TransferSpecCache {
    entries: HashMap<Uuid, (u64, TransferSpec)>,
    order: VecDeque<(u64, Uuid)>,
    next_seq: u64,
    max_size: usize,
}

impl TransferSpecCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
            max_size,
        }
    }

    /// One slot per requested id, in request order.
    pub fn get(&self, ids: &[Uuid]) -> Vec<Option<TransferSpec>> {
        ids.iter()
            .map(|id| self.entries.get(id).map(|(_, spec)| spec.clone()))
            .collect()
    }

    /// Insert specs whose id is not cached yet; cached entries are never
    /// overwritten.
    pub fn put(&mut self, specs: impl IntoIterator<Item = TransferSpec>) {
        for spec in specs {
            if self.entries.contains_key(&spec.id) {
                continue;
            }
            let seq = self.next_seq;
            self.next_seq += 1;
            self.order.push_back((seq, spec.id));
            self.entries.insert(spec.id, (seq, spec));
        }
        self.sweep();
    }

    /// Set the fulfilment of entries already cached; misses are ignored.
    pub fn put_fulfilment(&mut self, attachments: &[FulfilmentAttachment]) {
        for attachment in attachments {
            if let Some((_, spec)) = self.entries.get_mut(&attachment.id) {
                spec.fulfilment = Some(attachment.fulfilment.clone());
            }
        }
    }

    pub fn delete(&mut self, ids: &[Uuid]) {
        for id in ids {
            self.entries.remove(id);
        }
        self.compact();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest live entries beyond `max_size`.
    fn sweep(&mut self) {
        while self.entries.len() > self.max_size {
            let Some((seq, oldest)) = self.order.pop_front() else {
                break;
            };
            if self.entries.get(&oldest).is_some_and(|(live, _)| *live == seq) {
                self.entries.remove(&oldest);
            }
        }
        self.compact();
    }

    /// Rebuild `order` once stale slots outnumber live ones.
    fn compact(&mut self) {
        if self.order.len() <= self.entries.len().max(1) * 2 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(seq, id)| entries.get(id).is_some_and(|(live, _)| live == seq));
    }

    #[cfg(test)]
    fn slots(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(id: Uuid, amount: &str) -> TransferSpec {
        TransferSpec {
            id,
            currency: "USD".into(),
            amount: amount.into(),
            payer_id: "dfsp1".into(),
            payee_id: "dfsp2".into(),
            condition: "c0ffee".into(),
            ilp_packet: "packet".into(),
            fulfilment: None,
        }
    }

    #[test]
    fn get_preserves_request_order() {
        let mut cache = TransferSpecCache::new(10);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.put([spec(a, "1"), spec(c, "3")]);

        let found = cache.get(&[c, b, a]);
        assert_eq!(found[0].as_ref().unwrap().amount, "3");
        assert!(found[1].is_none());
        assert_eq!(found[2].as_ref().unwrap().amount, "1");
    }

    #[test]
    fn first_write_wins() {
        let mut cache = TransferSpecCache::new(10);
        let id = Uuid::new_v4();
        cache.put([spec(id, "10")]);
        cache.put([spec(id, "999")]);

        assert_eq!(cache.get(&[id])[0].as_ref().unwrap().amount, "10");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn put_fulfilment_only_touches_fulfilment_of_cached_entries() {
        let mut cache = TransferSpecCache::new(10);
        let (cached, missing) = (Uuid::new_v4(), Uuid::new_v4());
        cache.put([spec(cached, "10")]);

        cache.put_fulfilment(&[
            FulfilmentAttachment { id: cached, fulfilment: "ff".into() },
            FulfilmentAttachment { id: missing, fulfilment: "ee".into() },
        ]);

        let entry = cache.get(&[cached])[0].clone().unwrap();
        assert_eq!(entry.fulfilment.as_deref(), Some("ff"));
        assert_eq!(entry.amount, "10");
        assert_eq!(entry.condition, "c0ffee");
        assert!(cache.get(&[missing])[0].is_none());
    }

    #[test]
    fn overflow_evicts_oldest_inserted() {
        let max = 5;
        let mut cache = TransferSpecCache::new(max);
        let ids: Vec<Uuid> = (0..=max).map(|_| Uuid::new_v4()).collect();

        for id in &ids[..max] {
            cache.put([spec(*id, "1")]);
        }
        // reading the oldest entry does not protect it
        assert!(cache.get(&[ids[0]])[0].is_some());

        cache.put([spec(ids[max], "1")]);

        assert_eq!(cache.len(), max);
        assert!(cache.get(&[ids[0]])[0].is_none());
        assert!(cache.get(&ids[1..]).iter().all(Option::is_some));
    }

    #[test]
    fn delete_removes_entry_and_eviction_slot() {
        let mut cache = TransferSpecCache::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.put([spec(a, "1"), spec(b, "2")]);
        cache.delete(&[a]);
        cache.put([spec(c, "3")]);

        // a's slot is gone, so b survives the insert of c
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[b])[0].is_some());
        assert!(cache.get(&[c])[0].is_some());
    }

    #[test]
    fn reinserted_id_is_evicted_by_its_new_position() {
        let mut cache = TransferSpecCache::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.put([spec(a, "1"), spec(b, "2")]);
        cache.delete(&[a]);
        cache.put([spec(a, "10")]);
        cache.put([spec(c, "3")]);

        // a now sits after b, so b is the oldest
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&[b])[0].is_none());
        assert_eq!(cache.get(&[a])[0].as_ref().unwrap().amount, "10");
        assert!(cache.get(&[c])[0].is_some());
    }

    #[test]
    fn stale_slots_are_compacted() {
        let mut cache = TransferSpecCache::new(1_000);
        let ids: Vec<Uuid> = (0..100).map(|_| Uuid::new_v4()).collect();
        cache.put(ids.iter().map(|id| spec(*id, "1")));
        cache.delete(&ids[..90]);

        assert_eq!(cache.len(), 10);
        assert!(cache.slots() <= 20);
        assert!(cache.get(&ids[90..]).iter().all(Option::is_some));
    }
}
