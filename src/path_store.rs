//! Path Store: a bounded, ranked pool of candidate path segments. The
//! fidelity formula, the disjointness computation, and the ascending-sort
//! eviction rule are fixed by the selection policy and applied here.

use std::sync::Arc;

use crate::pcb::PathSegment;
use crate::policy::PathPolicy;

#[derive(Debug, Clone)]
pub struct PathStoreRecord {
    pub pcb: Arc<PathSegment>,
    pub id: u64,
    pub peer_links: usize,
    pub hops_length: usize,
    pub delay_time: u64,
    pub disjointness: u64,
    pub fidelity: f64,
    pub last_sent_time: u64,
    pub last_seen_time: u64,
    pub guaranteed_bandwidth: f64,
    pub available_bandwidth: f64,
    pub total_bandwidth: f64,
}

impl PathStoreRecord {
    /// `now` and `origin_timestamp` are both epoch seconds; `origin_timestamp`
    /// is the PCB's reconstructed origination time (see `PathSegment::timestamp`).
    pub fn new(pcb: Arc<PathSegment>, now: u64, origin_timestamp: u64) -> Self {
        let id = pcb.segment_id();
        let peer_links = pcb.n_peer_links();
        let hops_length = pcb.n_hops();
        let delay_time = now.saturating_sub(origin_timestamp);
        Self {
            pcb,
            id,
            peer_links,
            hops_length,
            delay_time,
            disjointness: 0,
            fidelity: 0.0,
            last_sent_time: 0,
            last_seen_time: now,
            guaranteed_bandwidth: 0.0,
            available_bandwidth: 0.0,
            total_bandwidth: 0.0,
        }
    }

    /// Fixed-order additive fidelity formula.
    pub fn update_fidelity(&mut self, policy: &PathPolicy, now: u64) {
        let hops_length = self.hops_length.max(1) as f64;
        let delay_time = self.delay_time.max(1) as f64;
        let sent_delta = now.saturating_sub(self.last_sent_time) as f64;

        self.fidelity = policy.weight("PeerLinks") * self.peer_links as f64
            + policy.weight("HopsLength") / hops_length
            + policy.weight("Disjointness") * self.disjointness as f64
            + policy.weight("LastSentTime") * sent_delta * sent_delta
            + policy.weight("LastSeenTime") * self.last_seen_time as f64
            + policy.weight("DelayTime") / delay_time
            + policy.weight("GuaranteedBandwidth") * self.guaranteed_bandwidth
            + policy.weight("AvailableBandwidth") * self.available_bandwidth
            + policy.weight("TotalBandwidth") * self.total_bandwidth;
    }
}

pub struct PathStore {
    policy: PathPolicy,
    candidates: Vec<PathStoreRecord>,
    best_paths_history: Vec<Vec<PathStoreRecord>>,
}

impl PathStore {
    pub fn new(policy: PathPolicy) -> Self {
        Self {
            policy,
            candidates: Vec::new(),
            best_paths_history: Vec::new(),
        }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Inserts `record`, recomputes disjointness/fidelity over the whole
    /// pool, re-sorts ascending by fidelity, and evicts the lowest-fidelity
    /// entry if the pool is over `candidates_set_size`.
    pub fn add_record(&mut self, mut record: PathStoreRecord, now: u64) {
        if let Some(pos) = self.candidates.iter().position(|r| r.id == record.id) {
            record.last_sent_time = self.candidates[pos].last_sent_time;
            self.candidates.remove(pos);
        }
        self.candidates.push(record);

        self.update_all_disjointness();
        for rec in &mut self.candidates {
            rec.update_fidelity(&self.policy, now);
        }

        self.candidates
            .sort_by(|a, b| a.fidelity.partial_cmp(&b.fidelity).unwrap_or(std::cmp::Ordering::Equal));

        if self.candidates.len() > self.policy.candidates_set_size {
            self.candidates.remove(0);
        }
    }

    /// Records that the candidate with this `id`, if still present, has just
    /// been propagated — feeds the `LastSentTime` fidelity term on its next
    /// recomputation.
    pub fn mark_sent(&mut self, id: u64, now: u64) {
        if let Some(record) = self.candidates.iter_mut().find(|r| r.id == id) {
            record.last_sent_time = now;
        }
    }

    fn update_all_disjointness(&mut self) {
        let mut ad_counts: std::collections::HashMap<u32, u64> = std::collections::HashMap::new();
        for record in &self.candidates {
            for ad in &record.pcb.ads {
                *ad_counts.entry(ad.pcbm.ad_id).or_insert(0) += 1;
            }
        }
        for record in &mut self.candidates {
            record.disjointness = record
                .pcb
                .ads
                .iter()
                .map(|ad| *ad_counts.get(&ad.pcbm.ad_id).unwrap_or(&0))
                .sum();
        }
    }

    /// First `k` records — the lowest-fidelity end of the ascending sort.
    pub fn get_candidates(&self, k: usize) -> Vec<&PathStoreRecord> {
        self.candidates.iter().take(k).collect()
    }

    /// Top `k` records by descending fidelity.
    pub fn get_paths(&self, k: usize) -> Vec<&PathStoreRecord> {
        self.candidates.iter().rev().take(k).collect()
    }

    pub fn get_last_selection(&self, k: usize) -> Vec<&PathStoreRecord> {
        self.best_paths_history
            .first()
            .map(|selection| selection.iter().take(k).collect())
            .unwrap_or_default()
    }

    /// Snapshots the current top-`k` into `best_paths_history` and clears the
    /// candidate pool. `history_limit == 0` means unbounded, matching the
    /// policy default; otherwise the oldest selection is dropped once the
    /// limit is exceeded.
    pub fn store_selection(&mut self, k: usize) {
        let selection: Vec<PathStoreRecord> = self.get_paths(k).into_iter().cloned().collect();
        self.best_paths_history.insert(0, selection);
        if self.policy.history_limit > 0 {
            self.best_paths_history.truncate(self.policy.history_limit);
        }
        self.candidates.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcb::{AdMarking, HopOpaqueField, InfoOpaqueField, OpaqueFieldType, PcbMarking, RotField, SupportPcbField};
    use pretty_assertions::assert_eq;

    fn pcb_with_hops(ad_ids: &[u32]) -> Arc<PathSegment> {
        let mut pcb = PathSegment {
            iof: InfoOpaqueField {
                of_type: OpaqueFieldType::TdcXovr,
                up_flag: false,
                timestamp: 0,
                isd_id: 1,
            },
            rotf: RotField::default(),
            ads: Vec::new(),
        };
        for (i, ad_id) in ad_ids.iter().enumerate() {
            pcb.ads.push(AdMarking {
                pcbm: PcbMarking {
                    ad_id: *ad_id,
                    ssf: 0,
                    hof: HopOpaqueField {
                        ingress_if: i as u16,
                        egress_if: i as u16 + 1,
                    },
                    spcbf: SupportPcbField { isd_id: 1 },
                },
                pms: vec![],
                sig: None,
            });
        }
        Arc::new(pcb)
    }

    fn policy_with_weight(key: &str, value: f64) -> PathPolicy {
        let mut policy = PathPolicy::default();
        policy.property_weights.insert(key.to_string(), value);
        policy
    }

    #[test]
    fn ranking_prefers_fewer_hops_with_positive_hops_weight() {
        let mut store = PathStore::new(policy_with_weight("HopsLength", 1.0));
        for n in [5, 3, 4] {
            let ad_ids: Vec<u32> = (0..n).collect();
            let pcb = pcb_with_hops(&ad_ids);
            let record = PathStoreRecord::new(pcb, 1000, 1000);
            store.add_record(record, 1000);
        }
        let ranked: Vec<usize> = store.get_paths(3).into_iter().map(|r| r.hops_length).collect();
        assert_eq!(ranked, vec![3, 4, 5]);
    }

    #[test]
    fn eviction_drops_lowest_fidelity_first() {
        let mut policy = PathPolicy::default();
        policy.candidates_set_size = 2;
        let mut store = PathStore::new(policy);

        for ad_id in [1u32, 2, 3] {
            let pcb = pcb_with_hops(&[ad_id]);
            let mut record = PathStoreRecord::new(pcb, 1000, 1000);
            record.fidelity = ad_id as f64 / 10.0;
            store.candidates.push(record);
            store.candidates.sort_by(|a, b| a.fidelity.partial_cmp(&b.fidelity).unwrap());
            if store.candidates.len() > store.policy.candidates_set_size {
                store.candidates.remove(0);
            }
        }
        assert_eq!(store.len(), 2);
        let remaining: Vec<f64> = store.candidates.iter().map(|r| r.fidelity).collect();
        assert_eq!(remaining, vec![0.2, 0.3]);
    }

    #[test]
    fn disjointness_counts_shared_ad_ids_across_candidates() {
        let mut store = PathStore::new(PathPolicy::default());
        store.add_record(PathStoreRecord::new(pcb_with_hops(&[1, 2]), 1000, 1000), 1000);
        store.add_record(PathStoreRecord::new(pcb_with_hops(&[2, 3]), 1000, 1000), 1000);
        for record in &store.candidates {
            if record.pcb.ads.iter().any(|a| a.pcbm.ad_id == 2) {
                assert!(record.disjointness >= 2);
            }
        }
    }

    #[test]
    fn dedup_by_id_preserves_last_sent_time() {
        let mut store = PathStore::new(PathPolicy::default());
        let pcb = pcb_with_hops(&[7, 8]);
        let mut first = PathStoreRecord::new(pcb.clone(), 1000, 1000);
        first.last_sent_time = 555;
        store.add_record(first, 1000);

        let second = PathStoreRecord::new(pcb, 2000, 1000);
        store.add_record(second, 2000);

        assert_eq!(store.len(), 1);
        assert_eq!(store.candidates[0].last_sent_time, 555);
    }

    #[test]
    fn store_selection_truncates_history_when_limit_set() {
        let mut policy = PathPolicy::default();
        policy.history_limit = 1;
        let mut store = PathStore::new(policy);
        store.add_record(PathStoreRecord::new(pcb_with_hops(&[1]), 1000, 1000), 1000);
        store.store_selection(10);
        store.add_record(PathStoreRecord::new(pcb_with_hops(&[2]), 1000, 1000), 1000);
        store.store_selection(10);
        assert_eq!(store.best_paths_history.len(), 1);
    }
}
