use std::collections::{BTreeSet, HashSet};

use solana_sdk::pubkey::Pubkey;

use crate::state::HolderRecord;

/// Owners that are never frozen: the configured whitelist, every pool
/// authority and the freeze authority itself.
#[derive(Debug, Clone, Default)]
pub struct EffectiveWhitelist {
    owners: BTreeSet<Pubkey>,
}

impl EffectiveWhitelist {
    pub fn new<'a>(
        configured: impl IntoIterator<Item = &'a Pubkey>,
        pool_authorities: impl IntoIterator<Item = &'a Pubkey>,
        signer: Pubkey,
    ) -> Self {
        let mut owners: BTreeSet<Pubkey> = configured.into_iter().copied().collect();
        owners.extend(pool_authorities.into_iter().copied());
        owners.insert(signer);
        Self { owners }
    }

    pub fn contains(&self, owner: &Pubkey) -> bool {
        self.owners.contains(owner)
    }

    pub(crate) fn len(&self) -> usize {
        self.owners.len()
    }
}

#[derive(Debug, Clone)]
pub struct CandidateSelector {
    mint: Pubkey,
    threshold_raw: u64,
    whitelist: EffectiveWhitelist,
}

impl CandidateSelector {
    pub fn new(mint: Pubkey, threshold_raw: u64, whitelist: EffectiveWhitelist) -> Self {
        Self {
            mint,
            threshold_raw,
            whitelist,
        }
    }

    pub fn is_candidate(&self, record: &HolderRecord) -> bool {
        record.is_initialized()
            && record.mint == self.mint
            && !self.whitelist.contains(&record.owner)
            && record.amount >= self.threshold_raw
    }

    /// Candidate addresses in scan order, without repeats.
    pub fn select(&self, records: &[HolderRecord]) -> Vec<Pubkey> {
        let mut seen = HashSet::new();
        records
            .iter()
            .filter(|record| self.is_candidate(record))
            .map(|record| record.address)
            .filter(|address| seen.insert(*address))
            .collect()
    }
}
