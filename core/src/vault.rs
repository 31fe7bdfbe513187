use solana_sdk::pubkey::Pubkey;
use tracing::info;

use crate::state::{HolderRecord, PoolVariant, VaultBinding};

/// Finds the pool vault among scanned holders. Binds at most once.
#[derive(Debug, Clone)]
pub struct VaultDetector {
    authorities: Vec<Pubkey>,
    binding: Option<VaultBinding>,
}

impl VaultDetector {
    pub fn new(authorities: Vec<Pubkey>) -> Self {
        Self {
            authorities,
            binding: None,
        }
    }

    /// Binds the first record owned by a pool authority. Returns the binding
    /// only when this call created it.
    pub fn observe(&mut self, records: &[HolderRecord]) -> Option<VaultBinding> {
        if self.binding.is_some() {
            return None;
        }
        let binding = records.iter().find_map(|record| {
            self.authorities
                .iter()
                .position(|authority| *authority == record.owner)
                .map(|index| VaultBinding {
                    vault: record.address,
                    authority: record.owner,
                    variant: PoolVariant::from_authority_index(index),
                })
        })?;
        info!(
            vault = %binding.vault,
            pool = binding.variant.label(),
            "pool vault detected"
        );
        self.binding = Some(binding);
        Some(binding)
    }

    pub fn binding(&self) -> Option<&VaultBinding> {
        self.binding.as_ref()
    }
}
