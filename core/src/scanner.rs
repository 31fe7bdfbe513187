use std::collections::HashSet;
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::chain::ChainClient;
use crate::errors::ChainError;
use crate::state::HolderRecord;

/// Lists every token account of a mint under one token program.
pub struct HolderScanner {
    chain: Arc<dyn ChainClient>,
    program_id: Pubkey,
}

impl HolderScanner {
    pub fn new(chain: Arc<dyn ChainClient>, program_id: Pubkey) -> Self {
        Self { chain, program_id }
    }

    /// Undecodable accounts are skipped, repeated addresses keep their first
    /// decodable record.
    pub async fn scan(&self, mint: &Pubkey) -> Result<Vec<HolderRecord>, ChainError> {
        let accounts = self
            .chain
            .scan_accounts_by_mint(&self.program_id, mint)
            .await?;
        let fetched = accounts.len();

        let mut seen = HashSet::with_capacity(fetched);
        let mut records = Vec::with_capacity(fetched);
        for (address, data) in accounts {
            let record = match HolderRecord::decode(address, &data) {
                Ok(record) => record,
                Err(err) => {
                    warn!(account = %address, "skipping undecodable token account: {}", err);
                    continue;
                }
            };
            if !seen.insert(address) {
                debug!(account = %address, "duplicate account in scan result");
                continue;
            }
            records.push(record);
        }

        debug!(mint = %mint, fetched, decoded = records.len(), "holder scan complete");
        Ok(records)
    }
}
