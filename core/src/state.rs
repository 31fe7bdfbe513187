use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use spl_token_2022::solana_program::program_pack::Pack;
use spl_token_2022::state::{Account as TokenAccount, AccountState};

use crate::constants::{LEGACY_POOL_LABEL, STANDARD_POOL_LABEL, TOKEN_ACCOUNT_LEN};

/// Mint fields the engine needs, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintInfo {
    pub address: Pubkey,
    pub program_id: Pubkey,
    pub decimals: u8,
    pub supply: u64,
    pub mint_authority: Option<Pubkey>,
    pub freeze_authority: Option<Pubkey>,
    pub is_initialized: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HolderState {
    Uninitialized,
    Initialized,
    Frozen,
}

impl From<AccountState> for HolderState {
    fn from(state: AccountState) -> Self {
        match state {
            AccountState::Uninitialized => HolderState::Uninitialized,
            AccountState::Initialized => HolderState::Initialized,
            AccountState::Frozen => HolderState::Frozen,
        }
    }
}

/// One token account of the target mint, as seen by a single scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolderRecord {
    pub address: Pubkey,
    pub owner: Pubkey,
    pub mint: Pubkey,
    pub amount: u64,
    pub state: HolderState,
}

impl HolderRecord {
    /// Decodes the base token-account layout. Extension data past the base
    /// layout is ignored.
    pub fn decode(address: Pubkey, data: &[u8]) -> Result<Self, String> {
        let base_len = TOKEN_ACCOUNT_LEN as usize;
        if data.len() < base_len {
            return Err(format!(
                "expected at least {} bytes, got {}",
                base_len,
                data.len()
            ));
        }
        let account = TokenAccount::unpack_from_slice(&data[..base_len])
            .map_err(|err| err.to_string())?;
        Ok(Self {
            address,
            owner: account.owner,
            mint: account.mint,
            amount: account.amount,
            state: account.state.into(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.state == HolderState::Initialized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolVariant {
    Legacy,
    Standard,
}

impl PoolVariant {
    /// Index 0 of the pool-authority list is the legacy pool program.
    pub fn from_authority_index(index: usize) -> Self {
        if index == 0 {
            PoolVariant::Legacy
        } else {
            PoolVariant::Standard
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PoolVariant::Legacy => LEGACY_POOL_LABEL,
            PoolVariant::Standard => STANDARD_POOL_LABEL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultBinding {
    pub vault: Pubkey,
    pub authority: Pubkey,
    pub variant: PoolVariant,
}
