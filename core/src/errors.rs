use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Failures reported by a [`crate::chain::ChainClient`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("account not found: {0}")]
    NotFound(Pubkey),

    #[error("account {0} is not a token mint")]
    NotAMint(Pubkey),

    #[error("transaction simulation failed: {0}")]
    Simulation(String),

    #[error("timed out waiting for confirmation: {0}")]
    Timeout(String),

    #[error("transaction already processed: {0}")]
    Duplicate(String),

    #[error("blockhash expired or not found: {0}")]
    StaleBlockhash(String),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("subscription failed: {0}")]
    Subscription(String),

    #[error("rpc node error: {0}")]
    Node(String),
}

impl ChainError {
    pub fn is_stale_blockhash(&self) -> bool {
        matches!(self, ChainError::StaleBlockhash(_))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FreezeError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("mint account {0} does not exist")]
    MintNotFound(Pubkey),

    #[error("account {0} is not a token mint")]
    NotAMint(Pubkey),

    #[error("provided token has its freeze authority revoked")]
    FreezeAuthorityRevoked,

    #[error("signer {signer} is not the freeze authority (authority is {authority})")]
    AuthorityMismatch { authority: Pubkey, signer: Pubkey },

    #[error("no liquidity pool vault found for the mint")]
    NoPoolFound,

    #[error("holder scan failed: {0}")]
    Scan(#[source] ChainError),

    #[error("freeze batch at index {chunk_index} failed: {source}")]
    BatchSubmit {
        chunk_index: usize,
        #[source]
        source: ChainError,
    },

    #[error("chain request failed: {0}")]
    Chain(#[source] ChainError),
}

impl FreezeError {
    /// Errors raised before any chain write has happened.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            FreezeError::ConfigInvalid(_)
                | FreezeError::MintNotFound(_)
                | FreezeError::NotAMint(_)
                | FreezeError::FreezeAuthorityRevoked
                | FreezeError::AuthorityMismatch { .. }
        )
    }
}
