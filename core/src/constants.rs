use solana_sdk::pubkey::Pubkey;

pub const LEGACY_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const TOKEN_2022_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");

/// Size of the base token-account layout shared by both token programs.
pub const TOKEN_ACCOUNT_LEN: u64 = 165;
pub const FREEZE_ACCOUNT_OPCODE: u8 = 10;

pub const DEFAULT_CHUNK_SIZE: usize = 25;
/// Largest chunk whose transaction, priority-fee instruction included, fits in one packet.
pub const MAX_CHUNK_SIZE: usize = 25;

/// Upper bound for both the run timeout and the freeze cooldown (one year).
pub const MAX_RUN_SECS: u64 = 365 * 24 * 60 * 60;

pub const DEFAULT_TICK_MS: u64 = 500;
pub const DEFAULT_REQUEST_TICK_MS: u64 = 2_000;

pub const LEGACY_POOL_LABEL: &str = "legacy";
pub const STANDARD_POOL_LABEL: &str = "standard";

/// Raydium mainnet pool authorities. Index 0 is the legacy (V4) pool program.
pub const RAYDIUM_POOL_AUTHORITIES: [Pubkey; 2] = [
    solana_sdk::pubkey!("5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1"),
    solana_sdk::pubkey!("GpMZbSM2GgvTKHJirzeGfMFoaZ8UR2X7F4v8vHTvxFbL"),
];
