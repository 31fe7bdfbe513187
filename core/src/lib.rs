//! Freeze enforcement for SPL tokens: find holders above a threshold, freeze
//! the ones that are not whitelisted, and repeat whenever the liquidity pool
//! vault of the mint moves.

pub mod chain;
pub mod config;
pub mod constants;
pub mod controller;
pub mod errors;
pub mod freezer;
pub mod scanner;
pub mod selector;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod vault;
pub mod watcher;

pub use chain::{AccountChangeCallback, ChainClient, RpcChainClient, SubscriptionId};
pub use config::{FreezeSettings, RunConfig, ThresholdTokens};
pub use controller::{RunController, RunOutcome, RunReport, SweepKind, SweepSummary};
pub use errors::{ChainError, FreezeError};
pub use freezer::{BatchFailure, BatchFreezer, BatchOutcome, SweepReport};
pub use scanner::HolderScanner;
pub use selector::{CandidateSelector, EffectiveWhitelist};
pub use state::{HolderRecord, HolderState, MintInfo, PoolVariant, VaultBinding};
pub use status::{ChannelSink, StatusEvent, StatusKind, StatusSink, TracingSink};
pub use vault::VaultDetector;
pub use watcher::PoolActivityWatcher;
