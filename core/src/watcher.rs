use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::chain::{AccountChangeCallback, ChainClient, SubscriptionId};
use crate::errors::ChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatcherState {
    Unbound,
    Watching {
        vault: Pubkey,
        subscription: SubscriptionId,
    },
    Closed,
}

/// Counts change notifications on the pool vault. The notification callback
/// only bumps the counter; the run loop drains it with [`take_dirty`].
///
/// [`take_dirty`]: PoolActivityWatcher::take_dirty
pub struct PoolActivityWatcher {
    chain: Arc<dyn ChainClient>,
    dirty: Arc<AtomicU64>,
    state: WatcherState,
}

impl PoolActivityWatcher {
    pub fn new(chain: Arc<dyn ChainClient>) -> Self {
        Self {
            chain,
            dirty: Arc::new(AtomicU64::new(0)),
            state: WatcherState::Unbound,
        }
    }

    pub async fn bind(&mut self, vault: Pubkey) -> Result<(), ChainError> {
        match self.state {
            WatcherState::Unbound => {}
            WatcherState::Watching { vault: bound, .. } => {
                debug!(vault = %bound, "watcher already bound");
                return Ok(());
            }
            WatcherState::Closed => {
                return Err(ChainError::Subscription("watcher is closed".to_string()));
            }
        }

        let dirty = Arc::clone(&self.dirty);
        let callback: AccountChangeCallback = Arc::new(move || {
            dirty.fetch_add(1, Ordering::SeqCst);
        });
        let subscription = self.chain.on_account_change(&vault, callback).await?;
        debug!(vault = %vault, subscription = %subscription, "watching pool vault");
        self.state = WatcherState::Watching {
            vault,
            subscription,
        };
        Ok(())
    }

    pub fn dirty(&self) -> u64 {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Returns the pending notification count and resets it to zero.
    pub fn take_dirty(&self) -> u64 {
        self.dirty.swap(0, Ordering::SeqCst)
    }

    /// Releases the subscription once. Later calls do nothing.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, WatcherState::Closed);
        if let WatcherState::Watching {
            vault,
            subscription,
        } = previous
        {
            if let Err(err) = self.chain.remove_account_change_listener(subscription).await {
                warn!(vault = %vault, "failed to remove pool subscription: {}", err);
            } else {
                debug!(vault = %vault, subscription = %subscription, "pool subscription removed");
            }
        }
    }
}
