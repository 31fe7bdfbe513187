use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig};
use solana_client::rpc_filter::{Memcmp, RpcFilterType};
use solana_client::rpc_request::{RpcError, RpcResponseErrorData};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, TransactionError};
use spl_token_2022::extension::StateWithExtensions;
use spl_token_2022::state::Mint;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::{LEGACY_TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID, TOKEN_ACCOUNT_LEN};
use crate::errors::ChainError;
use crate::state::MintInfo;

pub type AccountChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Everything the engine asks of the chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_mint(&self, mint: &Pubkey) -> Result<MintInfo, ChainError>;

    /// Fresh scan of `program_id` for token accounts of `mint`, filtered
    /// server-side by [`token_account_filters`].
    async fn scan_accounts_by_mint(
        &self,
        program_id: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, ChainError>;

    /// Latest blockhash at finalized commitment, with its last valid block height.
    async fn latest_blockhash(&self) -> Result<(Hash, u64), ChainError>;

    /// Submits a signed transaction and waits for confirmed commitment.
    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, ChainError>;

    async fn on_account_change(
        &self,
        account: &Pubkey,
        callback: AccountChangeCallback,
    ) -> Result<SubscriptionId, ChainError>;

    /// Idempotent: unknown or already removed ids are ignored.
    async fn remove_account_change_listener(&self, id: SubscriptionId) -> Result<(), ChainError>;
}

pub fn token_account_filters(mint: &Pubkey) -> Vec<RpcFilterType> {
    vec![
        RpcFilterType::DataSize(TOKEN_ACCOUNT_LEN),
        RpcFilterType::Memcmp(Memcmp::new_base58_encoded(0, mint.as_ref())),
    ]
}

/// Derives the pubsub endpoint the same way the Solana CLI does: swap the
/// scheme and, when a port is given, use the next one.
pub fn websocket_url(rpc_url: &str) -> String {
    let (scheme, rest) = if let Some(rest) = rpc_url.strip_prefix("https://") {
        ("wss://", rest)
    } else if let Some(rest) = rpc_url.strip_prefix("http://") {
        ("ws://", rest)
    } else {
        return rpc_url.to_string();
    };
    let (authority, path) = match rest.find('/') {
        Some(index) => rest.split_at(index),
        None => (rest, ""),
    };
    let authority = match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => format!("{}:{}", host, port.saturating_add(1)),
            Err(_) => authority.to_string(),
        },
        None => authority.to_string(),
    };
    format!("{}{}{}", scheme, authority, path)
}

struct ActiveSubscription {
    account: Pubkey,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// [`ChainClient`] backed by a JSON-RPC node and its websocket endpoint.
pub struct RpcChainClient {
    rpc: RpcClient,
    ws_url: String,
    commitment: CommitmentConfig,
    next_subscription: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, ActiveSubscription>>,
}

impl RpcChainClient {
    pub fn new(rpc_url: String, ws_url: Option<String>, commitment: CommitmentConfig) -> Self {
        let ws_url = ws_url.unwrap_or_else(|| websocket_url(&rpc_url));
        Self {
            rpc: RpcClient::new_with_commitment(rpc_url, commitment),
            ws_url,
            commitment,
            next_subscription: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<SubscriptionId, ActiveSubscription>> {
        match self.subscriptions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("subscription registry lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Drop for RpcChainClient {
    fn drop(&mut self) {
        for (id, active) in self.subscriptions().drain() {
            debug!(subscription = %id, account = %active.account, "aborting account watch");
            active.task.abort();
        }
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_mint(&self, mint: &Pubkey) -> Result<MintInfo, ChainError> {
        let account = self
            .rpc
            .get_account_with_commitment(mint, self.commitment)
            .await
            .map_err(classify_client_error)?
            .value
            .ok_or(ChainError::NotFound(*mint))?;
        if account.owner != LEGACY_TOKEN_PROGRAM_ID && account.owner != TOKEN_2022_PROGRAM_ID {
            return Err(ChainError::NotAMint(*mint));
        }
        let parsed = StateWithExtensions::<Mint>::unpack(&account.data)
            .map_err(|_| ChainError::NotAMint(*mint))?;
        Ok(MintInfo {
            address: *mint,
            program_id: account.owner,
            decimals: parsed.base.decimals,
            supply: parsed.base.supply,
            mint_authority: parsed.base.mint_authority.into(),
            freeze_authority: parsed.base.freeze_authority.into(),
            is_initialized: parsed.base.is_initialized,
        })
    }

    async fn scan_accounts_by_mint(
        &self,
        program_id: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, ChainError> {
        let mut config = RpcProgramAccountsConfig::default();
        config.filters = Some(token_account_filters(mint));
        config.account_config = RpcAccountInfoConfig {
            encoding: Some(UiAccountEncoding::Base64),
            commitment: Some(self.commitment),
            data_slice: None,
            min_context_slot: None,
        };

        let accounts = self
            .rpc
            .get_program_accounts_with_config(program_id, config)
            .await
            .map_err(classify_client_error)?;
        Ok(accounts
            .into_iter()
            .map(|(address, account)| (address, account.data))
            .collect())
    }

    async fn latest_blockhash(&self) -> Result<(Hash, u64), ChainError> {
        self.rpc
            .get_latest_blockhash_with_commitment(CommitmentConfig::finalized())
            .await
            .map_err(classify_client_error)
    }

    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, ChainError> {
        self.rpc
            .send_and_confirm_transaction(transaction)
            .await
            .map_err(classify_client_error)
    }

    async fn on_account_change(
        &self,
        account: &Pubkey,
        callback: AccountChangeCallback,
    ) -> Result<SubscriptionId, ChainError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(watch_account(
            self.ws_url.clone(),
            *account,
            self.commitment,
            callback,
            ready_tx,
            stop_rx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => {
                debug!(subscription = %id, account = %account, "account watch started");
                self.subscriptions().insert(
                    id,
                    ActiveSubscription {
                        account: *account,
                        stop: stop_tx,
                        task,
                    },
                );
                Ok(id)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ChainError::Subscription(
                "account watch ended before it was ready".to_string(),
            )),
        }
    }

    async fn remove_account_change_listener(&self, id: SubscriptionId) -> Result<(), ChainError> {
        let active = self.subscriptions().remove(&id);
        let Some(active) = active else {
            return Ok(());
        };
        if active.stop.send(()).is_err() {
            debug!(subscription = %id, "account watch already finished");
        }
        active
            .task
            .await
            .map_err(|err| ChainError::Subscription(err.to_string()))
    }
}

async fn watch_account(
    ws_url: String,
    account: Pubkey,
    commitment: CommitmentConfig,
    callback: AccountChangeCallback,
    ready: oneshot::Sender<Result<(), ChainError>>,
    mut stop: oneshot::Receiver<()>,
) {
    let client = match PubsubClient::new(&ws_url).await {
        Ok(client) => client,
        Err(err) => {
            let _ = ready.send(Err(ChainError::Subscription(err.to_string())));
            return;
        }
    };
    let config = RpcAccountInfoConfig {
        encoding: Some(UiAccountEncoding::Base64),
        commitment: Some(commitment),
        data_slice: None,
        min_context_slot: None,
    };
    let (mut notifications, unsubscribe) = match client.account_subscribe(&account, Some(config)).await
    {
        Ok(subscription) => subscription,
        Err(err) => {
            let _ = ready.send(Err(ChainError::Subscription(err.to_string())));
            return;
        }
    };

    if ready.send(Ok(())).is_ok() {
        loop {
            tokio::select! {
                _ = &mut stop => break,
                update = notifications.next() => match update {
                    Some(_) => callback(),
                    None => {
                        warn!(account = %account, "account notification stream closed");
                        break;
                    }
                },
            }
        }
    }

    drop(notifications);
    unsubscribe().await;
    if let Err(err) = client.shutdown().await {
        debug!(account = %account, "pubsub shutdown failed: {}", err);
    }
}

pub fn classify_client_error(err: ClientError) -> ChainError {
    let message = err.to_string();
    if let Some(tx_err) = err.get_transaction_error() {
        return match tx_err {
            TransactionError::BlockhashNotFound => ChainError::StaleBlockhash(message),
            TransactionError::AlreadyProcessed => ChainError::Duplicate(message),
            _ => ChainError::Simulation(message),
        };
    }
    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError {
            data: RpcResponseErrorData::SendTransactionPreflightFailure(_),
            ..
        }) => ChainError::Simulation(message),
        // send_and_confirm gives up with this once the blockhash has expired.
        ClientErrorKind::RpcError(RpcError::ForUser(text)) if text.contains("unable to confirm") => {
            ChainError::StaleBlockhash(message)
        }
        ClientErrorKind::Reqwest(inner) if inner.is_timeout() => ChainError::Timeout(message),
        ClientErrorKind::SigningError(_) => ChainError::Signing(message),
        _ => ChainError::Node(message),
    }
}
