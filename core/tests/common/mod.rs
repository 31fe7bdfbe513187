#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use freeze_core::chain::{AccountChangeCallback, ChainClient, SubscriptionId};
use freeze_core::constants::{LEGACY_TOKEN_PROGRAM_ID, TOKEN_ACCOUNT_LEN};
use freeze_core::errors::ChainError;
use freeze_core::state::MintInfo;
use freeze_core::status::StatusEvent;
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use spl_token_2022::solana_program::program_pack::Pack;
use spl_token_2022::state::{Account as TokenAccount, AccountState};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const DECIMALS: u8 = 6;
pub const ONE_TOKEN: u64 = 1_000_000;

#[derive(Debug, Clone)]
pub struct FakeAccount {
    pub address: Pubkey,
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
    pub state: AccountState,
}

impl FakeAccount {
    pub fn pack(&self) -> Vec<u8> {
        let account = TokenAccount {
            mint: self.mint,
            owner: self.owner,
            amount: self.amount,
            state: self.state,
            ..TokenAccount::default()
        };
        let mut data = vec![0u8; TOKEN_ACCOUNT_LEN as usize];
        account.pack_into_slice(&mut data);
        data
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub at: Duration,
    pub accounts: Vec<Pubkey>,
    pub priority: bool,
    pub signed: bool,
    pub result: Result<Signature, ChainError>,
}

#[derive(Default)]
struct Inner {
    mint: Option<MintInfo>,
    accounts: Vec<FakeAccount>,
    raw_accounts: Vec<(Pubkey, Vec<u8>)>,
    scan_times: Vec<Duration>,
    scan_failures: VecDeque<ChainError>,
    send_failures: VecDeque<(usize, ChainError)>,
    submissions: Vec<Submission>,
    listeners: HashMap<SubscriptionId, (Pubkey, AccountChangeCallback)>,
    next_subscription: u64,
    subscribed: Vec<Pubkey>,
    removals: Vec<SubscriptionId>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory chain: applies freeze instructions to its own account table and
/// records every call with its offset from creation on the tokio clock.
pub struct FakeChain {
    created: Instant,
    send_latency: Duration,
    inner: Mutex<Inner>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self {
            created: Instant::now(),
            send_latency: Duration::from_millis(50),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    fn elapsed(&self) -> Duration {
        Instant::now().duration_since(self.created)
    }

    pub fn set_mint(&self, mint: MintInfo) {
        self.inner().mint = Some(mint);
    }

    pub fn add_account(&self, account: FakeAccount) {
        self.inner().accounts.push(account);
    }

    /// Appends `data` verbatim to every scan result, after the packed accounts.
    pub fn add_raw_account(&self, address: Pubkey, data: Vec<u8>) {
        self.inner().raw_accounts.push((address, data));
    }

    /// Adds an initialized account of `mint` and returns its address.
    pub fn add_holder(&self, mint: Pubkey, owner: Pubkey, amount: u64) -> Pubkey {
        let address = Pubkey::new_unique();
        self.add_account(FakeAccount {
            address,
            mint,
            owner,
            amount,
            state: AccountState::Initialized,
        });
        address
    }

    pub fn fail_next_scan(&self, error: ChainError) {
        self.inner().scan_failures.push_back(error);
    }

    /// Fails the `nth` send from now (0 = the next one).
    pub fn fail_send(&self, nth: usize, error: ChainError) {
        let base = self.inner().submissions.len();
        self.inner().send_failures.push_back((base + nth, error));
    }

    pub fn state_of(&self, address: &Pubkey) -> Option<AccountState> {
        self.inner()
            .accounts
            .iter()
            .find(|account| account.address == *address)
            .map(|account| account.state)
    }

    /// Fires every listener registered for `account`.
    pub fn notify(&self, account: &Pubkey) {
        let callbacks: Vec<AccountChangeCallback> = self
            .inner()
            .listeners
            .values()
            .filter(|(watched, _)| watched == account)
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner().submissions.clone()
    }

    pub fn confirmed_batches(&self) -> Vec<Vec<Pubkey>> {
        self.submissions()
            .into_iter()
            .filter(|submission| submission.result.is_ok())
            .map(|submission| submission.accounts)
            .collect()
    }

    pub fn scan_times(&self) -> Vec<Duration> {
        self.inner().scan_times.clone()
    }

    pub fn subscribed(&self) -> Vec<Pubkey> {
        self.inner().subscribed.clone()
    }

    pub fn removals(&self) -> Vec<SubscriptionId> {
        self.inner().removals.clone()
    }

    pub fn active_listeners(&self) -> usize {
        self.inner().listeners.len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner().max_in_flight
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn get_mint(&self, mint: &Pubkey) -> Result<MintInfo, ChainError> {
        self.inner()
            .mint
            .clone()
            .filter(|info| info.address == *mint)
            .ok_or(ChainError::NotFound(*mint))
    }

    async fn scan_accounts_by_mint(
        &self,
        program_id: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Vec<(Pubkey, Vec<u8>)>, ChainError> {
        let elapsed = self.elapsed();
        let mut inner = self.inner();
        inner.scan_times.push(elapsed);
        if let Some(error) = inner.scan_failures.pop_front() {
            return Err(error);
        }
        if *program_id != LEGACY_TOKEN_PROGRAM_ID {
            return Ok(Vec::new());
        }
        Ok(inner
            .accounts
            .iter()
            .filter(|account| account.mint == *mint)
            .map(|account| (account.address, account.pack()))
            .chain(inner.raw_accounts.iter().cloned())
            .collect())
    }

    async fn latest_blockhash(&self) -> Result<(Hash, u64), ChainError> {
        Ok((Hash::new_unique(), 1_000))
    }

    async fn send_and_confirm(&self, transaction: &Transaction) -> Result<Signature, ChainError> {
        {
            let mut inner = self.inner();
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        tokio::time::sleep(self.send_latency).await;

        let message = &transaction.message;
        let mut accounts = Vec::new();
        let mut priority = false;
        for instruction in &message.instructions {
            let program = message.account_keys[instruction.program_id_index as usize];
            if program == LEGACY_TOKEN_PROGRAM_ID && instruction.data == [10] {
                accounts.push(message.account_keys[instruction.accounts[0] as usize]);
            } else if program == solana_sdk::compute_budget::id() {
                priority = true;
            }
        }

        let elapsed = self.elapsed();
        let mut inner = self.inner();
        inner.in_flight -= 1;
        let index = inner.submissions.len();
        let fails_now = matches!(inner.send_failures.front(), Some((nth, _)) if *nth == index);
        let failure = if fails_now {
            inner.send_failures.pop_front().map(|(_, error)| error)
        } else {
            None
        };
        let result = match failure {
            Some(error) => Err(error),
            None => {
                for account in inner.accounts.iter_mut() {
                    if accounts.contains(&account.address) {
                        account.state = AccountState::Frozen;
                    }
                }
                Ok(transaction.signatures[0])
            }
        };
        inner.submissions.push(Submission {
            at: elapsed,
            accounts,
            priority,
            signed: transaction.is_signed(),
            result: result.clone(),
        });
        result
    }

    async fn on_account_change(
        &self,
        account: &Pubkey,
        callback: AccountChangeCallback,
    ) -> Result<SubscriptionId, ChainError> {
        let mut inner = self.inner();
        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        inner.listeners.insert(id, (*account, callback));
        inner.subscribed.push(*account);
        Ok(id)
    }

    async fn remove_account_change_listener(&self, id: SubscriptionId) -> Result<(), ChainError> {
        let mut inner = self.inner();
        inner.removals.push(id);
        inner.listeners.remove(&id);
        Ok(())
    }
}

pub fn mint_info(address: Pubkey, freeze_authority: Option<Pubkey>) -> MintInfo {
    MintInfo {
        address,
        program_id: LEGACY_TOKEN_PROGRAM_ID,
        decimals: DECIMALS,
        supply: 1_000_000 * ONE_TOKEN,
        mint_authority: None,
        freeze_authority,
        is_initialized: true,
    }
}

pub fn drain(receiver: &mut mpsc::UnboundedReceiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
