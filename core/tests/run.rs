mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{drain, mint_info, FakeChain, ONE_TOKEN};
use freeze_core::chain::ChainClient;
use freeze_core::config::{RunConfig, RunConfigBuilder};
use freeze_core::constants::TOKEN_2022_PROGRAM_ID;
use freeze_core::controller::{RunController, RunOutcome, RunReport, SweepKind};
use freeze_core::errors::{ChainError, FreezeError};
use freeze_core::state::PoolVariant;
use freeze_core::status::{ChannelSink, StatusEvent, StatusKind};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use spl_token_2022::state::AccountState;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};

struct Harness {
    chain: Arc<FakeChain>,
    signer: Arc<Keypair>,
    mint: Pubkey,
    legacy_authority: Pubkey,
    pool_authority: Pubkey,
    vault: Pubkey,
}

impl Harness {
    fn new() -> Self {
        let mut harness = Self::without_pool();
        harness.vault =
            harness
                .chain
                .add_holder(harness.mint, harness.pool_authority, 500_000 * ONE_TOKEN);
        harness
    }

    fn without_pool() -> Self {
        let chain = Arc::new(FakeChain::new());
        let signer = Arc::new(Keypair::new());
        let mint = Pubkey::new_unique();
        chain.set_mint(mint_info(mint, Some(signer.pubkey())));
        Self {
            chain,
            signer,
            mint,
            legacy_authority: Pubkey::new_unique(),
            pool_authority: Pubkey::new_unique(),
            vault: Pubkey::default(),
        }
    }

    fn holder(&self, tokens: u64) -> Pubkey {
        self.chain
            .add_holder(self.mint, Pubkey::new_unique(), tokens * ONE_TOKEN)
    }

    fn config(&self, customize: impl FnOnce(RunConfigBuilder) -> RunConfigBuilder) -> RunConfig {
        let builder = RunConfig::builder(self.mint)
            .threshold("100".parse().unwrap())
            .timeout_minutes(1)
            .freeze_delay(Duration::from_secs(10))
            .pool_authorities(vec![self.legacy_authority, self.pool_authority]);
        customize(builder).build().unwrap()
    }

    fn controller(
        &self,
        config: RunConfig,
    ) -> (RunController, mpsc::UnboundedReceiver<StatusEvent>) {
        let (sink, receiver) = ChannelSink::channel();
        let chain: Arc<dyn ChainClient> = self.chain.clone();
        let controller =
            RunController::new(config, chain, self.signer.clone()).with_status(Arc::new(sink));
        (controller, receiver)
    }

    async fn run(&self, config: RunConfig) -> (RunReport, Vec<StatusEvent>) {
        let (controller, mut receiver) = self.controller(config);
        let report = controller.run().await;
        (report, drain(&mut receiver))
    }
}

fn batch_sizes(chain: &FakeChain) -> Vec<usize> {
    chain
        .confirmed_batches()
        .iter()
        .map(|batch| batch.len())
        .collect()
}

fn messages(events: &[StatusEvent], kind: StatusKind) -> Vec<String> {
    events
        .iter()
        .filter(|event| event.kind == kind)
        .map(|event| event.message.clone())
        .collect()
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn run_future_can_be_spawned() {
    let harness = Harness::new();
    let (controller, _receiver) = harness.controller(harness.config(|builder| builder));
    let run = controller.run();
    assert_send(&run);
}

#[tokio::test(start_paused = true)]
async fn freezes_eligible_holders_in_one_batch() {
    let harness = Harness::new();
    let listed_owner = Pubkey::new_unique();
    let above = harness.holder(150);
    let at_threshold = harness.holder(100);
    let below = harness
        .chain
        .add_holder(harness.mint, Pubkey::new_unique(), 100 * ONE_TOKEN - 1);
    let listed = harness
        .chain
        .add_holder(harness.mint, listed_owner, 1_000 * ONE_TOKEN);
    let own = harness
        .chain
        .add_holder(harness.mint, harness.signer.pubkey(), 1_000 * ONE_TOKEN);
    let already_frozen = Pubkey::new_unique();
    harness.chain.add_account(common::FakeAccount {
        address: already_frozen,
        mint: harness.mint,
        owner: Pubkey::new_unique(),
        amount: 1_000 * ONE_TOKEN,
        state: AccountState::Frozen,
    });

    let started = Instant::now();
    let config = harness.config(|builder| {
        builder
            .whitelist([listed_owner])
            .priority_micro_lamports(10_000)
    });
    let (report, events) = harness.run(config).await;

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert!(Instant::now().duration_since(started) >= Duration::from_secs(60));
    assert_eq!(harness.chain.confirmed_batches(), vec![vec![above, at_threshold]]);
    let submission = &harness.chain.submissions()[0];
    assert!(submission.signed);
    assert!(submission.priority);
    for untouched in [below, listed, own, harness.vault] {
        assert_eq!(
            harness.chain.state_of(&untouched),
            Some(AccountState::Initialized)
        );
    }

    let vault = report.vault.unwrap();
    assert_eq!(vault.vault, harness.vault);
    assert_eq!(vault.variant, PoolVariant::Standard);
    assert_eq!(harness.chain.subscribed(), vec![harness.vault]);
    assert_eq!(harness.chain.removals().len(), 1);
    assert_eq!(harness.chain.active_listeners(), 0);

    assert_eq!(report.sweeps.len(), 1);
    assert_eq!(report.sweeps[0].kind, SweepKind::Initial);
    assert_eq!(report.sweeps[0].frozen, vec![above, at_threshold]);
    assert!(messages(&events, StatusKind::Success)
        .iter()
        .any(|message| message == "Done: 2 accounts frozen"));
    assert!(messages(&events, StatusKind::Info)
        .iter()
        .any(|message| message.starts_with("Freeze authority: ")));
}

#[tokio::test(start_paused = true)]
async fn ends_without_subscribing_when_no_pool_holds_the_token() {
    let harness = Harness::without_pool();
    let holder = harness.holder(500);

    let started = Instant::now();
    let (report, events) = harness.run(harness.config(|builder| builder)).await;

    assert_eq!(report.outcome, RunOutcome::NoPoolFound);
    assert!(report.vault.is_none());
    assert_eq!(harness.chain.confirmed_batches(), vec![vec![holder]]);
    assert!(harness.chain.subscribed().is_empty());
    assert!(harness.chain.removals().is_empty());
    assert!(Instant::now().duration_since(started) < Duration::from_secs(1));
    assert!(messages(&events, StatusKind::Error)
        .iter()
        .any(|message| message == "No liquidity pool found for this token"));
}

#[tokio::test(start_paused = true)]
async fn refuses_to_run_without_freeze_authority() {
    let harness = Harness::new();
    harness.holder(500);
    let other = Pubkey::new_unique();
    harness
        .chain
        .set_mint(mint_info(harness.mint, Some(other)));

    let (report, events) = harness.run(harness.config(|builder| builder)).await;

    assert_eq!(
        report.outcome,
        RunOutcome::Aborted(FreezeError::AuthorityMismatch {
            authority: other,
            signer: harness.signer.pubkey(),
        })
    );
    assert!(harness.chain.scan_times().is_empty());
    assert!(harness.chain.submissions().is_empty());
    assert!(harness.chain.subscribed().is_empty());
    assert!(messages(&events, StatusKind::Error)
        .iter()
        .any(|message| message == "Run refused"));

    harness.chain.set_mint(mint_info(harness.mint, None));
    let (report, _) = harness.run(harness.config(|builder| builder)).await;
    assert_eq!(
        report.outcome,
        RunOutcome::Aborted(FreezeError::FreezeAuthorityRevoked)
    );
    assert!(harness.chain.scan_times().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rejects_unknown_mint_and_wrong_program() {
    let harness = Harness::new();

    let unknown = Pubkey::new_unique();
    let config = RunConfig::builder(unknown).build().unwrap();
    let (report, _) = harness.run(config).await;
    assert_eq!(
        report.outcome,
        RunOutcome::Aborted(FreezeError::MintNotFound(unknown))
    );

    let config = harness.config(|builder| builder.token_program(TOKEN_2022_PROGRAM_ID));
    let (report, _) = harness.run(config).await;
    assert!(matches!(
        report.outcome,
        RunOutcome::Aborted(FreezeError::ConfigInvalid(_))
    ));
    assert!(harness.chain.scan_times().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cooldown_spaces_steady_sweeps() {
    let harness = Harness::new();
    harness.holder(200);
    let (controller, mut receiver) = harness.controller(harness.config(|builder| builder));
    let start = Instant::now();
    let run = tokio::spawn(controller.run());

    let burst_start = Duration::from_millis(1_200);
    sleep_until(start + burst_start).await;
    let first = harness.holder(300);
    for n in 0..5u32 {
        sleep_until(start + burst_start + Duration::from_millis(500) * n).await;
        harness.chain.notify(&harness.vault);
    }

    sleep_until(start + Duration::from_secs(5)).await;
    let second = harness.holder(400);

    let report = run.await.unwrap();
    let events = drain(&mut receiver);

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    let scans = harness.chain.scan_times();
    assert_eq!(scans.len(), 3, "initial sweep plus two steady sweeps");
    let burst_window = burst_start..=burst_start + Duration::from_secs(3);
    assert_eq!(
        scans.iter().filter(|at| burst_window.contains(*at)).count(),
        1,
        "one sweep for the whole burst"
    );
    assert!(scans[1] >= burst_start + Duration::from_secs(2));
    assert!(scans[2] - scans[1] >= Duration::from_secs(10));

    let batches = harness.chain.confirmed_batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[1], vec![first]);
    assert_eq!(batches[2], vec![second]);
    assert_eq!(harness.chain.max_in_flight(), 1);

    assert_eq!(report.sweeps.len(), 3);
    assert!(report.sweeps[1..]
        .iter()
        .all(|sweep| sweep.kind == SweepKind::Steady));
    assert!(messages(&events, StatusKind::Info)
        .iter()
        .any(|message| message.starts_with("Freeze can be triggered in ")));
    assert!(messages(&events, StatusKind::Success)
        .iter()
        .any(|message| *message == format!("Done: {} frozen", second)));
}

#[tokio::test(start_paused = true)]
async fn large_candidate_sets_split_into_full_chunks() {
    let harness = Harness::new();
    let holders: Vec<Pubkey> = (0..53).map(|_| harness.holder(1_000)).collect();

    let (report, events) = harness.run(harness.config(|builder| builder)).await;

    assert_eq!(batch_sizes(&harness.chain), vec![25, 25, 3]);
    assert_eq!(harness.chain.confirmed_batches().concat(), holders);
    assert_eq!(harness.chain.max_in_flight(), 1);
    assert_eq!(report.frozen_count(), 53);
    let successes = messages(&events, StatusKind::Success);
    assert!(successes.contains(&"Done (1/3): 25 accounts frozen".to_string()));
    assert!(successes.contains(&"Done (3/3): 3 accounts frozen".to_string()));
}

#[tokio::test(start_paused = true)]
async fn times_out_and_releases_subscription() {
    let harness = Harness::new();

    let started = Instant::now();
    let (report, events) = harness.run(harness.config(|builder| builder)).await;
    let elapsed = Instant::now().duration_since(started);

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(61));
    assert_eq!(harness.chain.scan_times().len(), 1);
    assert!(harness.chain.submissions().is_empty());
    assert_eq!(harness.chain.removals().len(), 1);
    assert_eq!(harness.chain.active_listeners(), 0);
    assert!(messages(&events, StatusKind::Success)
        .iter()
        .any(|message| message == "Run finished after timeout, 0 accounts frozen"));
}

#[tokio::test(start_paused = true)]
async fn stale_blockhash_resubmits_failed_chunk_and_the_rest() {
    let harness = Harness::new();
    let holders: Vec<Pubkey> = (0..53).map(|_| harness.holder(1_000)).collect();
    harness
        .chain
        .fail_send(1, ChainError::StaleBlockhash("blockhash not found".to_string()));

    let (report, events) = harness.run(harness.config(|builder| builder)).await;

    let attempts: Vec<usize> = harness
        .chain
        .submissions()
        .iter()
        .map(|submission| submission.accounts.len())
        .collect();
    assert_eq!(attempts, vec![25, 25, 25, 3]);
    assert_eq!(harness.chain.confirmed_batches().concat(), holders);

    let sweep = &report.sweeps[0];
    assert!(sweep.retried);
    assert!(sweep.error.is_none());
    assert_eq!(sweep.frozen.len(), 53);
    assert!(messages(&events, StatusKind::Warning)
        .iter()
        .any(|message| message == "Retrying 28 accounts with a fresh blockhash"));
}

#[tokio::test(start_paused = true)]
async fn failed_batch_aborts_only_its_sweep() {
    let harness = Harness::new();
    let holders: Vec<Pubkey> = (0..30).map(|_| harness.holder(1_000)).collect();
    harness
        .chain
        .fail_send(0, ChainError::Simulation("custom program error: 0x11".to_string()));

    let (controller, _receiver) = harness.controller(harness.config(|builder| builder));
    let start = Instant::now();
    let run = tokio::spawn(controller.run());
    sleep_until(start + Duration::from_millis(1_200)).await;
    harness.chain.notify(&harness.vault);
    let report = run.await.unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    let initial = &report.sweeps[0];
    assert!(!initial.retried);
    assert!(initial.frozen.is_empty());
    assert!(matches!(
        initial.error,
        Some(FreezeError::BatchSubmit { chunk_index: 0, source: ChainError::Simulation(_) })
    ));

    assert_eq!(report.sweeps.len(), 2);
    assert_eq!(report.sweeps[1].frozen, holders);
    assert_eq!(batch_sizes(&harness.chain), vec![25, 5]);
}

#[tokio::test(start_paused = true)]
async fn initial_scan_failure_is_fatal() {
    let harness = Harness::new();
    harness
        .chain
        .fail_next_scan(ChainError::Node("connection refused".to_string()));

    let (report, _) = harness.run(harness.config(|builder| builder)).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::Aborted(FreezeError::Scan(ChainError::Node(_)))
    ));
    assert!(harness.chain.subscribed().is_empty());
    assert!(harness.chain.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn steady_scan_failure_skips_the_sweep() {
    let harness = Harness::new();
    let (controller, _receiver) = harness.controller(harness.config(|builder| builder));
    let start = Instant::now();
    let run = tokio::spawn(controller.run());

    sleep_until(start + Duration::from_millis(1_200)).await;
    harness.holder(700);
    harness
        .chain
        .fail_next_scan(ChainError::Timeout("scan timed out".to_string()));
    harness.chain.notify(&harness.vault);
    let report = run.await.unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(report.sweeps.len(), 2);
    assert!(matches!(report.sweeps[1].error, Some(FreezeError::Scan(_))));
    assert!(harness.chain.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn no_sweep_starts_after_the_deadline() {
    let harness = Harness::new();
    let (controller, _receiver) = harness.controller(harness.config(|builder| builder));
    let start = Instant::now();
    let run = tokio::spawn(controller.run());

    sleep_until(start + Duration::from_millis(59_200)).await;
    harness.holder(700);
    harness.chain.notify(&harness.vault);
    let report = run.await.unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(harness.chain.scan_times().len(), 1);
    assert!(harness.chain.submissions().is_empty());
    assert!(Instant::now().duration_since(start) < Duration::from_secs(62));
}

#[tokio::test(start_paused = true)]
async fn vault_binding_survives_later_pool_accounts() {
    let harness = Harness::new();
    let (controller, _receiver) = harness.controller(harness.config(|builder| builder));
    let start = Instant::now();
    let run = tokio::spawn(controller.run());

    sleep_until(start + Duration::from_millis(1_200)).await;
    harness
        .chain
        .add_holder(harness.mint, harness.legacy_authority, 900_000 * ONE_TOKEN);
    harness.chain.notify(&harness.vault);
    let report = run.await.unwrap();

    assert_eq!(report.sweeps.len(), 2);
    let binding = report.vault.unwrap();
    assert_eq!(binding.vault, harness.vault);
    assert_eq!(binding.variant, PoolVariant::Standard);
    assert_eq!(harness.chain.subscribed(), vec![harness.vault]);
    assert!(harness.chain.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_signal_stops_the_run() {
    let harness = Harness::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (controller, _receiver) = harness.controller(harness.config(|builder| builder));
    let start = Instant::now();
    let run = tokio::spawn(controller.with_shutdown(shutdown_rx).run());

    sleep(Duration::from_millis(5_200)).await;
    shutdown_tx.send(true).unwrap();
    let report = run.await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(Instant::now().duration_since(start) < Duration::from_secs(6));
    assert_eq!(harness.chain.removals().len(), 1);
    assert_eq!(harness.chain.active_listeners(), 0);
}

#[tokio::test(start_paused = true)]
async fn cooldown_past_the_clock_blocks_further_sweeps() {
    let harness = Harness::new();
    let mut config = harness.config(|builder| builder);
    config.freeze_delay = Duration::MAX;
    let (controller, mut receiver) = harness.controller(config);
    let start = Instant::now();
    let run = tokio::spawn(controller.run());

    sleep_until(start + Duration::from_millis(1_200)).await;
    let first = harness.holder(300);
    harness.chain.notify(&harness.vault);
    sleep_until(start + Duration::from_millis(5_200)).await;
    harness.holder(400);
    harness.chain.notify(&harness.vault);
    let report = run.await.unwrap();

    assert_eq!(report.outcome, RunOutcome::TimedOut);
    assert_eq!(harness.chain.scan_times().len(), 2);
    assert_eq!(harness.chain.confirmed_batches(), vec![vec![first]]);
    assert!(!messages(&drain(&mut receiver), StatusKind::Info)
        .iter()
        .any(|message| message.starts_with("Freeze can be triggered in ")));
}

#[tokio::test(start_paused = true)]
async fn timeout_past_the_clock_runs_until_shutdown() {
    let harness = Harness::new();
    let mut config = harness.config(|builder| builder);
    config.timeout = Duration::MAX;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (controller, _receiver) = harness.controller(config);
    let start = Instant::now();
    let run = tokio::spawn(controller.with_shutdown(shutdown_rx).run());

    sleep(Duration::from_secs(90)).await;
    shutdown_tx.send(true).unwrap();
    let report = run.await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(Instant::now().duration_since(start) >= Duration::from_secs(90));
    assert_eq!(harness.chain.removals().len(), 1);
}
