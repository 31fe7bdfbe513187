use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::signer::Signer;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::chain::ChainClient;
use crate::config::{format_amount, RunConfig};
use crate::errors::{ChainError, FreezeError};
use crate::freezer::{BatchFreezer, SweepReport};
use crate::scanner::HolderScanner;
use crate::selector::{CandidateSelector, EffectiveWhitelist};
use crate::snapshot;
use crate::state::{HolderRecord, MintInfo, VaultBinding};
use crate::status::{StatusEvent, StatusSink, TracingSink};
use crate::vault::VaultDetector;
use crate::watcher::PoolActivityWatcher;

const COOLDOWN_NOTICE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Init,
    Validated,
    InitialFreezeDone,
    Armed,
    SteadyState,
    Terminating,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    TimedOut,
    NoPoolFound,
    Cancelled,
    Aborted(FreezeError),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::TimedOut => write!(f, "timed out"),
            RunOutcome::NoPoolFound => write!(f, "no pool found"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
            RunOutcome::Aborted(err) => write!(f, "aborted: {}", err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Initial,
    Steady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub kind: SweepKind,
    /// Offset from the start of the run.
    pub started_after: Duration,
    pub scanned: usize,
    pub candidates: usize,
    pub frozen: Vec<Pubkey>,
    pub signatures: Vec<Signature>,
    pub retried: bool,
    pub error: Option<FreezeError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub vault: Option<VaultBinding>,
    pub sweeps: Vec<SweepSummary>,
}

impl RunReport {
    pub fn frozen_count(&self) -> usize {
        self.sweeps.iter().map(|sweep| sweep.frozen.len()).sum()
    }
}

/// Everything derived from the mint during validation.
struct Session {
    mint: MintInfo,
    scanner: HolderScanner,
    detector: VaultDetector,
    selector: CandidateSelector,
    freezer: BatchFreezer,
}

/// Drives one enforcement run from validation to teardown.
pub struct RunController {
    config: RunConfig,
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer + Send + Sync>,
    status: Arc<dyn StatusSink>,
    shutdown: Option<watch::Receiver<bool>>,
    phase: RunPhase,
}

impl RunController {
    pub fn new(
        config: RunConfig,
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer + Send + Sync>,
    ) -> Self {
        Self {
            config,
            chain,
            signer,
            status: Arc::new(TracingSink),
            shutdown: None,
            phase: RunPhase::Init,
        }
    }

    pub fn with_status(mut self, status: Arc<dyn StatusSink>) -> Self {
        self.status = status;
        self
    }

    /// The run stops at the next tick once the channel holds `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Never fails: every error ends up in [`RunReport::outcome`] and the
    /// status sink, and the pool subscription is always released.
    pub async fn run(mut self) -> RunReport {
        let started_at = Instant::now();
        let mut watcher = PoolActivityWatcher::new(Arc::clone(&self.chain));
        let mut report = RunReport {
            outcome: RunOutcome::TimedOut,
            vault: None,
            sweeps: Vec::new(),
        };

        let outcome = self
            .execute(started_at, &mut watcher, &mut report)
            .await;

        self.enter(RunPhase::Terminating);
        watcher.close().await;
        report.outcome = outcome;
        self.emit_final(&report);
        self.enter(RunPhase::Terminated);
        report
    }

    async fn execute(
        &mut self,
        started_at: Instant,
        watcher: &mut PoolActivityWatcher,
        report: &mut RunReport,
    ) -> RunOutcome {
        // `None` when the timeout does not fit on the clock: the run has no deadline.
        let deadline = started_at.checked_add(self.config.timeout);
        let mut session = match self.validate().await {
            Ok(session) => session,
            Err(err) => return RunOutcome::Aborted(err),
        };
        self.enter(RunPhase::Validated);

        let records = match session.scanner.scan(&self.config.mint).await {
            Ok(records) => records,
            Err(err) => return RunOutcome::Aborted(FreezeError::Scan(err)),
        };
        self.write_snapshot(&records).await;
        if let Some(binding) = session.detector.observe(&records) {
            report.vault = Some(binding);
            self.status.emit(StatusEvent::info(format!(
                "Pool vault found: {} ({} pool)",
                binding.vault,
                binding.variant.label()
            )));
        }
        let summary = self
            .sweep_records(&session, SweepKind::Initial, started_at, records)
            .await;
        report.sweeps.push(summary);
        self.enter(RunPhase::InitialFreezeDone);

        let Some(binding) = session.detector.binding().copied() else {
            return RunOutcome::NoPoolFound;
        };
        if let Err(err) = watcher.bind(binding.vault).await {
            return RunOutcome::Aborted(FreezeError::Chain(err));
        }
        self.enter(RunPhase::Armed);
        self.status.emit(StatusEvent::info(format!(
            "Watching pool vault {} for activity",
            binding.vault
        )));

        // `None` once the cooldown runs past the end of the clock.
        let mut next_allowed_freeze = Some(started_at);
        let mut last_notice: Option<Instant> = None;
        self.enter(RunPhase::SteadyState);
        loop {
            if self.shutdown_requested() {
                return RunOutcome::Cancelled;
            }
            let now = Instant::now();
            if reached(deadline, now) {
                return RunOutcome::TimedOut;
            }

            if watcher.dirty() > 0 {
                if reached(next_allowed_freeze, now) {
                    let pending = watcher.take_dirty();
                    debug!(pending, "pool activity observed, preparing sweep");
                    sleep(self.config.request_tick).await;
                    if self.shutdown_requested() {
                        return RunOutcome::Cancelled;
                    }
                    if reached(deadline, Instant::now()) {
                        return RunOutcome::TimedOut;
                    }
                    let summary = self.steady_sweep(&mut session, started_at).await;
                    report.sweeps.push(summary);
                    next_allowed_freeze = Instant::now().checked_add(self.config.freeze_delay);
                    last_notice = None;
                } else if let Some(next) = next_allowed_freeze {
                    if last_notice
                        .map_or(true, |at| now.duration_since(at) >= COOLDOWN_NOTICE_INTERVAL)
                    {
                        self.status.emit(StatusEvent::info(format!(
                            "Freeze can be triggered in {}s",
                            ceil_secs(next.duration_since(now))
                        )));
                        last_notice = Some(now);
                    }
                }
            }

            sleep(self.config.tick).await;
        }
    }

    async fn validate(&self) -> Result<Session, FreezeError> {
        let mint = self
            .chain
            .get_mint(&self.config.mint)
            .await
            .map_err(|err| match err {
                ChainError::NotFound(address) => FreezeError::MintNotFound(address),
                ChainError::NotAMint(address) => FreezeError::NotAMint(address),
                other => FreezeError::Chain(other),
            })?;
        if !mint.is_initialized {
            return Err(FreezeError::NotAMint(mint.address));
        }

        let signer = self.signer.pubkey();
        match mint.freeze_authority {
            None => return Err(FreezeError::FreezeAuthorityRevoked),
            Some(authority) if authority != signer => {
                return Err(FreezeError::AuthorityMismatch { authority, signer })
            }
            Some(_) => {}
        }
        if mint.program_id != self.config.token_program {
            return Err(FreezeError::ConfigInvalid(format!(
                "mint {} belongs to program {}, not the configured token program {}",
                mint.address, mint.program_id, self.config.token_program
            )));
        }

        let threshold_raw = self.config.threshold.to_raw(mint.decimals)?;
        let whitelist = EffectiveWhitelist::new(
            &self.config.whitelist,
            &self.config.pool_authorities,
            signer,
        );
        self.emit_summary(&mint, threshold_raw, &whitelist);

        Ok(Session {
            scanner: HolderScanner::new(Arc::clone(&self.chain), self.config.token_program),
            detector: VaultDetector::new(self.config.pool_authorities.clone()),
            selector: CandidateSelector::new(self.config.mint, threshold_raw, whitelist),
            freezer: BatchFreezer::new(
                Arc::clone(&self.chain),
                Arc::clone(&self.signer),
                self.config.token_program,
                self.config.mint,
                self.config.chunk_size,
                self.config.priority_micro_lamports,
                Arc::clone(&self.status),
            ),
            mint,
        })
    }

    async fn steady_sweep(&self, session: &mut Session, started_at: Instant) -> SweepSummary {
        let sweep_started = Instant::now();
        match session.scanner.scan(&self.config.mint).await {
            Ok(records) => {
                self.write_snapshot(&records).await;
                session.detector.observe(&records);
                self.sweep_records(session, SweepKind::Steady, started_at, records)
                    .await
            }
            Err(err) => {
                warn!(mint = %self.config.mint, "holder scan failed, skipping sweep: {}", err);
                self.status
                    .emit(StatusEvent::warning("Holder scan failed, sweep skipped").with_cause(&err));
                SweepSummary {
                    kind: SweepKind::Steady,
                    started_after: sweep_started.duration_since(started_at),
                    scanned: 0,
                    candidates: 0,
                    frozen: Vec::new(),
                    signatures: Vec::new(),
                    retried: false,
                    error: Some(FreezeError::Scan(err)),
                }
            }
        }
    }

    async fn sweep_records(
        &self,
        session: &Session,
        kind: SweepKind,
        started_at: Instant,
        records: Vec<HolderRecord>,
    ) -> SweepSummary {
        let sweep_started = Instant::now();
        let candidates = session.selector.select(&records);
        info!(
            mint = %session.mint.address,
            ?kind,
            scanned = records.len(),
            candidates = candidates.len(),
            "starting sweep"
        );
        if candidates.is_empty() {
            self.status
                .emit(StatusEvent::info("No accounts above the threshold to freeze"));
        } else {
            self.status.emit(StatusEvent::info(format!(
                "Freezing {} account{}",
                candidates.len(),
                if candidates.len() == 1 { "" } else { "s" }
            )));
        }

        let (batches, retried, error) = self.freeze_with_retry(&session.freezer, &candidates).await;
        SweepSummary {
            kind,
            started_after: sweep_started.duration_since(started_at),
            scanned: records.len(),
            candidates: candidates.len(),
            frozen: batches.frozen().copied().collect(),
            signatures: batches.signatures(),
            retried,
            error,
        }
    }

    /// A stale blockhash gets one resubmission of the failed chunk and every
    /// chunk after it. Any other failure ends the sweep.
    async fn freeze_with_retry(
        &self,
        freezer: &BatchFreezer,
        candidates: &[Pubkey],
    ) -> (SweepReport, bool, Option<FreezeError>) {
        let failure = match freezer.freeze(candidates).await {
            Ok(report) => return (report, false, None),
            Err(failure) => failure,
        };
        if !failure.error.is_stale_blockhash() {
            return (
                failure.report,
                false,
                Some(FreezeError::BatchSubmit {
                    chunk_index: failure.chunk_index,
                    source: failure.error,
                }),
            );
        }

        warn!(
            chunk = failure.chunk_index + 1,
            remaining = failure.remaining.len(),
            "blockhash expired, resubmitting remaining accounts"
        );
        self.status.emit(
            StatusEvent::warning(format!(
                "Retrying {} account{} with a fresh blockhash",
                failure.remaining.len(),
                if failure.remaining.len() == 1 { "" } else { "s" }
            ))
            .with_cause(&failure.error),
        );
        let mut report = failure.report;
        match freezer.freeze(&failure.remaining).await {
            Ok(retry) => {
                report.merge(retry);
                (report, true, None)
            }
            Err(second) => {
                report.merge(second.report);
                (
                    report,
                    true,
                    Some(FreezeError::BatchSubmit {
                        chunk_index: failure.chunk_index + second.chunk_index,
                        source: second.error,
                    }),
                )
            }
        }
    }

    async fn write_snapshot(&self, records: &[HolderRecord]) {
        let Some(path) = self.config.holders_snapshot.as_deref() else {
            return;
        };
        match snapshot::write_holders(path, records).await {
            Ok(()) => debug!(path = %path.display(), holders = records.len(), "holders snapshot written"),
            Err(err) => {
                warn!(path = %path.display(), "failed to write holders snapshot: {}", err);
                self.status.emit(
                    StatusEvent::warning(format!(
                        "Could not write holders snapshot to {}",
                        path.display()
                    ))
                    .with_cause(err),
                );
            }
        }
    }

    fn emit_summary(&self, mint: &MintInfo, threshold_raw: u64, whitelist: &EffectiveWhitelist) {
        let config = &self.config;
        let freeze_authority = mint
            .freeze_authority
            .map(|key| key.to_string())
            .unwrap_or_else(|| "none".to_string());
        let lines = [
            format!("Token: {}", mint.address),
            format!("Freeze authority: {}", freeze_authority),
            format!("Supply: {}", format_amount(mint.supply, mint.decimals)),
            format!("Decimals: {}", mint.decimals),
            format!(
                "Threshold: {} ({} raw)",
                config.threshold, threshold_raw
            ),
            format!("Freeze delay: {}s", config.freeze_delay.as_secs()),
            format!("Timeout: {}m", config.timeout.as_secs() / 60),
            format!(
                "Priority fee: {} micro-lamports per CU",
                config.priority_micro_lamports
            ),
            format!("Whitelisted owners: {}", whitelist.len()),
            format!("Pool authorities: {}", config.pool_authorities.len()),
        ];
        for line in lines {
            self.status.emit(StatusEvent::info(line));
        }
    }

    fn emit_final(&self, report: &RunReport) {
        let frozen = report.frozen_count();
        match &report.outcome {
            RunOutcome::TimedOut => {
                info!(frozen, "run deadline reached");
                self.status.emit(StatusEvent::success(format!(
                    "Run finished after timeout, {} account{} frozen",
                    frozen,
                    if frozen == 1 { "" } else { "s" }
                )));
            }
            RunOutcome::Cancelled => {
                info!(frozen, "run cancelled");
                self.status.emit(StatusEvent::warning(format!(
                    "Run cancelled, {} account{} frozen",
                    frozen,
                    if frozen == 1 { "" } else { "s" }
                )));
            }
            RunOutcome::NoPoolFound => {
                warn!("no pool vault among holders");
                self.status.emit(
                    StatusEvent::error("No liquidity pool found for this token")
                        .with_cause(FreezeError::NoPoolFound),
                );
            }
            RunOutcome::Aborted(err) => {
                error!("run aborted: {}", err);
                let message = if err.is_startup() {
                    "Run refused"
                } else {
                    "Run aborted"
                };
                self.status.emit(StatusEvent::error(message).with_cause(err));
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map_or(false, |shutdown| *shutdown.borrow())
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(from = ?self.phase, to = ?phase, "run phase");
        self.phase = phase;
    }
}

fn reached(at: Option<Instant>, now: Instant) -> bool {
    at.map_or(false, |at| now >= at)
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
