use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use freeze_core::chain::{ChainClient, RpcChainClient};
use freeze_core::config::{
    format_amount, parse_token_program, FreezeSettings, RunConfig, ThresholdTokens, ThresholdValue,
};
use freeze_core::constants::RAYDIUM_POOL_AUTHORITIES;
use freeze_core::controller::{RunController, RunOutcome, RunReport, SweepKind};
use freeze_core::scanner::HolderScanner;
use freeze_core::selector::{CandidateSelector, EffectiveWhitelist};
use freeze_core::state::{HolderRecord, HolderState, MintInfo};
use freeze_core::status::TracingSink;
use freeze_core::vault::VaultDetector;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "token-freeze", version, about = "Freeze enforcement for SPL tokens")]
struct Cli {
    #[arg(long)]
    cluster: Option<String>,

    #[arg(long)]
    ws_endpoint: Option<String>,

    #[arg(long)]
    keypair: Option<String>,

    /// TOML run file with [network] and [freeze] tables.
    #[arg(long)]
    config: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    output: OutputFormat,

    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Freeze eligible holders now, then again whenever the pool vault moves.
    Run(FreezeArgs),
    /// Show which accounts a run would freeze, without submitting anything.
    Candidates(FreezeArgs),
    Holders(HoldersArgs),
    Status(MintOnlyArgs),
}

#[derive(Parser, Default)]
struct FreezeArgs {
    #[arg(long)]
    mint: Option<String>,

    /// Minimum balance in whole tokens, e.g. 1000 or 0.5.
    #[arg(long)]
    threshold: Option<String>,

    /// Seconds between freezes once the pool is being watched.
    #[arg(long)]
    delay: Option<u64>,

    /// Minutes until the run stops.
    #[arg(long)]
    timeout: Option<u64>,

    /// Compute-unit price in micro-lamports; 0 disables it.
    #[arg(long)]
    priority_fee: Option<u64>,

    #[arg(long, value_delimiter = ',')]
    whitelist: Vec<String>,

    /// `legacy`, `token-2022` or a program id.
    #[arg(long)]
    token_program: Option<String>,

    /// Pool authorities in order; the first one is the legacy pool program.
    #[arg(long = "pool-authority", value_delimiter = ',')]
    pool_authorities: Vec<String>,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    holders_snapshot: Option<PathBuf>,
}

#[derive(Parser)]
struct HoldersArgs {
    #[arg(long)]
    min_balance: Option<String>,

    #[arg(long)]
    mint: Option<String>,

    #[arg(long)]
    token_program: Option<String>,
}

#[derive(Parser)]
struct MintOnlyArgs {
    #[arg(long)]
    mint: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let solana_config = load_solana_cli_config().ok();
    let run_file = cli
        .config
        .as_deref()
        .map(load_run_file)
        .transpose()?
        .unwrap_or_default();
    let ctx = build_context(&cli, solana_config.as_ref(), run_file.network.as_ref())?;

    match &cli.command {
        Commands::Run(args) => {
            let config = resolve_run_config(&ctx, run_file.freeze.as_ref(), args)?;
            handle_run(&ctx, config).await
        }
        Commands::Candidates(args) => {
            let config = resolve_run_config(&ctx, run_file.freeze.as_ref(), args)?;
            handle_candidates(&ctx, &config).await
        }
        Commands::Holders(args) => handle_holders(&ctx, run_file.freeze.as_ref(), args).await,
        Commands::Status(args) => handle_status(&ctx, run_file.freeze.as_ref(), args).await,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ClusterInfo {
    url: String,
    label: Option<String>,
}

impl ClusterInfo {
    fn is_mainnet(&self) -> bool {
        self.label.as_deref() == Some("mainnet-beta")
    }
}

struct OwnedContext {
    chain: Arc<RpcChainClient>,
    signer: Arc<Keypair>,
    output: OutputFormat,
    cluster: ClusterInfo,
}

fn build_context(
    cli: &Cli,
    solana_config: Option<&SolanaCliConfig>,
    network_override: Option<&NetworkConfig>,
) -> Result<OwnedContext> {
    let cluster_value = if let Some(value) = cli.cluster.as_deref() {
        value.to_string()
    } else if let Some(value) = network_override.and_then(|cfg| cfg.cluster.as_deref()) {
        value.to_string()
    } else if let Some(config) = solana_config {
        config.json_rpc_url.clone()
    } else {
        "devnet".to_string()
    };

    let cluster = resolve_cluster(&cluster_value)?;

    let keypair_value = if let Some(value) = cli.keypair.as_deref() {
        value.to_string()
    } else if let Some(value) = network_override.and_then(|cfg| cfg.keypair_path.as_deref()) {
        value.to_string()
    } else if let Some(config) = solana_config {
        config.keypair_path.clone()
    } else {
        return Err(anyhow!(
            "Missing keypair path. Use --keypair, the run file or Solana CLI config."
        ));
    };

    let commitment_value = network_override
        .and_then(|cfg| cfg.commitment.clone())
        .or_else(|| solana_config.and_then(|cfg| cfg.commitment.clone()));
    let commitment = parse_commitment(commitment_value.as_deref());

    let ws_endpoint = cli
        .ws_endpoint
        .clone()
        .or_else(|| network_override.and_then(|cfg| cfg.ws_endpoint.clone()));

    let keypair_path = expand_tilde(&keypair_value);
    let signer = read_keypair_file(&keypair_path)
        .map_err(|err| anyhow!("Failed to read keypair: {}", err))?;

    let chain = RpcChainClient::new(cluster.url.clone(), ws_endpoint, commitment);

    Ok(OwnedContext {
        chain: Arc::new(chain),
        signer: Arc::new(signer),
        output: cli.output,
        cluster,
    })
}

fn resolve_run_config(
    ctx: &OwnedContext,
    file: Option<&FreezeSettings>,
    args: &FreezeArgs,
) -> Result<RunConfig> {
    let mut settings = merge_settings(file, args);
    if apply_pool_preset(&mut settings, &ctx.cluster) {
        info!("using Raydium pool authorities for mainnet");
    }
    if settings.pool_authorities.as_ref().map_or(true, Vec::is_empty) {
        warn!("no pool authorities configured; the run will stop after the initial pass");
    }
    RunConfig::from_settings(&settings).context("Invalid freeze settings")
}

/// Command-line values win over the run file; whitelists are combined.
fn merge_settings(file: Option<&FreezeSettings>, args: &FreezeArgs) -> FreezeSettings {
    let mut settings = file.cloned().unwrap_or_default();
    if let Some(value) = &args.mint {
        settings.mint = Some(value.clone());
    }
    if let Some(value) = &args.threshold {
        settings.threshold = Some(ThresholdValue::Text(value.clone()));
    }
    if let Some(value) = args.delay {
        settings.delay_seconds = Some(value);
    }
    if let Some(value) = args.timeout {
        settings.timeout_minutes = Some(value);
    }
    if let Some(value) = args.priority_fee {
        settings.priority_micro_lamports = Some(value);
    }
    settings.whitelist.extend(args.whitelist.iter().cloned());
    if let Some(value) = &args.token_program {
        settings.token_program = Some(value.clone());
    }
    if !args.pool_authorities.is_empty() {
        settings.pool_authorities = Some(args.pool_authorities.clone());
    }
    if let Some(value) = args.chunk_size {
        settings.chunk_size = Some(value);
    }
    if let Some(value) = &args.holders_snapshot {
        settings.holders_snapshot = Some(value.clone());
    }
    settings
}

fn apply_pool_preset(settings: &mut FreezeSettings, cluster: &ClusterInfo) -> bool {
    if settings.pool_authorities.is_some() || !cluster.is_mainnet() {
        return false;
    }
    settings.pool_authorities = Some(
        RAYDIUM_POOL_AUTHORITIES
            .iter()
            .map(|key| key.to_string())
            .collect(),
    );
    true
}

async fn handle_run(ctx: &OwnedContext, config: RunConfig) -> Result<()> {
    let mint = config.mint;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping at the next tick");
            let _ = shutdown_tx.send(true);
        }
    });

    let chain: Arc<dyn ChainClient> = ctx.chain.clone();
    let report = RunController::new(config, chain, ctx.signer.clone())
        .with_status(Arc::new(TracingSink))
        .with_shutdown(shutdown_rx)
        .run()
        .await;

    if ctx.output == OutputFormat::Json {
        print_json(&RunOutput::new(&mint, &report, &ctx.cluster))?;
    } else {
        println!("Run finished: {}", report.outcome);
        if let Some(vault) = report.vault {
            println!("Pool vault: {} ({})", vault.vault, vault.variant.label());
        }
        println!("Accounts frozen: {}", report.frozen_count());
        for sweep in &report.sweeps {
            for signature in &sweep.signatures {
                let signature = signature.to_string();
                match explorer_url(&signature, &ctx.cluster) {
                    Some(url) => println!("  {}", url),
                    None => println!("  {}", signature),
                }
            }
        }
    }

    match report.outcome {
        RunOutcome::Aborted(err) => Err(anyhow!(err)),
        _ => Ok(()),
    }
}

fn candidate_line(record: &HolderRecord, decimals: u8) -> String {
    format!(
        "  {} owner {} {}",
        record.address,
        record.owner,
        format_amount(record.amount, decimals)
    )
}

async fn handle_candidates(ctx: &OwnedContext, config: &RunConfig) -> Result<()> {
    let mint = fetch_mint(ctx, &config.mint).await?;
    let threshold_raw = config.threshold.to_raw(mint.decimals)?;
    let scanner = HolderScanner::new(ctx.chain.clone(), config.token_program);
    let records = scanner.scan(&config.mint).await?;

    let mut detector = VaultDetector::new(config.pool_authorities.clone());
    detector.observe(&records);
    let whitelist = EffectiveWhitelist::new(
        &config.whitelist,
        &config.pool_authorities,
        ctx.signer.pubkey(),
    );
    let selector = CandidateSelector::new(config.mint, threshold_raw, whitelist);
    let selected = selector.select(&records);
    let chosen: Vec<&HolderRecord> = records
        .iter()
        .filter(|record| selected.contains(&record.address))
        .collect();

    if ctx.output == OutputFormat::Json {
        let output = CandidatesOutput {
            mint: config.mint.to_string(),
            threshold: threshold_raw.to_string(),
            vault: detector.binding().map(|binding| binding.vault.to_string()),
            pool: detector
                .binding()
                .map(|binding| binding.variant.label().to_string()),
            scanned: records.len(),
            candidates: chosen.iter().copied().map(HolderInfo::from).collect(),
        };
        print_json(&output)
    } else {
        println!("Mint: {}", config.mint);
        println!(
            "Threshold: {} ({} raw)",
            config.threshold, threshold_raw
        );
        match detector.binding() {
            Some(binding) => println!(
                "Pool vault: {} ({})",
                binding.vault,
                binding.variant.label()
            ),
            None => println!("Pool vault: not found"),
        }
        println!("Scanned: {}", records.len());
        if chosen.is_empty() {
            println!("No accounts would be frozen");
        } else {
            println!("Would freeze {} account(s):", chosen.len());
            for record in chosen {
                println!("{}", candidate_line(record, mint.decimals));
            }
        }
        Ok(())
    }
}

async fn handle_holders(
    ctx: &OwnedContext,
    file: Option<&FreezeSettings>,
    args: &HoldersArgs,
) -> Result<()> {
    let mint = resolve_mint(&args.mint, file)?;
    let token_program = args
        .token_program
        .clone()
        .or_else(|| file.and_then(|settings| settings.token_program.clone()));
    let info = fetch_mint(ctx, &mint).await?;
    let token_program = match token_program {
        Some(value) => parse_token_program(&value)?,
        None => info.program_id,
    };
    let min_balance = match args.min_balance.as_deref() {
        Some(value) => Some(ThresholdTokens::from_str(value)?.to_raw(info.decimals)?),
        None => None,
    };

    let scanner = HolderScanner::new(ctx.chain.clone(), token_program);
    let mut records: Vec<HolderRecord> = scanner
        .scan(&mint)
        .await?
        .into_iter()
        .filter(|record| min_balance.map_or(true, |min| record.amount >= min))
        .collect();
    records.sort_by(|a, b| b.amount.cmp(&a.amount));
    let holders: Vec<HolderInfo> = records.iter().map(HolderInfo::from).collect();

    if ctx.output == OutputFormat::Json {
        let output = HoldersOutput { holders };
        print_json(&output)
    } else {
        if records.is_empty() {
            println!("No holders found");
        } else {
            for record in &records {
                let frozen = if record.state == HolderState::Frozen {
                    " (frozen)"
                } else {
                    ""
                };
                println!(
                    "{} {}{}",
                    record.owner,
                    format_amount(record.amount, info.decimals),
                    frozen
                );
            }
        }
        Ok(())
    }
}

async fn handle_status(
    ctx: &OwnedContext,
    file: Option<&FreezeSettings>,
    args: &MintOnlyArgs,
) -> Result<()> {
    let mint = resolve_mint(&args.mint, file)?;
    let info = fetch_mint(ctx, &mint).await?;
    let signer = ctx.signer.pubkey();
    let can_freeze = info.freeze_authority == Some(signer);

    if ctx.output == OutputFormat::Json {
        let output = StatusOutput {
            mint: mint.to_string(),
            program: info.program_id.to_string(),
            decimals: info.decimals,
            supply: info.supply.to_string(),
            mint_authority: info.mint_authority.map(|key| key.to_string()),
            freeze_authority: info.freeze_authority.map(|key| key.to_string()),
            signer: signer.to_string(),
            signer_can_freeze: can_freeze,
        };
        print_json(&output)
    } else {
        println!("Token status");
        println!("Mint: {}", mint);
        println!("Program: {}", info.program_id);
        println!("Decimals: {}", info.decimals);
        println!("Supply: {}", format_amount(info.supply, info.decimals));
        println!(
            "Mint authority: {}",
            describe_authority(info.mint_authority.as_ref())
        );
        println!(
            "Freeze authority: {}",
            describe_authority(info.freeze_authority.as_ref())
        );
        println!(
            "Signer {} {} freeze holders",
            signer,
            if can_freeze { "can" } else { "cannot" }
        );
        Ok(())
    }
}

async fn fetch_mint(ctx: &OwnedContext, mint: &Pubkey) -> Result<MintInfo> {
    ctx.chain
        .get_mint(mint)
        .await
        .with_context(|| format!("Failed to load mint {}", mint))
}

fn describe_authority(authority: Option<&Pubkey>) -> String {
    authority
        .map(|key| key.to_string())
        .unwrap_or_else(|| "revoked".to_string())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunFile {
    network: Option<NetworkConfig>,
    freeze: Option<FreezeSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct NetworkConfig {
    cluster: Option<String>,
    ws_endpoint: Option<String>,
    keypair_path: Option<String>,
    commitment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SolanaCliConfig {
    json_rpc_url: String,
    keypair_path: String,
    commitment: Option<String>,
}

fn load_run_file(path: &str) -> Result<RunFile> {
    let contents = fs::read_to_string(expand_tilde(path))
        .with_context(|| format!("Failed to read config: {}", path))?;
    toml::from_str(&contents).context("Failed to parse config")
}

fn load_solana_cli_config() -> Result<SolanaCliConfig> {
    let path = default_solana_config_path();
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read Solana config: {}", path.display()))?;
    serde_yaml::from_str(&contents).context("Failed to parse Solana config")
}

fn default_solana_config_path() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("solana");
    path.push("cli");
    path.push("config.yml");
    path
}

fn resolve_cluster(input: &str) -> Result<ClusterInfo> {
    let lowered = input.to_lowercase();
    let (url, label) = match lowered.as_str() {
        "devnet" => (
            "https://api.devnet.solana.com".to_string(),
            Some("devnet".to_string()),
        ),
        "testnet" => (
            "https://api.testnet.solana.com".to_string(),
            Some("testnet".to_string()),
        ),
        "mainnet" | "mainnet-beta" => (
            "https://api.mainnet-beta.solana.com".to_string(),
            Some("mainnet-beta".to_string()),
        ),
        "localnet" => (
            "http://127.0.0.1:8899".to_string(),
            Some("localnet".to_string()),
        ),
        _ => {
            if input.starts_with("http://") || input.starts_with("https://") {
                let label = if lowered.contains("devnet") {
                    Some("devnet".to_string())
                } else if lowered.contains("testnet") {
                    Some("testnet".to_string())
                } else if lowered.contains("mainnet") {
                    Some("mainnet-beta".to_string())
                } else {
                    None
                };
                (input.to_string(), label)
            } else {
                return Err(anyhow!("Unknown cluster: {}", input));
            }
        }
    };
    Ok(ClusterInfo { url, label })
}

fn parse_commitment(value: Option<&str>) -> CommitmentConfig {
    match value.unwrap_or("confirmed") {
        "processed" => CommitmentConfig::processed(),
        "finalized" => CommitmentConfig::finalized(),
        _ => CommitmentConfig::confirmed(),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn parse_pubkey(value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).map_err(|_| anyhow!("Invalid pubkey: {}", value))
}

fn resolve_mint(mint: &Option<String>, file: Option<&FreezeSettings>) -> Result<Pubkey> {
    let value = mint
        .as_deref()
        .or_else(|| file.and_then(|settings| settings.mint.as_deref()))
        .ok_or_else(|| anyhow!("Missing --mint"))?;
    parse_pubkey(value)
}

fn explorer_url(signature: &str, cluster: &ClusterInfo) -> Option<String> {
    cluster.label.as_ref().map(|label| {
        format!(
            "https://explorer.solana.com/tx/{}?cluster={}",
            signature, label
        )
    })
}

#[derive(Serialize, Clone)]
struct HolderInfo {
    owner: String,
    token_account: String,
    amount: String,
    state: HolderState,
}

impl From<&HolderRecord> for HolderInfo {
    fn from(record: &HolderRecord) -> Self {
        Self {
            owner: record.owner.to_string(),
            token_account: record.address.to_string(),
            amount: record.amount.to_string(),
            state: record.state,
        }
    }
}

#[derive(Serialize)]
struct HoldersOutput {
    holders: Vec<HolderInfo>,
}

#[derive(Serialize)]
struct CandidatesOutput {
    mint: String,
    threshold: String,
    vault: Option<String>,
    pool: Option<String>,
    scanned: usize,
    candidates: Vec<HolderInfo>,
}

#[derive(Serialize)]
struct StatusOutput {
    mint: String,
    program: String,
    decimals: u8,
    supply: String,
    mint_authority: Option<String>,
    freeze_authority: Option<String>,
    signer: String,
    signer_can_freeze: bool,
}

#[derive(Serialize)]
struct SweepOutput {
    kind: &'static str,
    started_after_ms: u128,
    scanned: usize,
    candidates: usize,
    frozen: usize,
    retried: bool,
    signatures: Vec<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct RunOutput {
    mint: String,
    outcome: String,
    vault: Option<String>,
    pool: Option<String>,
    frozen: usize,
    sweeps: Vec<SweepOutput>,
}

impl RunOutput {
    fn new(mint: &Pubkey, report: &RunReport, cluster: &ClusterInfo) -> Self {
        let sweeps = report
            .sweeps
            .iter()
            .map(|sweep| SweepOutput {
                kind: match sweep.kind {
                    SweepKind::Initial => "initial",
                    SweepKind::Steady => "steady",
                },
                started_after_ms: sweep.started_after.as_millis(),
                scanned: sweep.scanned,
                candidates: sweep.candidates,
                frozen: sweep.frozen.len(),
                retried: sweep.retried,
                signatures: sweep
                    .signatures
                    .iter()
                    .map(|signature| {
                        let signature = signature.to_string();
                        explorer_url(&signature, cluster).unwrap_or(signature)
                    })
                    .collect(),
                error: sweep.error.as_ref().map(|err| err.to_string()),
            })
            .collect();
        Self {
            mint: mint.to_string(),
            outcome: report.outcome.to_string(),
            vault: report.vault.map(|binding| binding.vault.to_string()),
            pool: report
                .vault
                .map(|binding| binding.variant.label().to_string()),
            frozen: report.frozen_count(),
            sweeps,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
