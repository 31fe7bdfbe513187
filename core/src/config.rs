use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;

use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_REQUEST_TICK_MS, DEFAULT_TICK_MS, LEGACY_TOKEN_PROGRAM_ID,
    MAX_CHUNK_SIZE, MAX_RUN_SECS, TOKEN_2022_PROGRAM_ID,
};
use crate::errors::FreezeError;

/// Raw `[freeze]` table of a run file. Every field is validated by
/// [`RunConfig::from_settings`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FreezeSettings {
    pub mint: Option<String>,
    pub token_program: Option<String>,
    pub threshold: Option<ThresholdValue>,
    pub delay_seconds: Option<u64>,
    pub timeout_minutes: Option<u64>,
    pub priority_micro_lamports: Option<u64>,
    #[serde(default)]
    pub whitelist: Vec<String>,
    pub pool_authorities: Option<Vec<String>>,
    pub chunk_size: Option<usize>,
    pub tick_ms: Option<u64>,
    pub request_tick_ms: Option<u64>,
    pub holders_snapshot: Option<PathBuf>,
}

/// Thresholds may be written as `100`, `0.5` or `"1_000.25"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ThresholdValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ThresholdValue {
    fn as_text(&self) -> String {
        match self {
            ThresholdValue::Integer(value) => value.to_string(),
            ThresholdValue::Float(value) => value.to_string(),
            ThresholdValue::Text(value) => value.clone(),
        }
    }
}

/// A non-negative decimal amount of whole tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTokens {
    whole: u64,
    fraction: String,
}

impl ThresholdTokens {
    pub fn zero() -> Self {
        Self {
            whole: 0,
            fraction: String::new(),
        }
    }

    /// `floor(tokens * 10^decimals)`. Fraction digits beyond `decimals` are dropped.
    pub fn to_raw(&self, decimals: u8) -> Result<u64, FreezeError> {
        let scale = 10u64
            .checked_pow(decimals as u32)
            .ok_or_else(|| FreezeError::ConfigInvalid("decimal overflow".to_string()))?;
        let mut fraction: String = self.fraction.chars().take(decimals as usize).collect();
        while fraction.len() < decimals as usize {
            fraction.push('0');
        }
        let fractional_value: u64 = if fraction.is_empty() {
            0
        } else {
            fraction
                .parse()
                .map_err(|_| FreezeError::ConfigInvalid("invalid threshold".to_string()))?
        };
        self.whole
            .checked_mul(scale)
            .and_then(|value| value.checked_add(fractional_value))
            .ok_or_else(|| FreezeError::ConfigInvalid("threshold overflows u64".to_string()))
    }
}

impl FromStr for ThresholdTokens {
    type Err = FreezeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || FreezeError::ConfigInvalid(format!("invalid threshold: {}", value));
        let sanitized = value.trim().replace('_', "");
        if sanitized.starts_with('-') {
            return Err(FreezeError::ConfigInvalid(format!(
                "threshold must not be negative: {}",
                value
            )));
        }
        let sanitized = sanitized.strip_prefix('+').unwrap_or(&sanitized);
        let (whole, fraction) = match sanitized.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (sanitized, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let whole = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        Ok(Self {
            whole,
            fraction: fraction.trim_end_matches('0').to_string(),
        })
    }
}

impl fmt::Display for ThresholdTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fraction.is_empty() {
            write!(f, "{}", self.whole)
        } else {
            write!(f, "{}.{}", self.whole, self.fraction)
        }
    }
}

/// Renders a raw amount in whole tokens, e.g. `1500000` at 6 decimals is `1.500000`.
pub fn format_amount(amount: u64, decimals: u8) -> String {
    let Some(scale) = 10u64.checked_pow(decimals as u32) else {
        return amount.to_string();
    };
    if decimals == 0 {
        return amount.to_string();
    }
    let whole = amount / scale;
    let frac = amount % scale;
    format!("{}.{:0width$}", whole, frac, width = decimals as usize)
}

/// Resolves `legacy`, `token-2022` or a base58 program id.
pub fn parse_token_program(value: &str) -> Result<Pubkey, FreezeError> {
    match value.to_lowercase().as_str() {
        "legacy" | "spl-token" | "token" => Ok(LEGACY_TOKEN_PROGRAM_ID),
        "token-2022" | "token2022" | "spl-token-2022" => Ok(TOKEN_2022_PROGRAM_ID),
        _ => {
            let program = parse_pubkey("token_program", value)?;
            if program != LEGACY_TOKEN_PROGRAM_ID && program != TOKEN_2022_PROGRAM_ID {
                return Err(FreezeError::ConfigInvalid(format!(
                    "unsupported token program: {}",
                    value
                )));
            }
            Ok(program)
        }
    }
}

pub fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey, FreezeError> {
    Pubkey::from_str(value.trim())
        .map_err(|_| FreezeError::ConfigInvalid(format!("invalid {}: {}", field, value)))
}

/// Validated, immutable inputs of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mint: Pubkey,
    pub token_program: Pubkey,
    pub threshold: ThresholdTokens,
    pub freeze_delay: Duration,
    pub timeout: Duration,
    pub priority_micro_lamports: u64,
    pub whitelist: BTreeSet<Pubkey>,
    pub pool_authorities: Vec<Pubkey>,
    pub chunk_size: usize,
    pub tick: Duration,
    pub request_tick: Duration,
    pub holders_snapshot: Option<PathBuf>,
}

impl RunConfig {
    pub fn builder(mint: Pubkey) -> RunConfigBuilder {
        RunConfigBuilder::new(mint)
    }

    pub fn from_settings(settings: &FreezeSettings) -> Result<Self, FreezeError> {
        let mint = settings
            .mint
            .as_deref()
            .ok_or_else(|| FreezeError::ConfigInvalid("missing mint".to_string()))?;
        let mint = parse_pubkey("mint", mint)?;

        let mut builder = RunConfigBuilder::new(mint);
        if let Some(program) = settings.token_program.as_deref() {
            builder = builder.token_program(parse_token_program(program)?);
        }
        if let Some(threshold) = settings.threshold.as_ref() {
            builder = builder.threshold(threshold.as_text().parse()?);
        }
        if let Some(delay) = settings.delay_seconds {
            builder = builder.freeze_delay(Duration::from_secs(delay));
        }
        if let Some(minutes) = settings.timeout_minutes {
            builder = builder.timeout_minutes(minutes);
        }
        if let Some(priority) = settings.priority_micro_lamports {
            builder = builder.priority_micro_lamports(priority);
        }
        let whitelist = settings
            .whitelist
            .iter()
            .map(|entry| parse_pubkey("whitelist entry", entry))
            .collect::<Result<Vec<_>, _>>()?;
        builder = builder.whitelist(whitelist);
        if let Some(authorities) = settings.pool_authorities.as_ref() {
            let authorities = authorities
                .iter()
                .map(|entry| parse_pubkey("pool authority", entry))
                .collect::<Result<Vec<_>, _>>()?;
            builder = builder.pool_authorities(authorities);
        }
        if let Some(chunk_size) = settings.chunk_size {
            builder = builder.chunk_size(chunk_size);
        }
        if let Some(tick) = settings.tick_ms {
            builder = builder.tick(Duration::from_millis(tick));
        }
        if let Some(request_tick) = settings.request_tick_ms {
            builder = builder.request_tick(Duration::from_millis(request_tick));
        }
        if let Some(path) = settings.holders_snapshot.clone() {
            builder = builder.holders_snapshot(path);
        }
        builder.build()
    }
}

pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    fn new(mint: Pubkey) -> Self {
        Self {
            config: RunConfig {
                mint,
                token_program: LEGACY_TOKEN_PROGRAM_ID,
                threshold: ThresholdTokens::zero(),
                freeze_delay: Duration::ZERO,
                timeout: Duration::from_secs(180 * 60),
                priority_micro_lamports: 0,
                whitelist: BTreeSet::new(),
                pool_authorities: Vec::new(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                tick: Duration::from_millis(DEFAULT_TICK_MS),
                request_tick: Duration::from_millis(DEFAULT_REQUEST_TICK_MS),
                holders_snapshot: None,
            },
        }
    }

    pub fn token_program(mut self, program: Pubkey) -> Self {
        self.config.token_program = program;
        self
    }

    pub fn threshold(mut self, threshold: ThresholdTokens) -> Self {
        self.config.threshold = threshold;
        self
    }

    pub fn freeze_delay(mut self, delay: Duration) -> Self {
        self.config.freeze_delay = delay;
        self
    }

    pub fn timeout_minutes(mut self, minutes: u64) -> Self {
        self.config.timeout = Duration::from_secs(minutes.saturating_mul(60));
        self
    }

    pub fn priority_micro_lamports(mut self, priority: u64) -> Self {
        self.config.priority_micro_lamports = priority;
        self
    }

    pub fn whitelist(mut self, whitelist: impl IntoIterator<Item = Pubkey>) -> Self {
        self.config.whitelist.extend(whitelist);
        self
    }

    pub fn pool_authorities(mut self, authorities: Vec<Pubkey>) -> Self {
        self.config.pool_authorities = authorities;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    pub fn request_tick(mut self, request_tick: Duration) -> Self {
        self.config.request_tick = request_tick;
        self
    }

    pub fn holders_snapshot(mut self, path: PathBuf) -> Self {
        self.config.holders_snapshot = Some(path);
        self
    }

    pub fn build(self) -> Result<RunConfig, FreezeError> {
        let config = self.config;
        if config.timeout.is_zero() {
            return Err(FreezeError::ConfigInvalid(
                "timeout_minutes must be positive".to_string(),
            ));
        }
        if config.timeout > Duration::from_secs(MAX_RUN_SECS) {
            return Err(FreezeError::ConfigInvalid(format!(
                "timeout_minutes must be at most {}",
                MAX_RUN_SECS / 60
            )));
        }
        if config.freeze_delay > Duration::from_secs(MAX_RUN_SECS) {
            return Err(FreezeError::ConfigInvalid(format!(
                "delay_seconds must be at most {}",
                MAX_RUN_SECS
            )));
        }
        if config.chunk_size == 0 || config.chunk_size > MAX_CHUNK_SIZE {
            return Err(FreezeError::ConfigInvalid(format!(
                "chunk_size must be between 1 and {}",
                MAX_CHUNK_SIZE
            )));
        }
        if config.tick.is_zero() {
            return Err(FreezeError::ConfigInvalid(
                "tick_ms must be positive".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        if !config.pool_authorities.iter().all(|key| seen.insert(*key)) {
            return Err(FreezeError::ConfigInvalid(
                "pool_authorities contains duplicates".to_string(),
            ));
        }
        Ok(config)
    }
}
