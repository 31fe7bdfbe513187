use std::sync::Arc;

use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use tracing::{debug, info, warn};

use crate::chain::ChainClient;
use crate::constants::FREEZE_ACCOUNT_OPCODE;
use crate::errors::ChainError;
use crate::status::{StatusEvent, StatusSink};

#[derive(Debug, Clone, Copy)]
pub struct FreezeParams {
    pub program_id: Pubkey,
    pub mint: Pubkey,
    pub authority: Pubkey,
}

pub fn build_freeze_instruction(params: &FreezeParams, account: Pubkey) -> Instruction {
    let accounts = vec![
        AccountMeta::new(account, false),
        AccountMeta::new_readonly(params.mint, false),
        AccountMeta::new_readonly(params.authority, true),
    ];
    Instruction {
        program_id: params.program_id,
        accounts,
        data: vec![FREEZE_ACCOUNT_OPCODE],
    }
}

/// Freeze instructions for one chunk, followed by the compute-unit price when
/// `priority_micro_lamports` is non-zero.
pub fn build_batch_instructions(
    params: &FreezeParams,
    accounts: &[Pubkey],
    priority_micro_lamports: u64,
) -> Vec<Instruction> {
    let mut instructions: Vec<Instruction> = accounts
        .iter()
        .map(|account| build_freeze_instruction(params, *account))
        .collect();
    if priority_micro_lamports > 0 {
        instructions.push(ComputeBudgetInstruction::set_compute_unit_price(
            priority_micro_lamports,
        ));
    }
    instructions
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Ok {
        chunk_index: usize,
        chunk_count: usize,
        accounts: Vec<Pubkey>,
        signature: Signature,
    },
    Err {
        chunk_index: usize,
        chunk_count: usize,
        error: ChainError,
    },
}

/// Confirmed batches of one sweep, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub batches: Vec<BatchOutcome>,
}

impl SweepReport {
    pub fn frozen(&self) -> impl Iterator<Item = &Pubkey> {
        self.batches.iter().flat_map(|batch| match batch {
            BatchOutcome::Ok { accounts, .. } => accounts.as_slice(),
            BatchOutcome::Err { .. } => &[],
        })
    }

    pub fn frozen_count(&self) -> usize {
        self.frozen().count()
    }

    pub fn signatures(&self) -> Vec<Signature> {
        self.batches
            .iter()
            .filter_map(|batch| match batch {
                BatchOutcome::Ok { signature, .. } => Some(*signature),
                BatchOutcome::Err { .. } => None,
            })
            .collect()
    }

    pub fn merge(&mut self, other: SweepReport) {
        self.batches.extend(other.batches);
    }
}

/// A sweep stopped at `chunk_index`. `remaining` holds that chunk and every
/// account after it, none of which were confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub chunk_index: usize,
    pub error: ChainError,
    pub report: SweepReport,
    pub remaining: Vec<Pubkey>,
}

pub struct BatchFreezer {
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer + Send + Sync>,
    params: FreezeParams,
    chunk_size: usize,
    priority_micro_lamports: u64,
    status: Arc<dyn StatusSink>,
}

impl BatchFreezer {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer + Send + Sync>,
        program_id: Pubkey,
        mint: Pubkey,
        chunk_size: usize,
        priority_micro_lamports: u64,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let params = FreezeParams {
            program_id,
            mint,
            authority: signer.pubkey(),
        };
        Self {
            chain,
            signer,
            params,
            chunk_size: chunk_size.max(1),
            priority_micro_lamports,
            status,
        }
    }

    /// Submits `accounts` in sequential chunks. Stops at the first failed
    /// chunk; nothing is retried here.
    pub async fn freeze(&self, accounts: &[Pubkey]) -> Result<SweepReport, BatchFailure> {
        let mut report = SweepReport::default();
        if accounts.is_empty() {
            debug!("no accounts to freeze");
            return Ok(report);
        }

        let chunks: Vec<&[Pubkey]> = accounts.chunks(self.chunk_size).collect();
        let chunk_count = chunks.len();
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            match self.submit_chunk(chunk).await {
                Ok(signature) => {
                    info!(
                        chunk = chunk_index + 1,
                        chunk_count,
                        size = chunk.len(),
                        %signature,
                        "freeze batch confirmed"
                    );
                    self.status
                        .emit(batch_success(chunk_index, chunk_count, chunk, &signature));
                    report.batches.push(BatchOutcome::Ok {
                        chunk_index,
                        chunk_count,
                        accounts: chunk.to_vec(),
                        signature,
                    });
                }
                Err(error) => {
                    warn!(chunk = chunk_index + 1, chunk_count, "freeze batch failed: {}", error);
                    self.status.emit(
                        StatusEvent::error(format!(
                            "Freeze batch {}/{} failed",
                            chunk_index + 1,
                            chunk_count
                        ))
                        .with_cause(&error),
                    );
                    report.batches.push(BatchOutcome::Err {
                        chunk_index,
                        chunk_count,
                        error: error.clone(),
                    });
                    let remaining = accounts[chunk_index * self.chunk_size..].to_vec();
                    return Err(BatchFailure {
                        chunk_index,
                        error,
                        report,
                        remaining,
                    });
                }
            }
        }
        Ok(report)
    }

    async fn submit_chunk(&self, chunk: &[Pubkey]) -> Result<Signature, ChainError> {
        let instructions =
            build_batch_instructions(&self.params, chunk, self.priority_micro_lamports);
        let (blockhash, _) = self.chain.latest_blockhash().await?;
        let mut transaction =
            Transaction::new_with_payer(&instructions, Some(&self.params.authority));
        {
            let signers: Vec<&dyn Signer> = vec![self.signer.as_ref()];
            transaction
                .try_sign(&signers, blockhash)
                .map_err(|err| ChainError::Signing(err.to_string()))?;
        }
        self.chain.send_and_confirm(&transaction).await
    }
}

fn batch_success(
    chunk_index: usize,
    chunk_count: usize,
    chunk: &[Pubkey],
    signature: &Signature,
) -> StatusEvent {
    let message = match (chunk_count, chunk) {
        (1, [account]) => format!("Done: {} frozen", account),
        (1, _) => format!("Done: {} accounts frozen", chunk.len()),
        _ => format!(
            "Done ({}/{}): {} accounts frozen",
            chunk_index + 1,
            chunk_count,
            chunk.len()
        ),
    };
    StatusEvent::success(message).with_cause(format!("signature {}", signature))
}
