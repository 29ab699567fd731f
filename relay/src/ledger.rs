//! Ledger connection

use async_trait::async_trait;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_config::RpcSendTransactionConfig,
};
use solana_sdk::{
    clock::Clock,
    commitment_config::CommitmentConfig,
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    sysvar,
    transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;

use crate::composer::ExecutionUnit;
use crate::error::{RelayError, Result};
use crate::price_account::PriceUpdateAccount;
use crate::receiver::RECEIVER_PROGRAM_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    pub skip_preflight: bool,
    /// Compute-unit price in micro-lamports
    pub priority_fee: u64,
}

/// Everything the relay needs from the chain
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Account paying fees and signing every unit
    fn fee_payer(&self) -> Pubkey;

    /// Unix time according to the ledger's clock
    async fn current_time(&self) -> Result<i64>;

    /// Posted price record at `handle`, `None` if the account does not exist
    async fn price_record(&self, handle: &Pubkey) -> Result<Option<PriceUpdateAccount>>;

    /// Sign and broadcast one execution unit
    ///
    /// Once this returns the unit may land even if confirmation never does.
    async fn send(&self, unit: &ExecutionUnit, options: SubmitOptions) -> Result<Signature>;

    /// Wait until a sent unit is confirmed; an on-chain error is a rejection
    async fn confirm(&self, signature: &Signature) -> Result<()>;
}

fn classify_client_error(err: ClientError) -> RelayError {
    let transport = matches!(
        err.kind(),
        ClientErrorKind::Io(_) | ClientErrorKind::Reqwest(_)
    );
    if transport {
        RelayError::network(err)
    } else {
        RelayError::SubmissionRejected(err.to_string())
    }
}

pub struct RpcLedger {
    client: RpcClient,
    payer: Arc<Keypair>,
    commitment: CommitmentConfig,
    confirm_attempts: u32,
    confirm_interval: Duration,
}

impl RpcLedger {
    pub fn new(rpc_url: String, payer: Arc<Keypair>, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url, commitment),
            payer,
            commitment,
            confirm_attempts: 40,
            confirm_interval: Duration::from_millis(500),
        }
    }

    pub fn with_confirmation(mut self, attempts: u32, interval: Duration) -> Self {
        self.confirm_attempts = attempts;
        self.confirm_interval = interval;
        self
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    fn fee_payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    async fn current_time(&self) -> Result<i64> {
        let account = self
            .client
            .get_account_with_commitment(&sysvar::clock::id(), self.commitment)
            .await
            .map_err(RelayError::network)?
            .value
            .ok_or_else(|| RelayError::network("clock sysvar unavailable"))?;

        let clock: Clock = bincode::deserialize(&account.data)
            .map_err(|e| RelayError::decode(format!("clock sysvar: {e}")))?;

        log::debug!("Ledger clock: slot {} time {}", clock.slot, clock.unix_timestamp);
        Ok(clock.unix_timestamp)
    }

    async fn price_record(&self, handle: &Pubkey) -> Result<Option<PriceUpdateAccount>> {
        let Some(account) = self
            .client
            .get_account_with_commitment(handle, self.commitment)
            .await
            .map_err(RelayError::network)?
            .value
        else {
            return Ok(None);
        };

        if account.owner != RECEIVER_PROGRAM_ID {
            return Err(RelayError::decode(format!(
                "record {handle} is owned by {}, not the price receiver",
                account.owner
            )));
        }

        PriceUpdateAccount::decode(&account.data).map(Some)
    }

    async fn send(&self, unit: &ExecutionUnit, options: SubmitOptions) -> Result<Signature> {
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(RelayError::network)?;

        let instructions = unit.instructions(options.priority_fee);
        let message = Message::new(&instructions, Some(&self.payer.pubkey()));
        let mut transaction = Transaction::new_unsigned(message);

        // Signer references must not live across the send below
        {
            let mut signers: Vec<&dyn Signer> = vec![self.payer.as_ref()];
            signers.extend(unit.ephemeral_signers().map(|k| k as &dyn Signer));
            transaction
                .try_sign(&signers, blockhash)
                .map_err(|e| RelayError::SubmissionRejected(format!("signing failed: {e}")))?;
        }

        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            ..Default::default()
        };

        let signature = self
            .client
            .send_transaction_with_config(&transaction, config)
            .await
            .map_err(classify_client_error)?;
        log::info!("Transaction sent: {}", signature);
        Ok(signature)
    }

    async fn confirm(&self, signature: &Signature) -> Result<()> {
        for _ in 0..self.confirm_attempts {
            let status = self
                .client
                .get_signature_status_with_commitment(signature, self.commitment)
                .await
                .map_err(RelayError::network)?;

            match status {
                Some(Ok(())) => return Ok(()),
                Some(Err(e)) => {
                    return Err(RelayError::SubmissionRejected(format!(
                        "{signature} failed: {e}"
                    )))
                }
                None => tokio::time::sleep(self.confirm_interval).await,
            }
        }

        Err(RelayError::network(format!(
            "{signature} not confirmed after {} attempts",
            self.confirm_attempts
        )))
    }
}
