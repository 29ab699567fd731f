//! In-memory doubles for the relay's ledger and attestation source

#![allow(dead_code)]

use async_trait::async_trait;
use price_relay::accumulator::{encode_price_feed_message, AccumulatorUpdate, MerklePriceUpdate};
use price_relay::composer::{ExecutionUnit, OperationKind};
use price_relay::fetcher::{LatestUpdates, ParsedPrice, UpdateSource};
use price_relay::ledger::{Ledger, SubmitOptions};
use price_relay::price_account::{PriceMessage, PriceUpdateAccount, VerificationLevel};
use price_relay::{FeedId, RelayError, Result};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const NOW: i64 = 1_700_000_000;

pub fn message(feed_id: FeedId, price: i64, publish_time: i64) -> PriceMessage {
    PriceMessage {
        feed_id,
        price,
        conf: 250,
        exponent: -2,
        publish_time,
        prev_publish_time: publish_time - 1,
        ema_price: price,
        ema_conf: 250,
    }
}

pub fn record(message: PriceMessage) -> PriceUpdateAccount {
    PriceUpdateAccount {
        write_authority: Pubkey::new_unique(),
        verification_level: VerificationLevel::Full,
        price_message: message,
        posted_slot: 42,
    }
}

/// One submitted unit as the ledger saw it
#[derive(Debug, Clone)]
pub struct Submission {
    pub kinds: Vec<OperationKind>,
    pub signers: usize,
    pub options: SubmitOptions,
}

pub struct MemoryLedger {
    payer: Pubkey,
    now: i64,
    records: Mutex<HashMap<Pubkey, Vec<u8>>>,
    submissions: Mutex<Vec<Submission>>,
    /// Reject every submission from this index on
    reject_from: Option<usize>,
    /// Time a sent unit takes to confirm
    confirm_delay: Option<Duration>,
    /// Sent units execute and fail on-chain
    revert: bool,
}

impl MemoryLedger {
    pub fn new(now: i64) -> Self {
        Self {
            payer: Pubkey::new_unique(),
            now,
            records: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            reject_from: None,
            confirm_delay: None,
            revert: false,
        }
    }

    pub fn confirming_after(mut self, delay: Duration) -> Self {
        self.confirm_delay = Some(delay);
        self
    }

    pub fn reverting(mut self) -> Self {
        self.revert = true;
        self
    }

    pub fn rejecting_from(mut self, index: usize) -> Self {
        self.reject_from = Some(index);
        self
    }

    pub fn store(&self, handle: Pubkey, account: &PriceUpdateAccount) {
        self.records.lock().unwrap().insert(handle, account.encode());
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    fn fee_payer(&self) -> Pubkey {
        self.payer
    }

    async fn current_time(&self) -> Result<i64> {
        Ok(self.now)
    }

    async fn price_record(&self, handle: &Pubkey) -> Result<Option<PriceUpdateAccount>> {
        self.records
            .lock()
            .unwrap()
            .get(handle)
            .map(|data| PriceUpdateAccount::decode(data))
            .transpose()
    }

    async fn send(&self, unit: &ExecutionUnit, options: SubmitOptions) -> Result<Signature> {
        let mut submissions = self.submissions.lock().unwrap();
        let index = submissions.len();
        if self.reject_from.is_some_and(|from| index >= from) {
            return Err(RelayError::SubmissionRejected(format!("unit {index} rejected")));
        }

        submissions.push(Submission {
            kinds: unit.operations().iter().map(|op| op.kind).collect(),
            signers: 1 + unit.ephemeral_signers().count(),
            options,
        });
        Ok(Signature::from([index as u8 + 1; 64]))
    }

    async fn confirm(&self, signature: &Signature) -> Result<()> {
        if let Some(delay) = self.confirm_delay {
            tokio::time::sleep(delay).await;
        }
        if self.revert {
            return Err(RelayError::SubmissionRejected(format!(
                "{signature} failed: custom program error"
            )));
        }
        Ok(())
    }
}

/// Attestation source answering every request with the same signed update
pub struct CountingSource {
    calls: AtomicUsize,
    answer: LatestUpdates,
    delay: Option<Duration>,
}

impl CountingSource {
    pub fn new(messages: &[PriceMessage]) -> Self {
        let update = AccumulatorUpdate {
            vaa: vaa(13),
            updates: messages
                .iter()
                .map(|m| MerklePriceUpdate {
                    message: encode_price_feed_message(m),
                    proof: vec![[7; 20]; 4],
                })
                .collect(),
        };
        let answer = LatestUpdates {
            binary: vec![update.encode().unwrap()],
            parsed: messages
                .iter()
                .map(|m| ParsedPrice {
                    feed_id: m.feed_id,
                    price: m.price,
                    conf: m.conf,
                    exponent: m.exponent,
                    publish_time: m.publish_time,
                })
                .collect(),
        };
        Self {
            calls: AtomicUsize::new(0),
            answer,
            delay: None,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpdateSource for CountingSource {
    async fn latest_updates(&self, _feed_ids: &[FeedId]) -> Result<LatestUpdates> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.answer.clone())
    }
}

/// VAA with `signatures` dummy guardian signatures on guardian set 4
pub fn vaa(signatures: u8) -> Vec<u8> {
    let mut out = vec![1, 0, 0, 0, 4, signatures];
    out.extend(std::iter::repeat(0x22).take(signatures as usize * 66));
    out.extend_from_slice(b"vaa body");
    out
}
