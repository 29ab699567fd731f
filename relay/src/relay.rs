//! Freshness-gated relay
//!
//! ```text
//! Start -> CheckFreshness -> StalePath -> Done
//!                         \-> FreshPath -> Done
//! (any stage)                           -> Failed
//! ```
//!
//! Start reads the feed's record, CheckFreshness compares its publish time
//! with ledger time. A stale record is refreshed by fetching a signed update
//! and submitting post + consumer operations; a fresh one is read in place.

use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::codec::decode_price;
use crate::composer::{
    ComposerConfig, ConsumerBuilder, ExecutionUnit, RecordResolver, TransactionComposer,
};
use crate::error::{ErrorKind, RelayError, RelayFailure, Result, Stage};
use crate::feed::{price_feed_address, FeedId};
use crate::fetcher::{SignedUpdatePayload, UpdateFetcher};
use crate::ledger::{Ledger, SubmitOptions};
use crate::price_account::PriceMessage;
use crate::staleness::{age, classify, Freshness};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub feed_id: FeedId,
    pub shard_id: u16,
    pub staleness_threshold_secs: u64,
    /// Options for units that post updates
    pub post_options: SubmitOptions,
    /// Options for the read-only unit of the fresh path
    pub read_options: SubmitOptions,
    /// Fetch the update while reading the record
    pub prefetch: bool,
    /// Bound on the whole run, covering fetch and submit
    pub deadline: Option<Duration>,
}

/// Successful end of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Record was fresh and read where it lives
    ReadOnly {
        record: Pubkey,
        price: PriceMessage,
        /// `None` when the consumer asked for no read
        signature: Option<Signature>,
    },
    /// Record was stale; a new update was posted
    Refreshed {
        price: PriceMessage,
        signatures: Vec<Signature>,
        read_requested: bool,
    },
}

impl RelayOutcome {
    pub fn price(&self) -> &PriceMessage {
        match self {
            RelayOutcome::ReadOnly { price, .. } | RelayOutcome::Refreshed { price, .. } => price,
        }
    }
}

#[derive(Debug)]
enum RelayState {
    Start,
    CheckFreshness(PriceMessage),
    StalePath(PriceMessage),
    FreshPath(PriceMessage),
    Done(RelayOutcome),
    Failed(RelayFailure),
}

struct RunContext {
    deadline: Option<Instant>,
    prefetched: Option<Result<SignedUpdatePayload>>,
}

pub struct PriceRelay {
    ledger: Arc<dyn Ledger>,
    fetcher: UpdateFetcher,
    consumer: Arc<dyn ConsumerBuilder>,
    composer_config: ComposerConfig,
    settings: RelaySettings,
}

impl PriceRelay {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        fetcher: UpdateFetcher,
        consumer: Arc<dyn ConsumerBuilder>,
        composer_config: ComposerConfig,
        settings: RelaySettings,
    ) -> Self {
        Self {
            ledger,
            fetcher,
            consumer,
            composer_config,
            settings,
        }
    }

    /// Address of the feed's sharded price record
    pub fn record_handle(&self) -> Pubkey {
        price_feed_address(self.settings.shard_id, &self.settings.feed_id)
    }

    pub async fn run(&self) -> std::result::Result<RelayOutcome, RelayFailure> {
        let mut ctx = RunContext {
            deadline: self.settings.deadline.map(|d| Instant::now() + d),
            prefetched: None,
        };

        let mut state = RelayState::Start;
        loop {
            state = match state {
                RelayState::Done(outcome) => return Ok(outcome),
                RelayState::Failed(failure) => {
                    log::error!("{}", failure);
                    return Err(failure);
                }
                RelayState::Start => self.start(&mut ctx).await,
                RelayState::CheckFreshness(record) => self.check_freshness(&ctx, record).await,
                RelayState::StalePath(record) => self.stale_path(&mut ctx, record).await,
                RelayState::FreshPath(record) => self.fresh_path(&ctx, record).await,
            };
            log::debug!("Relay state: {:?}", state);
        }
    }

    async fn bounded<T>(&self, ctx: &RunContext, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match ctx.deadline {
            Some(at) => tokio::time::timeout_at(at, fut).await.map_err(|_| {
                RelayError::DeadlineExceeded(self.settings.deadline.unwrap_or_default().as_secs())
            })?,
            None => fut.await,
        }
    }

    async fn start(&self, ctx: &mut RunContext) -> RelayState {
        let handle = self.record_handle();
        let feed_ids = [self.settings.feed_id];
        log::info!("Reading price record {} for feed {}", handle, self.settings.feed_id);

        let record = if self.settings.prefetch {
            let (record, payload) = tokio::join!(
                self.bounded(ctx, self.ledger.price_record(&handle)),
                self.bounded(ctx, self.fetcher.fetch_latest(&feed_ids)),
            );
            ctx.prefetched = Some(payload);
            record
        } else {
            self.bounded(ctx, self.ledger.price_record(&handle)).await
        };

        match record {
            Ok(Some(account)) if account.price_message.feed_id != self.settings.feed_id => {
                RelayState::Failed(RelayFailure::new(
                    Stage::FreshnessCheck,
                    RelayError::decode(format!(
                        "record {handle} holds feed {}, expected {}",
                        account.price_message.feed_id, self.settings.feed_id
                    )),
                ))
            }
            Ok(Some(account)) => RelayState::CheckFreshness(account.price_message),
            Ok(None) => RelayState::Failed(RelayFailure::new(
                Stage::FreshnessCheck,
                RelayError::RecordNotInitialized(handle),
            )),
            Err(e) => RelayState::Failed(RelayFailure::new(Stage::FreshnessCheck, e)),
        }
    }

    async fn check_freshness(&self, ctx: &RunContext, record: PriceMessage) -> RelayState {
        let now = match self.bounded(ctx, self.ledger.current_time()).await {
            Ok(now) => now,
            Err(e) => return RelayState::Failed(RelayFailure::new(Stage::FreshnessCheck, e)),
        };

        let freshness = classify(now, record, self.settings.staleness_threshold_secs);
        log::info!(
            "Record published at {} is {} ({}s ago, threshold {}s)",
            freshness.record().publish_time,
            if freshness.is_stale() { "stale" } else { "fresh" },
            age(now, freshness.record().publish_time),
            self.settings.staleness_threshold_secs
        );

        match freshness {
            Freshness::Fresh(record) => RelayState::FreshPath(record),
            Freshness::Stale(record) => RelayState::StalePath(record),
        }
    }

    async fn stale_path(&self, ctx: &mut RunContext, record: PriceMessage) -> RelayState {
        let feed_ids = [self.settings.feed_id];
        let fetched = match ctx.prefetched.take() {
            Some(prefetched) => prefetched,
            None => self.bounded(ctx, self.fetcher.fetch_latest(&feed_ids)).await,
        };

        let (payload, price) = match fetched.and_then(|payload| {
            let price = self.validate_update(&payload, &record)?;
            Ok((payload, price))
        }) {
            Ok(fetched) => fetched,
            Err(e) => return RelayState::Failed(RelayFailure::new(Stage::Fetch, e)),
        };

        let composer = TransactionComposer::new(self.ledger.fee_payer(), self.composer_config);
        let batch = match composer.compose(&payload, self.consumer.as_ref()) {
            Ok(batch) => batch,
            Err(e) => return RelayState::Failed(RelayFailure::new(Stage::Compose, e)),
        };
        log::info!(
            "Submitting {} execution unit(s) with {} consumer operation(s)",
            batch.units.len(),
            batch.consumer_operations
        );

        let mut landed = Vec::with_capacity(batch.units.len());
        for unit in &batch.units {
            match self.submit(ctx, unit, self.settings.post_options).await {
                Ok(signature) => landed.push(signature),
                Err((error, in_flight)) => {
                    return RelayState::Failed(RelayFailure {
                        stage: Stage::Submit,
                        error,
                        landed,
                        in_flight,
                    })
                }
            }
        }

        RelayState::Done(RelayOutcome::Refreshed {
            price,
            signatures: landed,
            read_requested: !batch.is_refresh_only(),
        })
    }

    /// Decode the fetched price for our feed before any fee is spent
    fn validate_update(
        &self,
        payload: &SignedUpdatePayload,
        record: &PriceMessage,
    ) -> Result<PriceMessage> {
        let feed_id = self.settings.feed_id;
        let parsed = payload
            .price(&feed_id)
            .ok_or(RelayError::FeedNotFound(feed_id))?;
        let price = payload
            .messages()?
            .into_iter()
            .find(|m| m.feed_id == feed_id)
            .ok_or(RelayError::FeedNotFound(feed_id))?;

        log::info!(
            "Fetched {} = {} (conf {}) published at {}",
            feed_id,
            decode_price(parsed.price, parsed.exponent)?,
            decode_price(parsed.conf, parsed.exponent)?,
            parsed.publish_time
        );

        if price.publish_time < record.publish_time {
            log::warn!(
                "Fetched update for {} is older than the stored record ({} < {})",
                feed_id,
                price.publish_time,
                record.publish_time
            );
        }

        Ok(price)
    }

    async fn fresh_path(&self, ctx: &RunContext, record: PriceMessage) -> RelayState {
        let handle = self.record_handle();
        let mut resolver = RecordResolver::new();
        resolver.insert(self.settings.feed_id, handle);

        let operations = match self.consumer.build_consumer_operations(&resolver) {
            Ok(operations) => operations,
            Err(e) => return RelayState::Failed(RelayFailure::new(Stage::Compose, e)),
        };

        log::info!("Record is fresh: {}", record.describe());

        if operations.is_empty() {
            return RelayState::Done(RelayOutcome::ReadOnly {
                record: handle,
                price: record,
                signature: None,
            });
        }

        let unit = ExecutionUnit::new(operations);
        match self.submit(ctx, &unit, self.settings.read_options).await {
            Ok(signature) => RelayState::Done(RelayOutcome::ReadOnly {
                record: handle,
                price: record,
                signature: Some(signature),
            }),
            Err((error, in_flight)) => RelayState::Failed(RelayFailure {
                in_flight,
                ..RelayFailure::new(Stage::Submit, error)
            }),
        }
    }

    /// Send then confirm one unit
    ///
    /// On error the signature comes back too when the unit was broadcast and
    /// may still land.
    async fn submit(
        &self,
        ctx: &RunContext,
        unit: &ExecutionUnit,
        options: SubmitOptions,
    ) -> std::result::Result<Signature, (RelayError, Option<Signature>)> {
        let signature = self
            .bounded(ctx, self.ledger.send(unit, options))
            .await
            .map_err(|e| (e, None))?;

        match self.bounded(ctx, self.ledger.confirm(&signature)).await {
            Ok(()) => Ok(signature),
            // Executed and failed on-chain; nothing it did persisted
            Err(e) if e.kind() == ErrorKind::SubmissionRejected => Err((e, None)),
            Err(e) => {
                log::warn!("{} was sent but not confirmed: {}", signature, e);
                Err((e, Some(signature)))
            }
        }
    }
}
