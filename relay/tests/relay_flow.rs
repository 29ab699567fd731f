//! End-to-end relay runs against in-memory doubles

mod common;

use common::{message, record, CountingSource, MemoryLedger, NOW};
use price_relay::composer::{ComposerConfig, ConsumerBuilder, Operation, OperationKind, RecordResolver};
use price_relay::consumer::{PriceReadConsumer, RefreshOnly};
use price_relay::feed::price_feed_address;
use price_relay::fetcher::UpdateFetcher;
use price_relay::ledger::SubmitOptions;
use price_relay::{
    ErrorKind, FeedId, PriceRelay, RelayError, RelayOutcome, RelaySettings, Result, Stage,
};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use std::sync::Arc;
use std::time::Duration;

const FEED: FeedId = FeedId::new([0x42; 32]);
const THRESHOLD: u64 = 30;

const POST_OPTIONS: SubmitOptions = SubmitOptions {
    skip_preflight: true,
    priority_fee: 50_000,
};
const READ_OPTIONS: SubmitOptions = SubmitOptions {
    skip_preflight: false,
    priority_fee: 50_000,
};

struct Harness {
    ledger: Arc<MemoryLedger>,
    source: Arc<CountingSource>,
    consumer: Arc<dyn ConsumerBuilder>,
    composer: ComposerConfig,
    prefetch: bool,
    deadline: Option<Duration>,
}

impl Harness {
    /// Ledger at `NOW` holding a record published `age` seconds ago
    fn with_record_age(age: i64) -> Self {
        let ledger = MemoryLedger::new(NOW);
        ledger.store(
            price_feed_address(0, &FEED),
            &record(message(FEED, 6_000_000, NOW - age)),
        );
        Self::new(ledger)
    }

    fn new(ledger: MemoryLedger) -> Self {
        Self {
            ledger: Arc::new(ledger),
            source: Arc::new(CountingSource::new(&[message(FEED, 6_100_000, NOW)])),
            consumer: Arc::new(PriceReadConsumer::new(Pubkey::new_unique(), FEED, 60)),
            composer: ComposerConfig::default(),
            prefetch: false,
            deadline: None,
        }
    }

    fn relay(&self) -> PriceRelay {
        PriceRelay::new(
            self.ledger.clone(),
            UpdateFetcher::new(self.source.clone()),
            self.consumer.clone(),
            self.composer,
            RelaySettings {
                feed_id: FEED,
                shard_id: 0,
                staleness_threshold_secs: THRESHOLD,
                post_options: POST_OPTIONS,
                read_options: READ_OPTIONS,
                prefetch: self.prefetch,
                deadline: self.deadline,
            },
        )
    }
}

#[tokio::test]
async fn test_fresh_record_is_read_in_place() {
    let harness = Harness::with_record_age(5);

    let outcome = harness.relay().run().await.unwrap();

    assert_eq!(harness.source.calls(), 0);
    let submissions = harness.ledger.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].kinds, vec![OperationKind::Consumer]);
    assert_eq!(submissions[0].signers, 1);
    assert_eq!(submissions[0].options, READ_OPTIONS);

    match outcome {
        RelayOutcome::ReadOnly {
            record,
            price,
            signature,
        } => {
            assert_eq!(record, price_feed_address(0, &FEED));
            assert_eq!(price.publish_time, NOW - 5);
            assert!(signature.is_some());
        }
        other => panic!("expected a read, got {other:?}"),
    }
}

#[tokio::test]
async fn test_age_equal_to_threshold_is_fresh() {
    let harness = Harness::with_record_age(THRESHOLD as i64);
    let outcome = harness.relay().run().await.unwrap();

    assert!(matches!(outcome, RelayOutcome::ReadOnly { .. }));
    assert_eq!(harness.source.calls(), 0);
}

#[tokio::test]
async fn test_stale_record_is_refreshed_then_read() {
    let harness = Harness::with_record_age(45);

    let outcome = harness.relay().run().await.unwrap();

    assert_eq!(harness.source.calls(), 1);
    let submissions = harness.ledger.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(
        submissions[0].kinds,
        vec![OperationKind::PostUpdate(FEED), OperationKind::Consumer]
    );
    // Payer plus the ephemeral record key
    assert_eq!(submissions[0].signers, 2);
    assert_eq!(submissions[0].options, POST_OPTIONS);

    match outcome {
        RelayOutcome::Refreshed {
            price,
            signatures,
            read_requested,
        } => {
            assert_eq!(price.publish_time, NOW);
            assert_eq!(price.price, 6_100_000);
            assert_eq!(signatures.len(), 1);
            assert!(read_requested);
        }
        other => panic!("expected a refresh, got {other:?}"),
    }
}

#[tokio::test]
async fn test_refresh_only_consumer() {
    let mut harness = Harness::with_record_age(45);
    harness.consumer = Arc::new(RefreshOnly);

    let outcome = harness.relay().run().await.unwrap();

    assert!(matches!(
        outcome,
        RelayOutcome::Refreshed {
            read_requested: false,
            ..
        }
    ));
    let submissions = harness.ledger.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].kinds, vec![OperationKind::PostUpdate(FEED)]);
}

#[tokio::test]
async fn test_fresh_record_without_reads_submits_nothing() {
    let mut harness = Harness::with_record_age(1);
    harness.consumer = Arc::new(RefreshOnly);

    let outcome = harness.relay().run().await.unwrap();

    assert!(matches!(
        outcome,
        RelayOutcome::ReadOnly {
            signature: None,
            ..
        }
    ));
    assert!(harness.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_missing_record_fails_before_fetch() {
    let harness = Harness::new(MemoryLedger::new(NOW));

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(failure.stage, Stage::FreshnessCheck);
    assert_eq!(failure.kind(), ErrorKind::RecordNotInitialized);
    assert!(!failure.is_partial());
    assert_eq!(harness.source.calls(), 0);
    assert!(harness.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_older_update_is_still_posted() {
    let mut harness = Harness::with_record_age(100);
    harness.source = Arc::new(CountingSource::new(&[message(FEED, 5_900_000, NOW - 200)]));

    let outcome = harness.relay().run().await.unwrap();

    assert_eq!(outcome.price().publish_time, NOW - 200);
    assert_eq!(harness.ledger.submissions().len(), 1);
}

#[tokio::test]
async fn test_update_without_requested_feed() {
    let mut harness = Harness::with_record_age(45);
    let other = FeedId::new([0x77; 32]);
    harness.source = Arc::new(CountingSource::new(&[message(other, 1, NOW)]));

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(failure.stage, Stage::Fetch);
    assert!(matches!(failure.error, RelayError::FeedNotFound(id) if id == FEED));
    assert!(harness.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_rejected_submission() {
    let ledger = MemoryLedger::new(NOW).rejecting_from(0);
    ledger.store(
        price_feed_address(0, &FEED),
        &record(message(FEED, 6_000_000, NOW - 45)),
    );
    let harness = Harness::new(ledger);

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(failure.stage, Stage::Submit);
    assert_eq!(failure.kind(), ErrorKind::SubmissionRejected);
    assert!(failure.landed.is_empty());
}

/// Reads the posted record and also pings the program on its own
struct ReadAndPing {
    program: Pubkey,
}

impl ConsumerBuilder for ReadAndPing {
    fn build_consumer_operations(&self, resolver: &RecordResolver) -> Result<Vec<Operation>> {
        let mut operations = PriceReadConsumer::new(self.program, FEED, 60)
            .build_consumer_operations(resolver)?;
        operations.push(Operation::consumer(
            Instruction::new_with_bytes(self.program, &[9], vec![]),
            1_000,
        ));
        Ok(operations)
    }
}

#[tokio::test]
async fn test_partial_submission_reports_landed_units() {
    let ledger = MemoryLedger::new(NOW).rejecting_from(1);
    ledger.store(
        price_feed_address(0, &FEED),
        &record(message(FEED, 6_000_000, NOW - 45)),
    );
    let mut harness = Harness::new(ledger);
    harness.consumer = Arc::new(ReadAndPing {
        program: Pubkey::new_unique(),
    });
    // Two budget instructions plus the post and its read
    harness.composer.max_instructions_per_unit = 4;

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(failure.stage, Stage::Submit);
    assert!(failure.is_partial());
    assert_eq!(failure.landed.len(), 1);

    let submissions = harness.ledger.submissions();
    assert_eq!(
        submissions[0].kinds,
        vec![OperationKind::PostUpdate(FEED), OperationKind::Consumer]
    );
}

fn stale_ledger(ledger: MemoryLedger) -> MemoryLedger {
    ledger.store(
        price_feed_address(0, &FEED),
        &record(message(FEED, 6_000_000, NOW - 45)),
    );
    ledger
}

#[tokio::test]
async fn test_deadline_while_confirming_keeps_sent_unit() {
    let mut harness = Harness::new(stale_ledger(
        MemoryLedger::new(NOW).confirming_after(Duration::from_secs(5)),
    ));
    harness.deadline = Some(Duration::from_millis(200));

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(harness.ledger.submissions().len(), 1);
    assert_eq!(failure.stage, Stage::Submit);
    assert_eq!(failure.kind(), ErrorKind::DeadlineExceeded);
    assert!(failure.landed.is_empty());
    assert!(failure.in_flight.is_some());
    assert!(failure.is_partial());
}

#[tokio::test]
async fn test_deadline_while_confirming_a_read() {
    let ledger = MemoryLedger::new(NOW).confirming_after(Duration::from_secs(5));
    ledger.store(
        price_feed_address(0, &FEED),
        &record(message(FEED, 6_000_000, NOW - 5)),
    );
    let mut harness = Harness::new(ledger);
    harness.deadline = Some(Duration::from_millis(200));

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(failure.stage, Stage::Submit);
    assert!(failure.in_flight.is_some());
}

#[tokio::test]
async fn test_reverted_unit_is_not_in_flight() {
    let harness = Harness::new(stale_ledger(MemoryLedger::new(NOW).reverting()));

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(failure.kind(), ErrorKind::SubmissionRejected);
    assert!(failure.in_flight.is_none());
    assert!(!failure.is_partial());
}

#[tokio::test]
async fn test_prefetch_on_fresh_record() {
    let mut harness = Harness::with_record_age(5);
    harness.prefetch = true;

    let outcome = harness.relay().run().await.unwrap();

    assert!(matches!(outcome, RelayOutcome::ReadOnly { .. }));
    assert_eq!(harness.source.calls(), 1);
    assert_eq!(harness.ledger.submissions().len(), 1);
}

#[tokio::test]
async fn test_prefetch_on_stale_record_fetches_once() {
    let mut harness = Harness::with_record_age(45);
    harness.prefetch = true;

    let outcome = harness.relay().run().await.unwrap();

    assert!(matches!(outcome, RelayOutcome::Refreshed { .. }));
    assert_eq!(harness.source.calls(), 1);
}

#[tokio::test]
async fn test_deadline_bounds_a_slow_fetch() {
    let mut harness = Harness::with_record_age(45);
    harness.source =
        Arc::new(CountingSource::new(&[message(FEED, 6_100_000, NOW)]).slow(Duration::from_secs(5)));
    harness.deadline = Some(Duration::from_millis(50));

    let failure = harness.relay().run().await.unwrap_err();

    assert_eq!(failure.stage, Stage::Fetch);
    assert_eq!(failure.kind(), ErrorKind::DeadlineExceeded);
    assert!(harness.ledger.submissions().is_empty());
}

#[tokio::test]
async fn test_empty_feed_set_is_rejected_without_a_request() {
    let source = Arc::new(CountingSource::new(&[message(FEED, 1, NOW)]));
    let fetcher = UpdateFetcher::new(source.clone());

    let err = fetcher.fetch_latest(&[]).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(source.calls(), 0);
}
