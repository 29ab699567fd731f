//! Pyth Price Relay
//!
//! Keeps a sharded Pyth price record on Solana fresh. When the stored
//! record is older than a staleness threshold, the latest signed update is
//! pulled from Hermes and posted through the price receiver program in the
//! same transaction as the consumer instructions that read it; otherwise
//! the record is read where it is.
//!
//! ## Flow
//!
//! ```text
//! ledger.price_record ──> staleness::classify ──fresh──> consumer read
//!                                  │
//!                                stale
//!                                  v
//!          UpdateFetcher ──> TransactionComposer ──> ledger.submit (per unit)
//! ```

pub mod accumulator;
pub mod codec;
pub mod composer;
pub mod consumer;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod hermes;
pub mod ledger;
pub mod price_account;
pub mod receiver;
pub mod relay;
pub mod staleness;

pub use error::{ErrorKind, RelayError, RelayFailure, Result, Stage};
pub use feed::FeedId;
pub use relay::{PriceRelay, RelayOutcome, RelaySettings};
