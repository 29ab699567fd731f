//! Update fetcher
//!
//! Pulls the latest signed price updates for a set of feeds from an
//! attestation source and validates them before any fee is spent.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::accumulator::AccumulatorUpdate;
use crate::error::{RelayError, Result};
use crate::feed::FeedId;
use crate::price_account::PriceMessage;

/// Price fields the attestation service reports alongside the signed bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPrice {
    pub feed_id: FeedId,
    pub price: i64,
    pub conf: u64,
    pub exponent: i32,
    pub publish_time: i64,
}

/// Raw answer of an attestation source
#[derive(Debug, Clone, Default)]
pub struct LatestUpdates {
    /// Signed accumulator payloads, already base64-decoded
    pub binary: Vec<Vec<u8>>,
    pub parsed: Vec<ParsedPrice>,
}

/// Off-chain attestation service
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn latest_updates(&self, feed_ids: &[FeedId]) -> Result<LatestUpdates>;
}

/// Validated signed update for one or more feeds
#[derive(Debug, Clone)]
pub struct SignedUpdatePayload {
    pub binary: Vec<Vec<u8>>,
    pub updates: Vec<AccumulatorUpdate>,
    pub parsed: Vec<ParsedPrice>,
}

impl SignedUpdatePayload {
    pub fn price(&self, feed_id: &FeedId) -> Option<&ParsedPrice> {
        self.parsed.iter().find(|p| p.feed_id == *feed_id)
    }

    /// Every price message carried by the signed bytes, in payload order
    pub fn messages(&self) -> Result<Vec<PriceMessage>> {
        self.updates
            .iter()
            .flat_map(|u| u.updates.iter())
            .map(|u| u.price_message())
            .collect()
    }
}

/// Fetches and validates signed updates; performs no retries
#[derive(Clone)]
pub struct UpdateFetcher {
    source: Arc<dyn UpdateSource>,
}

impl UpdateFetcher {
    pub fn new(source: Arc<dyn UpdateSource>) -> Self {
        Self { source }
    }

    pub async fn fetch_latest(&self, feed_ids: &[FeedId]) -> Result<SignedUpdatePayload> {
        if feed_ids.is_empty() {
            return Err(RelayError::InvalidRequest(
                "at least one feed id is required".to_string(),
            ));
        }

        let mut requested: Vec<FeedId> = Vec::with_capacity(feed_ids.len());
        for id in feed_ids {
            if !requested.contains(id) {
                requested.push(*id);
            }
        }

        log::debug!("Requesting latest updates for {} feed(s)", requested.len());
        let latest = self.source.latest_updates(&requested).await?;

        let updates = latest
            .binary
            .iter()
            .map(|blob| AccumulatorUpdate::parse(blob))
            .collect::<Result<Vec<_>>>()?;

        let mut signed: HashMap<FeedId, PriceMessage> = HashMap::new();
        for update in updates.iter().flat_map(|u| u.updates.iter()) {
            let message = update.price_message()?;
            signed.insert(message.feed_id, message);
        }

        for id in &requested {
            let parsed = latest
                .parsed
                .iter()
                .find(|p| p.feed_id == *id)
                .ok_or(RelayError::FeedNotFound(*id))?;
            let message = signed.get(id).ok_or(RelayError::FeedNotFound(*id))?;

            if message.price != parsed.price
                || message.exponent != parsed.exponent
                || message.publish_time != parsed.publish_time
            {
                return Err(RelayError::decode(format!(
                    "signed update for {id} disagrees with its parsed view"
                )));
            }
        }

        Ok(SignedUpdatePayload {
            binary: latest.binary,
            updates,
            parsed: latest.parsed,
        })
    }
}
