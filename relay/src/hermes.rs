//! HTTP client for the Hermes attestation service

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{RelayError, Result};
use crate::feed::FeedId;
use crate::fetcher::{LatestUpdates, ParsedPrice, UpdateSource};

const LATEST_UPDATES_PATH: &str = "/v2/updates/price/latest";

#[derive(Debug, Deserialize)]
struct HermesResponse {
    binary: HermesBinary,
    #[serde(default)]
    parsed: Vec<HermesPriceFeed>,
}

#[derive(Debug, Deserialize)]
struct HermesBinary {
    encoding: String,
    data: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HermesPriceFeed {
    id: String,
    price: HermesPrice,
}

#[derive(Debug, Deserialize)]
struct HermesPrice {
    price: String,
    conf: String,
    expo: i32,
    publish_time: i64,
}

impl TryFrom<HermesPriceFeed> for ParsedPrice {
    type Error = RelayError;

    fn try_from(feed: HermesPriceFeed) -> Result<Self> {
        let feed_id: FeedId = feed
            .id
            .parse()
            .map_err(|_| RelayError::decode(format!("bad feed id {:?} in response", feed.id)))?;
        let price = feed
            .price
            .price
            .parse::<i64>()
            .map_err(|e| RelayError::decode(format!("price for {feed_id}: {e}")))?;
        let conf = feed
            .price
            .conf
            .parse::<u64>()
            .map_err(|e| RelayError::decode(format!("conf for {feed_id}: {e}")))?;

        Ok(Self {
            feed_id,
            price,
            conf,
            exponent: feed.price.expo,
            publish_time: feed.price.publish_time,
        })
    }
}

/// Parse a latest-updates response body
pub fn parse_latest_updates(body: &str) -> Result<LatestUpdates> {
    let response: HermesResponse = serde_json::from_str(body)
        .map_err(|e| RelayError::decode(format!("hermes response: {e}")))?;

    if response.binary.encoding != "base64" {
        return Err(RelayError::decode(format!(
            "unexpected binary encoding {:?}",
            response.binary.encoding
        )));
    }

    let engine = base64::engine::general_purpose::STANDARD;
    let binary = response
        .binary
        .data
        .iter()
        .map(|chunk| engine.decode(chunk).map_err(RelayError::decode))
        .collect::<Result<Vec<_>>>()?;

    let parsed = response
        .parsed
        .into_iter()
        .map(ParsedPrice::try_from)
        .collect::<Result<Vec<_>>>()?;

    Ok(LatestUpdates { binary, parsed })
}

pub struct HermesClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HermesClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RelayError::network)?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn missing_feed(feed_ids: &[FeedId], body: &str) -> RelayError {
        let body = body.to_lowercase();
        let missing = feed_ids
            .iter()
            .find(|id| body.contains(&id.to_hex()))
            .or_else(|| feed_ids.first());
        match missing {
            Some(id) => RelayError::FeedNotFound(*id),
            None => RelayError::InvalidRequest("no feed ids requested".to_string()),
        }
    }
}

#[async_trait]
impl UpdateSource for HermesClient {
    async fn latest_updates(&self, feed_ids: &[FeedId]) -> Result<LatestUpdates> {
        let mut query: Vec<(&str, String)> = feed_ids.iter().map(|id| ("ids[]", id.to_hex())).collect();
        query.push(("encoding", "base64".to_string()));
        query.push(("parsed", "true".to_string()));

        let url = format!("{}{}", self.endpoint, LATEST_UPDATES_PATH);
        let response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(RelayError::network)?;

        let status = response.status();
        let body = response.text().await.map_err(RelayError::network)?;

        match status {
            s if s.is_success() => parse_latest_updates(&body),
            StatusCode::NOT_FOUND => Err(Self::missing_feed(feed_ids, &body)),
            StatusCode::BAD_REQUEST => Err(RelayError::InvalidRequest(body)),
            s => Err(RelayError::network(format!("hermes returned {s}: {body}"))),
        }
    }
}
