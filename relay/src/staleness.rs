//! Staleness classification of posted price records

use crate::price_account::PriceMessage;

/// Seconds elapsed between `publish_time` and `current_time`
///
/// Negative when the record claims a publish time ahead of the ledger clock.
pub fn age(current_time: i64, publish_time: i64) -> i64 {
    current_time.saturating_sub(publish_time)
}

/// A record is stale once its age strictly exceeds the threshold
pub fn is_stale(current_time: i64, publish_time: i64, threshold_secs: u64) -> bool {
    let threshold = i64::try_from(threshold_secs).unwrap_or(i64::MAX);
    age(current_time, publish_time) > threshold
}

/// Outcome of the freshness check, carrying the record that was examined
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh(PriceMessage),
    Stale(PriceMessage),
}

impl Freshness {
    pub fn record(&self) -> &PriceMessage {
        match self {
            Freshness::Fresh(record) | Freshness::Stale(record) => record,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Freshness::Stale(_))
    }
}

/// Classify a record against the threshold using ledger time
pub fn classify(current_time: i64, record: PriceMessage, threshold_secs: u64) -> Freshness {
    if is_stale(current_time, record.publish_time, threshold_secs) {
        Freshness::Stale(record)
    } else {
        Freshness::Fresh(record)
    }
}
