//! Price feed identifiers and derived record addresses

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;
use crate::receiver::PUSH_ORACLE_PROGRAM_ID;

pub const FEED_ID_LEN: usize = 32;

/// 32-byte identifier of a price series
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize, BorshSerialize, BorshDeserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FeedId([u8; FEED_ID_LEN]);

impl FeedId {
    pub const fn new(bytes: [u8; FEED_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FEED_ID_LEN] {
        &self.0
    }

    /// Lowercase hex without `0x`, the form the attestation service uses
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for FeedId {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        let bytes = hex::decode(digits)
            .map_err(|e| RelayError::InvalidRequest(format!("feed id {s:?} is not hex: {e}")))?;

        let bytes: [u8; FEED_ID_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            RelayError::InvalidRequest(format!(
                "feed id {s:?} is {} bytes, expected {FEED_ID_LEN}",
                b.len()
            ))
        })?;

        Ok(Self(bytes))
    }
}

impl TryFrom<String> for FeedId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FeedId> for String {
    fn from(id: FeedId) -> Self {
        format!("0x{}", id.to_hex())
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({self})")
    }
}

/// Address of the sharded price record the push oracle maintains for a feed
///
/// Seeds: `[shard_id (u16 LE), feed_id]` under the push oracle program.
pub fn price_feed_address(shard_id: u16, feed_id: &FeedId) -> Pubkey {
    Pubkey::find_program_address(
        &[&shard_id.to_le_bytes(), feed_id.as_bytes()],
        &PUSH_ORACLE_PROGRAM_ID,
    )
    .0
}
