//! Posted price record layout
//!
//! ```text
//! PriceUpdateV2 (Anchor account, borsh):
//!   discriminator: [u8; 8]     - sha256("account:PriceUpdateV2")[..8]
//!   write_authority: Pubkey
//!   verification_level: enum   - Partial { num_signatures: u8 } | Full
//!   price_message:
//!     feed_id: [u8; 32]
//!     price: i64
//!     conf: u64
//!     exponent: i32
//!     publish_time: i64
//!     prev_publish_time: i64
//!     ema_price: i64
//!     ema_conf: u64
//!   posted_slot: u64
//! ```

use borsh::{BorshDeserialize, BorshSerialize};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;

use crate::codec::{decode_price, format_price};
use crate::error::{RelayError, Result};
use crate::feed::FeedId;
use crate::receiver::anchor_discriminator;

/// Allocated size of a posted record; `Full` records leave one byte of padding
pub const PRICE_UPDATE_V2_LEN: usize = 8 + 32 + 2 + 84 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum VerificationLevel {
    Partial { num_signatures: u8 },
    Full,
}

/// Decoded price observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PriceMessage {
    pub feed_id: FeedId,
    pub price: i64,
    pub conf: u64,
    pub exponent: i32,
    pub publish_time: i64,
    pub prev_publish_time: i64,
    pub ema_price: i64,
    pub ema_conf: u64,
}

impl PriceMessage {
    pub fn decimal_price(&self) -> Result<Decimal> {
        decode_price(self.price, self.exponent)
    }

    pub fn decimal_conf(&self) -> Result<Decimal> {
        decode_price(self.conf, self.exponent)
    }

    /// `(price ± conf) * 10^exponent` rendered for logs
    pub fn describe(&self) -> String {
        let conf = i64::try_from(self.conf).unwrap_or(i64::MAX);
        format!(
            "{} ± {}",
            format_price(self.price, self.exponent),
            format_price(conf, self.exponent)
        )
    }
}

#[derive(BorshSerialize, BorshDeserialize)]
struct RawPriceUpdate {
    write_authority: [u8; 32],
    verification_level: VerificationLevel,
    price_message: PriceMessage,
    posted_slot: u64,
}

/// On-chain price record as read from the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdateAccount {
    pub write_authority: Pubkey,
    pub verification_level: VerificationLevel,
    pub price_message: PriceMessage,
    pub posted_slot: u64,
}

impl PriceUpdateAccount {
    pub fn discriminator() -> [u8; 8] {
        anchor_discriminator("account:PriceUpdateV2")
    }

    /// Decode raw account data; trailing bytes are ignored
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(RelayError::decode(format!(
                "price record is {} bytes, too short for a discriminator",
                data.len()
            )));
        }

        let (disc, mut body) = data.split_at(8);
        if disc != Self::discriminator() {
            return Err(RelayError::decode("account is not a price update record"));
        }

        let raw = RawPriceUpdate::deserialize(&mut body)
            .map_err(|e| RelayError::decode(format!("price record layout: {e}")))?;

        Ok(Self {
            write_authority: Pubkey::new_from_array(raw.write_authority),
            verification_level: raw.verification_level,
            price_message: raw.price_message,
            posted_slot: raw.posted_slot,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let raw = RawPriceUpdate {
            write_authority: self.write_authority.to_bytes(),
            verification_level: self.verification_level,
            price_message: self.price_message,
            posted_slot: self.posted_slot,
        };
        let mut data = Self::discriminator().to_vec();
        // Writing into a Vec cannot fail
        let _ = raw.serialize(&mut data);
        data.resize(data.len().max(PRICE_UPDATE_V2_LEN), 0);
        data
    }
}
