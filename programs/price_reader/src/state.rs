//! View over a posted price record

use pinocchio::program_error::ProgramError;

/// `sha256("account:PriceUpdateV2")[..8]`
pub const PRICE_UPDATE_DISCRIMINATOR: [u8; 8] = [34, 241, 35, 99, 157, 126, 244, 205];

/// Guardian signatures a partially verified record must carry
pub const MIN_SIGNATURES: u8 = 5;

const WRITE_AUTHORITY_END: usize = 8 + 32;
/// feed_id + price + conf + exponent + publish_time
const MESSAGE_PREFIX_LEN: usize = 32 + 8 + 8 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Partial(u8),
    Full,
}

/// Fields of a price record the reader acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceRecord {
    pub verification: Verification,
    pub feed_id: [u8; 32],
    pub price: i64,
    pub conf: u64,
    pub exponent: i32,
    pub publish_time: i64,
}

impl PriceRecord {
    pub fn parse(data: &[u8]) -> Result<Self, ProgramError> {
        if data.len() < WRITE_AUTHORITY_END + 1 {
            return Err(ProgramError::AccountDataTooSmall);
        }
        if data[..8] != PRICE_UPDATE_DISCRIMINATOR {
            return Err(ProgramError::InvalidAccountData);
        }

        // The verification level is a borsh enum, so the message offset
        // depends on its variant
        let (verification, start) = match data[WRITE_AUTHORITY_END] {
            0 => {
                let signatures = *data
                    .get(WRITE_AUTHORITY_END + 1)
                    .ok_or(ProgramError::AccountDataTooSmall)?;
                (Verification::Partial(signatures), WRITE_AUTHORITY_END + 2)
            }
            1 => (Verification::Full, WRITE_AUTHORITY_END + 1),
            _ => return Err(ProgramError::InvalidAccountData),
        };

        let message = data
            .get(start..start + MESSAGE_PREFIX_LEN)
            .ok_or(ProgramError::AccountDataTooSmall)?;

        let mut feed_id = [0u8; 32];
        feed_id.copy_from_slice(&message[..32]);

        Ok(Self {
            verification,
            feed_id,
            price: i64::from_le_bytes(array(&message[32..40])),
            conf: u64::from_le_bytes(array(&message[40..48])),
            exponent: i32::from_le_bytes(array(&message[48..52])),
            publish_time: i64::from_le_bytes(array(&message[52..60])),
        })
    }

    pub fn is_verified(&self) -> bool {
        match self.verification {
            Verification::Full => true,
            Verification::Partial(signatures) => signatures >= MIN_SIGNATURES,
        }
    }

    /// `publish_time + max_age >= now`
    pub fn is_recent(&self, now: i64, max_age: u64) -> bool {
        let max_age = i64::try_from(max_age).unwrap_or(i64::MAX);
        self.publish_time.saturating_add(max_age) >= now
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}
