//! Price reader instruction handlers

use crate::state::PriceRecord;
use crate::RECEIVER_PROGRAM_ID;
use pinocchio::{
    account_info::AccountInfo,
    msg,
    program_error::ProgramError,
    pubkey::Pubkey,
    sysvars::{clock::Clock, Sysvar},
    ProgramResult,
};
use pinocchio_log::log;

/// PriceRead instruction data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceReadArgs {
    pub feed_id: [u8; 32],
    pub maximum_age: u64,
}

impl PriceReadArgs {
    pub const LEN: usize = 32 + 8;

    pub fn unpack(data: &[u8]) -> Result<Self, ProgramError> {
        if data.len() < Self::LEN {
            msg!("Error: PriceRead requires 40 bytes of data");
            return Err(ProgramError::InvalidInstructionData);
        }

        let mut feed_id = [0u8; 32];
        feed_id.copy_from_slice(&data[..32]);
        let maximum_age = u64::from_le_bytes([
            data[32], data[33], data[34], data[35], data[36], data[37], data[38], data[39],
        ]);
        Ok(Self {
            feed_id,
            maximum_age,
        })
    }
}

/// Read a posted price
///
/// Accounts:
/// 0. `[]` Price update record
///
/// Instruction data:
/// - feed_id: [u8; 32]
/// - maximum_age: u64 (8 bytes)
pub fn process_price_read(
    _program_id: &Pubkey,
    accounts: &[AccountInfo],
    data: &[u8],
) -> ProgramResult {
    let [price_update, ..] = accounts else {
        msg!("Error: PriceRead requires 1 account");
        return Err(ProgramError::NotEnoughAccountKeys);
    };

    let args = PriceReadArgs::unpack(data)?;
    let now = Clock::get()?.unix_timestamp;

    // No CPI runs here, so the owner cannot be reassigned while borrowed
    let owner = unsafe { price_update.owner() };
    let record_data = price_update.try_borrow_data()?;
    let record = verify_price_read(owner, &record_data, &args, now)?;

    log!(
        "Price: ({} +/- {}) * 10^{}",
        record.price,
        record.conf,
        record.exponent
    );
    Ok(())
}

/// Checks a record account against a PriceRead request at `now`
pub fn verify_price_read(
    owner: &Pubkey,
    record_data: &[u8],
    args: &PriceReadArgs,
    now: i64,
) -> Result<PriceRecord, ProgramError> {
    if *owner != RECEIVER_PROGRAM_ID {
        msg!("Error: Price record is not owned by the receiver");
        return Err(ProgramError::IncorrectProgramId);
    }

    let record = PriceRecord::parse(record_data)?;

    if record.feed_id != args.feed_id {
        msg!("Error: Price record holds a different feed");
        return Err(ProgramError::InvalidAccountData);
    }

    if !record.is_verified() {
        msg!("Error: Price record is insufficiently verified");
        return Err(ProgramError::InvalidAccountData);
    }

    if !record.is_recent(now, args.maximum_age) {
        log!(
            "Error: Price published at {} is older than {}s",
            record.publish_time,
            args.maximum_age
        );
        return Err(ProgramError::InvalidAccountData);
    }

    Ok(record)
}

#[cfg(test)]
#[path = "instructions_test.rs"]
mod instructions_test;
