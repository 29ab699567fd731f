//! Price Reader Program
//!
//! Sample consumer of posted Pyth price records. Reading succeeds only when
//! the record carries the requested feed, is sufficiently verified and is
//! recent enough by the ledger clock.
//!
//! ## Instructions
//!
//! - **PriceRead** (0): Check and log a posted price
//!
//! ## Account Structure
//!
//! ```text
//! PriceUpdateV2 (134 bytes, owned by the price receiver):
//!   discriminator: [u8; 8]
//!   write_authority: Pubkey
//!   verification_level: Partial { num_signatures: u8 } | Full
//!   feed_id: [u8; 32]
//!   price: i64, conf: u64, exponent: i32
//!   publish_time: i64, prev_publish_time: i64
//!   ema_price: i64, ema_conf: u64
//!   posted_slot: u64
//! ```

#![cfg_attr(target_os = "solana", no_std)]

#[cfg(not(feature = "no-entrypoint"))]
pub mod entrypoint;

pub mod instructions;
pub mod state;

// Panic handler for no_std builds (only for Solana BPF)
#[cfg(all(target_os = "solana", not(test)))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

pub use state::{PriceRecord, Verification};

pinocchio_pubkey::declare_id!("HDVDa8BxdS5yEouu2NQXMkzToQrMC9JmfS4u9ZAdqgZd");

/// Program that owns posted price records
pub const RECEIVER_PROGRAM_ID: pinocchio::pubkey::Pubkey =
    pinocchio_pubkey::pubkey!("rec5EKMGg6MxZYaMdyBfgwp4d5rB9T1VQH5pJv5LtFJ");
