//! Instruction builders for posting and reading price updates

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::{
    hash::hashv,
    instruction::{AccountMeta, Instruction},
    pubkey,
    pubkey::Pubkey,
    system_program,
};

use crate::accumulator::MerkleHash;
use crate::feed::FeedId;

/// Price receiver program: verifies updates and writes price records
pub const RECEIVER_PROGRAM_ID: Pubkey = pubkey!("rec5EKMGg6MxZYaMdyBfgwp4d5rB9T1VQH5pJv5LtFJ");

/// Wormhole deployment that owns the guardian set accounts
pub const WORMHOLE_PROGRAM_ID: Pubkey = pubkey!("HDwcJBJXjL9FpJ7UBsYBtaDjsBUhuLCUkoz3fr9jh5uN");

/// Push oracle program owning the sharded per-feed records
pub const PUSH_ORACLE_PROGRAM_ID: Pubkey = pubkey!("pythWSnswVUd12oZpeFP8e9CVaEqJg25g1Vtc2biRsT");

/// Compute units requested for one atomic post
pub const POST_UPDATE_ATOMIC_COMPUTE_UNITS: u32 = 170_000;

/// Compute units requested for one consumer read
pub const PRICE_READ_COMPUTE_UNITS: u32 = 30_000;

/// Discriminator of the consumer program's read instruction
pub const PRICE_READ_DISCRIMINATOR: u8 = 0;

const CONFIG_SEED: &[u8] = b"config";
const TREASURY_SEED: &[u8] = b"treasury";
const GUARDIAN_SET_SEED: &[u8] = b"GuardianSet";

/// First 8 bytes of sha256 over an Anchor preimage such as `global:<ix>`
pub fn anchor_discriminator(preimage: &str) -> [u8; 8] {
    let hash = hashv(&[preimage.as_bytes()]);
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash.to_bytes()[..8]);
    disc
}

pub fn config_address() -> Pubkey {
    Pubkey::find_program_address(&[CONFIG_SEED], &RECEIVER_PROGRAM_ID).0
}

pub fn treasury_address(treasury_id: u8) -> Pubkey {
    Pubkey::find_program_address(&[TREASURY_SEED, &[treasury_id]], &RECEIVER_PROGRAM_ID).0
}

pub fn guardian_set_address(guardian_set_index: u32) -> Pubkey {
    Pubkey::find_program_address(
        &[GUARDIAN_SET_SEED, &guardian_set_index.to_be_bytes()],
        &WORMHOLE_PROGRAM_ID,
    )
    .0
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct MerklePriceUpdateParams {
    pub message: Vec<u8>,
    pub proof: Vec<MerkleHash>,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct PostUpdateAtomicParams {
    pub vaa: Vec<u8>,
    pub merkle_price_update: MerklePriceUpdateParams,
    pub treasury_id: u8,
}

impl PostUpdateAtomicParams {
    pub fn data(&self) -> Vec<u8> {
        let mut data = anchor_discriminator("global:post_update_atomic").to_vec();
        // Writing into a Vec cannot fail
        let _ = self.serialize(&mut data);
        data
    }
}

/// Build the receiver's post_update_atomic instruction
///
/// Accounts:
/// 0. `[writable, signer]` Payer
/// 1. `[]` Guardian set
/// 2. `[]` Receiver config
/// 3. `[writable]` Treasury
/// 4. `[writable, signer]` Price update account (ephemeral keypair)
/// 5. `[]` System program
/// 6. `[signer]` Write authority
pub fn build_post_update_atomic_instruction(
    payer: &Pubkey,
    price_update_account: &Pubkey,
    guardian_set_index: u32,
    params: &PostUpdateAtomicParams,
) -> Instruction {
    let accounts = vec![
        AccountMeta::new(*payer, true),
        AccountMeta::new_readonly(guardian_set_address(guardian_set_index), false),
        AccountMeta::new_readonly(config_address(), false),
        AccountMeta::new(treasury_address(params.treasury_id), false),
        AccountMeta::new(*price_update_account, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(*payer, true),
    ];

    Instruction {
        program_id: RECEIVER_PROGRAM_ID,
        accounts,
        data: params.data(),
    }
}

/// Build the consumer program's price_read instruction
///
/// Accounts:
/// 0. `[]` Price update record
///
/// Instruction data:
/// - discriminator: u8 (0)
/// - feed_id: [u8; 32]
/// - maximum_age: u64 LE
pub fn build_price_read_instruction(
    consumer_program: &Pubkey,
    price_update: &Pubkey,
    feed_id: &FeedId,
    maximum_age: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(41);
    data.push(PRICE_READ_DISCRIMINATOR);
    data.extend_from_slice(feed_id.as_bytes());
    data.extend_from_slice(&maximum_age.to_le_bytes());

    Instruction {
        program_id: *consumer_program,
        accounts: vec![AccountMeta::new_readonly(*price_update, false)],
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_post_update_atomic_instruction() {
        let payer = Pubkey::new_unique();
        let price_update = Pubkey::new_unique();
        let params = PostUpdateAtomicParams {
            vaa: vec![1, 2, 3],
            merkle_price_update: MerklePriceUpdateParams {
                message: vec![0; 85],
                proof: vec![[7; 20]; 2],
            },
            treasury_id: 3,
        };

        let ix = build_post_update_atomic_instruction(&payer, &price_update, 4, &params);

        assert_eq!(ix.program_id, RECEIVER_PROGRAM_ID);
        assert_eq!(ix.accounts.len(), 7);
        assert_eq!(ix.accounts[1].pubkey, guardian_set_address(4));
        assert_eq!(ix.accounts[3].pubkey, treasury_address(3));
        assert!(ix.accounts[4].is_signer && ix.accounts[4].is_writable);
        assert!(ix.accounts[6].is_signer && !ix.accounts[6].is_writable);

        assert_eq!(&ix.data[..8], &anchor_discriminator("global:post_update_atomic"));
        let decoded = PostUpdateAtomicParams::try_from_slice(&ix.data[8..]).unwrap();
        assert_eq!(decoded, params);
        // 8 disc + (4 + 3) vaa + (4 + 85) message + (4 + 40) proof + 1 treasury
        assert_eq!(ix.data.len(), 149);
    }

    #[test]
    fn test_build_price_read_instruction() {
        let program = Pubkey::new_unique();
        let record = Pubkey::new_unique();
        let feed = FeedId::new([0xab; 32]);

        let ix = build_price_read_instruction(&program, &record, &feed, 7);

        assert_eq!(ix.program_id, program);
        assert_eq!(ix.data[0], PRICE_READ_DISCRIMINATOR);
        assert_eq!(&ix.data[1..33], feed.as_bytes());
        assert_eq!(u64::from_le_bytes(ix.data[33..41].try_into().unwrap()), 7);
        assert_eq!(ix.accounts.len(), 1);
        assert!(!ix.accounts[0].is_writable);
    }

    #[test]
    fn test_derived_addresses_are_distinct() {
        assert_ne!(treasury_address(0), treasury_address(1));
        assert_ne!(guardian_set_address(3), guardian_set_address(4));
        assert_ne!(config_address(), treasury_address(0));
    }
}
