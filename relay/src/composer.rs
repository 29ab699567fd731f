//! Transaction composer
//!
//! Turns a signed payload into post-update operations, lets a consumer
//! append operations that read the records being posted, and packs the
//! result into atomic execution units. A consumer operation always lands in
//! the same unit as every post it reads, after those posts.

use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    instruction::Instruction,
    message::Message,
    packet::PACKET_DATA_SIZE,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::collections::HashMap;

use crate::accumulator::trim_vaa_signatures;
use crate::error::{RelayError, Result};
use crate::feed::FeedId;
use crate::fetcher::SignedUpdatePayload;
use crate::receiver::{
    build_post_update_atomic_instruction, MerklePriceUpdateParams, PostUpdateAtomicParams,
    POST_UPDATE_ATOMIC_COMPUTE_UNITS,
};

/// Compute-unit ceiling of a single transaction
pub const MAX_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;

/// Compute-unit limit and price instructions prepended to every unit
const COMPUTE_BUDGET_INSTRUCTIONS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    PostUpdate(FeedId),
    Consumer,
}

/// One instruction plus the ephemeral keys that must sign it
#[derive(Debug)]
pub struct Operation {
    pub instruction: Instruction,
    pub signers: Vec<Keypair>,
    pub compute_units: u32,
    pub kind: OperationKind,
}

impl Operation {
    pub fn consumer(instruction: Instruction, compute_units: u32) -> Self {
        Self {
            instruction,
            signers: Vec::new(),
            compute_units,
            kind: OperationKind::Consumer,
        }
    }

    pub fn is_post(&self) -> bool {
        matches!(self.kind, OperationKind::PostUpdate(_))
    }
}

/// Maps a feed to the record its consumer operations must reference
///
/// Pure lookup: on the stale path the addresses belong to records that
/// do not exist until the batch executes.
#[derive(Debug, Clone, Default)]
pub struct RecordResolver {
    records: HashMap<FeedId, Pubkey>,
}

impl RecordResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feed_id: FeedId, record: Pubkey) {
        self.records.insert(feed_id, record);
    }

    pub fn resolve(&self, feed_id: &FeedId) -> Result<Pubkey> {
        self.records
            .get(feed_id)
            .copied()
            .ok_or(RelayError::FeedNotFound(*feed_id))
    }
}

/// Supplies application operations that consume posted prices
pub trait ConsumerBuilder: Send + Sync {
    fn build_consumer_operations(&self, resolver: &RecordResolver) -> Result<Vec<Operation>>;
}

/// Operations that must execute atomically, in order
#[derive(Debug)]
pub struct ExecutionUnit {
    operations: Vec<Operation>,
}

impl ExecutionUnit {
    pub fn new(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn compute_unit_limit(&self) -> u32 {
        self.operations
            .iter()
            .fold(0u32, |acc, op| acc.saturating_add(op.compute_units))
            .min(MAX_COMPUTE_UNIT_LIMIT)
    }

    /// Budget instructions followed by the operations
    ///
    /// A zero priority fee omits the compute-unit price instruction.
    pub fn instructions(&self, priority_fee: u64) -> Vec<Instruction> {
        let mut ixs = Vec::with_capacity(self.operations.len() + COMPUTE_BUDGET_INSTRUCTIONS);
        ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(
            self.compute_unit_limit(),
        ));
        if priority_fee > 0 {
            ixs.push(ComputeBudgetInstruction::set_compute_unit_price(priority_fee));
        }
        ixs.extend(self.operations.iter().map(|op| op.instruction.clone()));
        ixs
    }

    pub fn ephemeral_signers(&self) -> impl Iterator<Item = &Keypair> {
        self.operations.iter().flat_map(|op| op.signers.iter())
    }

    pub fn post_count(&self) -> usize {
        self.operations.iter().filter(|op| op.is_post()).count()
    }

    pub fn consumer_count(&self) -> usize {
        self.operations.len() - self.post_count()
    }
}

/// Result of composing a payload with a consumer
#[derive(Debug)]
pub struct ComposedBatch {
    pub units: Vec<ExecutionUnit>,
    pub consumer_operations: usize,
}

impl ComposedBatch {
    /// The batch only refreshes records; nothing reads them
    pub fn is_refresh_only(&self) -> bool {
        self.consumer_operations == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ComposerConfig {
    pub treasury_id: u8,
    /// Guardian signatures kept per VAA
    pub guardian_signatures: u8,
    pub max_instructions_per_unit: usize,
    pub max_transaction_bytes: usize,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            treasury_id: 0,
            guardian_signatures: 5,
            max_instructions_per_unit: 12,
            max_transaction_bytes: PACKET_DATA_SIZE,
        }
    }
}

pub struct TransactionComposer {
    payer: Pubkey,
    config: ComposerConfig,
}

impl TransactionComposer {
    pub fn new(payer: Pubkey, config: ComposerConfig) -> Self {
        Self { payer, config }
    }

    /// Post operations for every feed in the payload, with fresh record keys
    ///
    /// A feed repeated in the payload is posted once, from its first occurrence.
    pub fn post_update_operations(
        &self,
        payload: &SignedUpdatePayload,
    ) -> Result<(Vec<Operation>, RecordResolver)> {
        let mut operations = Vec::new();
        let mut resolver = RecordResolver::new();

        for update in &payload.updates {
            let guardian_set_index = update.guardian_set_index()?;
            let vaa = trim_vaa_signatures(&update.vaa, self.config.guardian_signatures)?;

            for merkle in &update.updates {
                let feed_id = merkle.price_message()?.feed_id;
                if resolver.resolve(&feed_id).is_ok() {
                    log::debug!("Feed {} repeated in payload, skipping", feed_id);
                    continue;
                }

                let record = Keypair::new();
                let params = PostUpdateAtomicParams {
                    vaa: vaa.clone(),
                    merkle_price_update: MerklePriceUpdateParams {
                        message: merkle.message.clone(),
                        proof: merkle.proof.clone(),
                    },
                    treasury_id: self.config.treasury_id,
                };
                let instruction = build_post_update_atomic_instruction(
                    &self.payer,
                    &record.pubkey(),
                    guardian_set_index,
                    &params,
                );

                resolver.insert(feed_id, record.pubkey());
                operations.push(Operation {
                    instruction,
                    signers: vec![record],
                    compute_units: POST_UPDATE_ATOMIC_COMPUTE_UNITS,
                    kind: OperationKind::PostUpdate(feed_id),
                });
            }
        }

        Ok((operations, resolver))
    }

    pub fn compose(
        &self,
        payload: &SignedUpdatePayload,
        consumer: &dyn ConsumerBuilder,
    ) -> Result<ComposedBatch> {
        let (posts, resolver) = self.post_update_operations(payload)?;
        let consumers = consumer.build_consumer_operations(&resolver)?;
        let consumer_operations = consumers.len();

        if consumer_operations == 0 {
            log::info!("No consumer operations requested; batch only refreshes prices");
        }

        let units = self.pack(posts, consumers)?;
        Ok(ComposedBatch {
            units,
            consumer_operations,
        })
    }

    /// Partition posts followed by consumers into execution units
    ///
    /// Posts and the consumers that read them form a group which is never
    /// split. Groups are packed greedily in order; inside a unit every post
    /// precedes every consumer.
    pub fn pack(&self, posts: Vec<Operation>, consumers: Vec<Operation>) -> Result<Vec<ExecutionUnit>> {
        let post_count = posts.len();
        let mut slots: Vec<Option<Operation>> = posts.into_iter().chain(consumers).map(Some).collect();

        // Record key -> index of the post that creates it
        let mut creators: HashMap<Pubkey, usize> = HashMap::new();
        for (index, op) in slots.iter().take(post_count).flatten().enumerate() {
            for signer in &op.signers {
                creators.insert(signer.pubkey(), index);
            }
        }

        let mut groups: Vec<Vec<usize>> = (0..post_count).map(|i| vec![i]).collect();
        let mut group_of: Vec<usize> = (0..post_count).collect();

        for index in post_count..slots.len() {
            let Some(op) = slots[index].as_ref() else {
                continue;
            };
            let mut deps: Vec<usize> = op
                .instruction
                .accounts
                .iter()
                .filter_map(|meta| creators.get(&meta.pubkey))
                .map(|&post| group_of[post])
                .collect();
            deps.sort_unstable();
            deps.dedup();

            let Some((&target, rest)) = deps.split_first() else {
                groups.push(vec![index]);
                continue;
            };

            for &other in rest {
                let members = std::mem::take(&mut groups[other]);
                for &member in &members {
                    if member < post_count {
                        group_of[member] = target;
                    }
                }
                groups[target].extend(members);
            }
            groups[target].push(index);
        }

        let mut units: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();

        for mut group in groups.into_iter().filter(|g| !g.is_empty()) {
            group.sort_unstable();

            let mut candidate = current.clone();
            candidate.extend_from_slice(&group);
            candidate.sort_unstable();

            if self.fits(&slots, &candidate)? {
                current = candidate;
                continue;
            }

            if !self.fits(&slots, &group)? {
                let (instructions, bytes) = self.estimate(&slots, &group)?;
                return Err(RelayError::TransactionTooLarge {
                    instructions,
                    bytes,
                    max_instructions: self.config.max_instructions_per_unit,
                    max_bytes: self.config.max_transaction_bytes,
                });
            }

            if !current.is_empty() {
                units.push(std::mem::take(&mut current));
            }
            current = group;
        }
        if !current.is_empty() {
            units.push(current);
        }

        Ok(units
            .into_iter()
            .map(|indices| {
                ExecutionUnit::new(indices.into_iter().filter_map(|i| slots[i].take()).collect())
            })
            .collect())
    }

    fn fits(&self, slots: &[Option<Operation>], indices: &[usize]) -> Result<bool> {
        let (instructions, bytes) = self.estimate(slots, indices)?;
        Ok(instructions <= self.config.max_instructions_per_unit
            && bytes <= self.config.max_transaction_bytes)
    }

    /// Instruction count and serialized size of a signed transaction for `indices`
    fn estimate(&self, slots: &[Option<Operation>], indices: &[usize]) -> Result<(usize, usize)> {
        let mut ixs = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(MAX_COMPUTE_UNIT_LIMIT),
            ComputeBudgetInstruction::set_compute_unit_price(u64::MAX),
        ];
        ixs.extend(
            indices
                .iter()
                .filter_map(|&i| slots[i].as_ref())
                .map(|op| op.instruction.clone()),
        );

        let message = Message::new(&ixs, Some(&self.payer));
        let transaction = Transaction {
            signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
            message,
        };
        let bytes = bincode::serialized_size(&transaction)
            .map_err(|e| RelayError::InvalidRequest(format!("cannot size transaction: {e}")))?;

        Ok((ixs.len(), bytes as usize))
    }
}
