//! Consumer builders

use solana_sdk::pubkey::Pubkey;

use crate::composer::{ConsumerBuilder, Operation, RecordResolver};
use crate::error::Result;
use crate::feed::FeedId;
use crate::receiver::{build_price_read_instruction, PRICE_READ_COMPUTE_UNITS};

#[derive(Debug, Clone, Copy)]
pub struct PriceReadConsumer {
    program: Pubkey,
    feed_id: FeedId,
    maximum_age: u64,
}

impl PriceReadConsumer {
    pub fn new(program: Pubkey, feed_id: FeedId, maximum_age: u64) -> Self {
        Self {
            program,
            feed_id,
            maximum_age,
        }
    }
}

impl ConsumerBuilder for PriceReadConsumer {
    fn build_consumer_operations(&self, resolver: &RecordResolver) -> Result<Vec<Operation>> {
        let record = resolver.resolve(&self.feed_id)?;
        log::debug!("Reading {} from record {}", self.feed_id, record);

        let instruction =
            build_price_read_instruction(&self.program, &record, &self.feed_id, self.maximum_age);
        Ok(vec![Operation::consumer(instruction, PRICE_READ_COMPUTE_UNITS)])
    }
}

/// Asks for no reads; the relay only keeps the record fresh
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOnly;

impl ConsumerBuilder for RefreshOnly {
    fn build_consumer_operations(&self, _resolver: &RecordResolver) -> Result<Vec<Operation>> {
        Ok(Vec::new())
    }
}
