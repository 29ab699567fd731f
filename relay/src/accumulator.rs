//! Signed update payload wire format
//!
//! ```text
//! AccumulatorUpdate:
//!   magic: b"PNAU"
//!   major_version: u8          - must be 1
//!   minor_version: u8
//!   trailing_header_len: u8    - followed by that many skipped bytes
//!   update_type: u8            - 0 = Wormhole Merkle
//!   vaa_len: u16 BE, vaa: [u8]
//!   num_updates: u8
//!   updates[num_updates]:
//!     message_len: u16 BE, message: [u8]
//!     num_proof: u8, proof: [[u8; 20]; num_proof]
//!
//! PriceFeedMessage (big-endian):
//!   type: u8 (0), feed_id: [u8; 32], price: i64, conf: u64, exponent: i32,
//!   publish_time: i64, prev_publish_time: i64, ema_price: i64, ema_conf: u64
//!
//! VAA:
//!   version: u8, guardian_set_index: u32 BE, num_signatures: u8,
//!   signatures[num_signatures]: [u8; 66], body: [u8]
//! ```

use byteorder::{ReadBytesExt, WriteBytesExt, BE};
use std::io::{Cursor, Read};

use crate::error::{RelayError, Result};
use crate::feed::FeedId;
use crate::price_account::PriceMessage;

pub const ACCUMULATOR_MAGIC: &[u8; 4] = b"PNAU";
pub const MAJOR_VERSION: u8 = 1;
pub const MERKLE_HASH_LEN: usize = 20;

const UPDATE_TYPE_WORMHOLE_MERKLE: u8 = 0;
const MESSAGE_TYPE_PRICE_FEED: u8 = 0;

const VAA_HEADER_LEN: usize = 6;
const VAA_SIGNATURE_LEN: usize = 66;

pub type MerkleHash = [u8; MERKLE_HASH_LEN];

/// One feed's message plus its Merkle inclusion proof
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePriceUpdate {
    pub message: Vec<u8>,
    pub proof: Vec<MerkleHash>,
}

impl MerklePriceUpdate {
    pub fn price_message(&self) -> Result<PriceMessage> {
        decode_price_feed_message(&self.message)
    }
}

/// A VAA-attested batch of Merkle price updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatorUpdate {
    pub vaa: Vec<u8>,
    pub updates: Vec<MerklePriceUpdate>,
}

impl AccumulatorUpdate {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(data);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != ACCUMULATOR_MAGIC {
            return Err(RelayError::decode("update payload magic mismatch"));
        }

        let major = reader.read_u8()?;
        if major != MAJOR_VERSION {
            return Err(RelayError::decode(format!(
                "unsupported update payload version {major}"
            )));
        }
        let _minor = reader.read_u8()?;

        let trailing_len = reader.read_u8()? as u64;
        reader.set_position(reader.position() + trailing_len);

        let update_type = reader.read_u8()?;
        if update_type != UPDATE_TYPE_WORMHOLE_MERKLE {
            return Err(RelayError::decode(format!(
                "unsupported update type {update_type}"
            )));
        }

        let vaa = read_prefixed(&mut reader)?;

        let num_updates = reader.read_u8()?;
        let mut updates = Vec::with_capacity(num_updates as usize);
        for _ in 0..num_updates {
            let message = read_prefixed(&mut reader)?;
            let num_proof = reader.read_u8()?;
            let mut proof = Vec::with_capacity(num_proof as usize);
            for _ in 0..num_proof {
                let mut node = [0u8; MERKLE_HASH_LEN];
                reader.read_exact(&mut node)?;
                proof.push(node);
            }
            updates.push(MerklePriceUpdate { message, proof });
        }

        if reader.position() != data.len() as u64 {
            return Err(RelayError::decode("trailing bytes after update payload"));
        }

        Ok(Self { vaa, updates })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(ACCUMULATOR_MAGIC);
        out.write_u8(MAJOR_VERSION)?;
        out.write_u8(0)?; // minor
        out.write_u8(0)?; // trailing header
        out.write_u8(UPDATE_TYPE_WORMHOLE_MERKLE)?;
        write_prefixed(&mut out, &self.vaa)?;

        let count = u8::try_from(self.updates.len())
            .map_err(|_| RelayError::InvalidRequest("too many updates in one payload".to_string()))?;
        out.write_u8(count)?;
        for update in &self.updates {
            write_prefixed(&mut out, &update.message)?;
            let proof_len = u8::try_from(update.proof.len())
                .map_err(|_| RelayError::InvalidRequest("merkle proof too long".to_string()))?;
            out.write_u8(proof_len)?;
            for node in &update.proof {
                out.extend_from_slice(node);
            }
        }
        Ok(out)
    }

    pub fn guardian_set_index(&self) -> Result<u32> {
        vaa_guardian_set_index(&self.vaa)
    }
}

fn read_prefixed(reader: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let len = reader.read_u16::<BE>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| RelayError::InvalidRequest("payload field exceeds u16 length".to_string()))?;
    out.write_u16::<BE>(len)?;
    out.extend_from_slice(bytes);
    Ok(())
}

pub fn decode_price_feed_message(data: &[u8]) -> Result<PriceMessage> {
    let mut reader = Cursor::new(data);

    let message_type = reader.read_u8()?;
    if message_type != MESSAGE_TYPE_PRICE_FEED {
        return Err(RelayError::decode(format!(
            "unexpected message type {message_type}"
        )));
    }

    let mut feed_id = [0u8; 32];
    reader.read_exact(&mut feed_id)?;

    Ok(PriceMessage {
        feed_id: FeedId::new(feed_id),
        price: reader.read_i64::<BE>()?,
        conf: reader.read_u64::<BE>()?,
        exponent: reader.read_i32::<BE>()?,
        publish_time: reader.read_i64::<BE>()?,
        prev_publish_time: reader.read_i64::<BE>()?,
        ema_price: reader.read_i64::<BE>()?,
        ema_conf: reader.read_u64::<BE>()?,
    })
}

pub fn encode_price_feed_message(message: &PriceMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(85);
    out.push(MESSAGE_TYPE_PRICE_FEED);
    out.extend_from_slice(message.feed_id.as_bytes());
    out.extend_from_slice(&message.price.to_be_bytes());
    out.extend_from_slice(&message.conf.to_be_bytes());
    out.extend_from_slice(&message.exponent.to_be_bytes());
    out.extend_from_slice(&message.publish_time.to_be_bytes());
    out.extend_from_slice(&message.prev_publish_time.to_be_bytes());
    out.extend_from_slice(&message.ema_price.to_be_bytes());
    out.extend_from_slice(&message.ema_conf.to_be_bytes());
    out
}

pub fn vaa_guardian_set_index(vaa: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = vaa
        .get(1..5)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| RelayError::decode("VAA too short for guardian set index"))?;
    Ok(u32::from_be_bytes(bytes))
}

/// Keep only the first `keep` guardian signatures of a VAA
///
/// The receiver verifies a partial quorum when posting atomically, and
/// dropping signatures is what lets the VAA fit one transaction.
pub fn trim_vaa_signatures(vaa: &[u8], keep: u8) -> Result<Vec<u8>> {
    if vaa.len() < VAA_HEADER_LEN {
        return Err(RelayError::decode("VAA too short for header"));
    }

    let num_signatures = vaa[VAA_HEADER_LEN - 1];
    let body_start = VAA_HEADER_LEN + num_signatures as usize * VAA_SIGNATURE_LEN;
    if vaa.len() < body_start {
        return Err(RelayError::decode(format!(
            "VAA declares {num_signatures} signatures but is {} bytes",
            vaa.len()
        )));
    }

    if keep >= num_signatures {
        return Ok(vaa.to_vec());
    }

    let kept_end = VAA_HEADER_LEN + keep as usize * VAA_SIGNATURE_LEN;
    let mut trimmed = Vec::with_capacity(vaa.len() - (body_start - kept_end));
    trimmed.extend_from_slice(&vaa[..VAA_HEADER_LEN - 1]);
    trimmed.push(keep);
    trimmed.extend_from_slice(&vaa[VAA_HEADER_LEN..kept_end]);
    trimmed.extend_from_slice(&vaa[body_start..]);
    Ok(trimmed)
}
