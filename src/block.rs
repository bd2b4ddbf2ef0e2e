use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::pow::{PowError, ProofOfWork, StopToken};
use super::transaction::Transaction;

/// Represents a block in the ledger
///
/// A block is immutable once mined: its `hash` and `nonce` are the winning
/// pair produced by the proof-of-work search over the remaining fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Seconds since epoch when the block was created
    pub timestamp: i64,

    /// List of transactions included in this block; order affects the digest
    pub transactions: Vec<Transaction>,

    /// Hash of the previous block; empty only for the genesis block
    pub prev_block_hash: Vec<u8>,

    /// Hash of the current block at the winning nonce
    pub hash: Vec<u8>,

    /// Proof-of-work counter found by the search
    pub nonce: u64,
}

impl Block {
    /// Creates and mines a new block
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include in the block
    /// * `prev_block_hash` - The hash of the previous block, stored verbatim
    /// * `difficulty_bits` - The proof-of-work difficulty
    ///
    /// # Returns
    ///
    /// A fully populated Block whose hash meets the difficulty target
    pub fn new(
        transactions: Vec<Transaction>,
        prev_block_hash: Vec<u8>,
        difficulty_bits: u32,
    ) -> Result<Self, PowError> {
        Self::new_with(
            transactions,
            prev_block_hash,
            difficulty_bits,
            &StopToken::new(),
        )
    }

    /// Creates and mines a new block, aborting if `stop` is triggered
    pub fn new_with(
        transactions: Vec<Transaction>,
        prev_block_hash: Vec<u8>,
        difficulty_bits: u32,
        stop: &StopToken,
    ) -> Result<Self, PowError> {
        let mut block = Block {
            timestamp: Utc::now().timestamp(),
            transactions,
            prev_block_hash,
            hash: Vec::new(),
            nonce: 0,
        };

        let (nonce, hash) = ProofOfWork::new(&block, difficulty_bits).run_with(stop)?;
        block.hash = hash;
        block.nonce = nonce;

        Ok(block)
    }

    /// Creates and mines the genesis block from a coinbase transaction
    pub fn new_genesis(coinbase: Transaction, difficulty_bits: u32) -> Result<Self, PowError> {
        Self::new(vec![coinbase], Vec::new(), difficulty_bits)
    }

    /// Checks if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    /// Computes the digest over the block's transaction ids
    ///
    /// The ids are concatenated in list order and hashed once. An empty
    /// transaction list yields the hash of the empty byte sequence, which is
    /// a defined value rather than an error.
    pub fn hash_transactions(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        for tx in &self.transactions {
            hasher.update(&tx.id);
        }
        hasher.finalize().to_vec()
    }

    /// Serializes the block to its self-contained binary encoding
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserializes a block from its binary encoding
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes previously produced by [`Block::serialize`]
    pub fn deserialize(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
