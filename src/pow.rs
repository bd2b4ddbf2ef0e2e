use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::block::Block;

/// Largest nonce tried before the search gives up.
///
/// Matches the 8-byte signed big-endian encoding used in the header material,
/// so every tried nonce is representable there.
pub const MAX_NONCE: u64 = i64::MAX as u64;

// The stop signal is polled once per this many attempts.
const STOP_POLL_MASK: u64 = 0x3ff;

/// Errors that can occur during the proof-of-work search
#[derive(Debug, Error)]
pub enum PowError {
    #[error("Nonce space exhausted after {tried} attempts without meeting the target")]
    Exhausted { tried: u64 },

    #[error("Mining was cancelled before a valid nonce was found")]
    Cancelled,
}

/// Cooperative cancellation handle for a mining search.
///
/// Clones share the underlying flag, so a token handed to a mining thread can
/// be stopped from anywhere. An optional deadline cancels the search once it
/// passes even if nobody calls [`StopToken::stop`].
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StopToken {
    /// Creates a token that only stops when [`StopToken::stop`] is called
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that additionally stops once `deadline` has passed
    pub fn with_deadline(deadline: Instant) -> Self {
        StopToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    /// Signals the search to stop at the next poll point
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Checks whether the search should stop
    pub fn is_stopped(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// Converts a difficulty to its numeric target, `2^(256 - bits)`,
/// as 32 big-endian bytes
///
/// A hash meets the target when it is lexicographically smaller than the
/// returned array.
///
/// # Panics
///
/// Panics if `bits` is outside `1..=255`.
pub fn bits_to_target(bits: u32) -> [u8; 32] {
    assert!(
        (1..=255).contains(&bits),
        "difficulty must be between 1 and 255 bits, got {}",
        bits
    );

    let mut target = [0u8; 32];
    let pos = 256 - bits as usize;
    target[31 - pos / 8] = 1 << (pos % 8);
    target
}

/// Proof-of-work engine for a single block
///
/// Borrows the block's header material and searches for (or verifies) a nonce
/// whose hash falls below the difficulty target.
#[derive(Debug)]
pub struct ProofOfWork<'a> {
    /// The block being mined or verified
    block: &'a Block,

    /// Numeric target derived from the difficulty
    target: [u8; 32],

    /// Difficulty in bits, hashed into the header material
    difficulty_bits: u32,

    /// Digest over the block's transaction ids, computed once up front
    tx_hash: Vec<u8>,
}

impl<'a> ProofOfWork<'a> {
    /// Creates a new proof-of-work engine for `block` at the given difficulty
    pub fn new(block: &'a Block, difficulty_bits: u32) -> Self {
        ProofOfWork {
            block,
            target: bits_to_target(difficulty_bits),
            difficulty_bits,
            tx_hash: block.hash_transactions(),
        }
    }

    /// Assembles the exact byte sequence that gets hashed for a given nonce.
    ///
    /// Layout: `prev_block_hash ∥ hash_transactions ∥ timestamp ∥
    /// difficulty_bits ∥ nonce`, where the three integers are each encoded as
    /// exactly 8 big-endian bytes (i64 width). Both the search and the
    /// verification path go through here, so the two always agree on the
    /// digest for the same inputs.
    fn prepare_data(&self, nonce: u64) -> Vec<u8> {
        let capacity = self.block.prev_block_hash.len() + self.tx_hash.len() + 24;
        let mut data = Vec::with_capacity(capacity);
        data.extend_from_slice(&self.block.prev_block_hash);
        data.extend_from_slice(&self.tx_hash);
        data.extend_from_slice(&self.block.timestamp.to_be_bytes());
        data.extend_from_slice(&(self.difficulty_bits as i64).to_be_bytes());
        data.extend_from_slice(&(nonce as i64).to_be_bytes());
        data
    }

    /// Runs the proof-of-work search
    ///
    /// # Returns
    ///
    /// The winning `(nonce, hash)` pair, or [`PowError::Exhausted`] if the
    /// nonce space runs out
    pub fn run(&self) -> Result<(u64, Vec<u8>), PowError> {
        self.run_with(&StopToken::new())
    }

    /// Runs the proof-of-work search with a cancellation token
    ///
    /// # Arguments
    ///
    /// * `stop` - Token polled periodically; once stopped, the search aborts
    ///   with [`PowError::Cancelled`]
    ///
    /// # Returns
    ///
    /// The winning `(nonce, hash)` pair
    pub fn run_with(&self, stop: &StopToken) -> Result<(u64, Vec<u8>), PowError> {
        info!(
            "Mining block with {} transaction(s) at difficulty {}",
            self.block.transactions.len(),
            self.difficulty_bits
        );

        let mut nonce: u64 = 0;
        while nonce <= MAX_NONCE {
            if nonce & STOP_POLL_MASK == 0 && stop.is_stopped() {
                return Err(PowError::Cancelled);
            }

            let hash = Sha256::digest(self.prepare_data(nonce));
            if hash.as_slice() < &self.target[..] {
                debug!("Found nonce {} -> {}", nonce, hex::encode(&hash));
                return Ok((nonce, hash.to_vec()));
            }

            nonce += 1;
        }

        Err(PowError::Exhausted { tried: MAX_NONCE })
    }

    /// Verifies the block's proof-of-work claim without re-running the search
    ///
    /// # Returns
    ///
    /// true if the hash recomputed at the block's stored nonce meets the target
    pub fn validate(&self) -> bool {
        let hash = Sha256::digest(self.prepare_data(self.block.nonce));
        hash.as_slice() < &self.target[..]
    }

    /// Recomputes the block hash at the block's stored nonce
    ///
    /// Used to check that a persisted block's `hash` field matches its own
    /// header material.
    pub fn block_hash(&self) -> Vec<u8> {
        Sha256::digest(self.prepare_data(self.block.nonce)).to_vec()
    }
}
