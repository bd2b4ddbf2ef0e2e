use std::path::PathBuf;
use std::sync::Mutex;

use log::info;
use thiserror::Error;

use super::block::Block;
use super::pow::{PowError, ProofOfWork, StopToken};
use super::storage::{LedgerStore, StorageError};
use super::transaction::Transaction;

/// Proof-of-work difficulty used when none is configured.
pub const DEFAULT_DIFFICULTY_BITS: u32 = 24;

/// Memo embedded in the genesis coinbase input.
const GENESIS_MEMO: &str =
    "The Times 03/March/2021 Chancellor on brink of second bailout for banks";

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("No ledger exists for chain id '{0}'")]
    NotFound(String),

    #[error("A ledger already exists for chain id '{0}'")]
    AlreadyExists(String),

    #[error("Block {0} is not present in the store")]
    BlockNotFound(String),

    #[error("Ledger store has no tip entry")]
    MissingTip,

    #[error("Difficulty must be between 1 and 255 bits, got {0}")]
    InvalidDifficulty(u32),

    #[error("Mining error: {0}")]
    Pow(#[from] PowError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration for opening or creating a ledger
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Directory holding one database per chain id
    pub data_dir: PathBuf,

    /// Proof-of-work difficulty applied to every block of this ledger
    pub difficulty_bits: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            data_dir: PathBuf::from("data"),
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
        }
    }
}

impl LedgerConfig {
    fn check(&self) -> Result<(), LedgerError> {
        if !(1..=255).contains(&self.difficulty_bits) {
            return Err(LedgerError::InvalidDifficulty(self.difficulty_bits));
        }
        Ok(())
    }
}

/// Handle to an append-only chain of mined blocks
///
/// Owns the durable store and a cached copy of the tip hash. The chain itself
/// is implicit in the store plus the tip pointer; it is never materialized in
/// memory.
pub struct Ledger {
    /// Cached hash of the latest block; mirrors the store's tip sentinel
    tip: Mutex<Vec<u8>>,

    /// Durable block storage
    store: LedgerStore,

    /// Difficulty applied to every mined block
    difficulty_bits: u32,

    /// Serializes the read-tip / mine / commit sequence of appends
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("tip", &hex::encode(self.tip()))
            .field("difficulty_bits", &self.difficulty_bits)
            .finish()
    }
}

impl Ledger {
    /// Creates a new ledger with a mined genesis block
    ///
    /// # Arguments
    ///
    /// * `reward_address` - The address receiving the genesis coinbase reward
    /// * `chain_id` - The chain identifier; one store exists per id
    /// * `config` - Data directory and difficulty settings
    ///
    /// # Returns
    ///
    /// A new Ledger whose tip is the genesis block, or
    /// [`LedgerError::AlreadyExists`] if a store for `chain_id` is present
    pub fn create(
        reward_address: &str,
        chain_id: &str,
        config: &LedgerConfig,
    ) -> Result<Self, LedgerError> {
        config.check()?;

        if LedgerStore::exists(&config.data_dir, chain_id) {
            return Err(LedgerError::AlreadyExists(chain_id.to_string()));
        }

        let coinbase = Transaction::new_coinbase(reward_address, GENESIS_MEMO);
        let genesis = Block::new_genesis(coinbase, config.difficulty_bits)?;

        let store = LedgerStore::open(&config.data_dir, chain_id)?;
        store.put_block_and_tip(&genesis)?;

        info!(
            "Created ledger '{}' with genesis block {}",
            chain_id,
            hex::encode(&genesis.hash)
        );

        Ok(Ledger {
            tip: Mutex::new(genesis.hash),
            store,
            difficulty_bits: config.difficulty_bits,
            append_lock: Mutex::new(()),
        })
    }

    /// Opens an existing ledger and recovers its tip from the store
    ///
    /// Does not reconstruct the chain in memory; only the tip sentinel is
    /// read.
    ///
    /// # Arguments
    ///
    /// * `chain_id` - The chain identifier
    /// * `config` - Data directory and difficulty settings
    ///
    /// # Returns
    ///
    /// The opened Ledger, or [`LedgerError::NotFound`] if no store exists
    /// for `chain_id`
    pub fn open(chain_id: &str, config: &LedgerConfig) -> Result<Self, LedgerError> {
        config.check()?;

        if !LedgerStore::exists(&config.data_dir, chain_id) {
            return Err(LedgerError::NotFound(chain_id.to_string()));
        }

        let store = LedgerStore::open(&config.data_dir, chain_id)?;
        let tip = store.tip_hash()?.ok_or(LedgerError::MissingTip)?;

        info!("Opened ledger '{}' at tip {}", chain_id, hex::encode(&tip));

        Ok(Ledger {
            tip: Mutex::new(tip),
            store,
            difficulty_bits: config.difficulty_bits,
            append_lock: Mutex::new(()),
        })
    }

    /// Mines a new block on top of the current tip and appends it
    ///
    /// # Arguments
    ///
    /// * `transactions` - The transactions to include in the block
    ///
    /// # Returns
    ///
    /// The newly appended block
    pub fn add_block(&self, transactions: Vec<Transaction>) -> Result<Block, LedgerError> {
        self.add_block_with(transactions, &StopToken::new())
    }

    /// Mines a new block on top of the current tip, aborting if `stop` fires
    ///
    /// The whole read-tip / mine / commit sequence runs under the append
    /// lock, so two callers never mine against the same tip and race to
    /// advance the sentinel. Mining holds no store transaction; the block and
    /// sentinel commit atomically once the search succeeds.
    pub fn add_block_with(
        &self,
        transactions: Vec<Transaction>,
        stop: &StopToken,
    ) -> Result<Block, LedgerError> {
        let _append = self.append_lock.lock().unwrap();

        let prev_hash = self.tip();
        let block = Block::new_with(transactions, prev_hash, self.difficulty_bits, stop)?;

        self.store.put_block_and_tip(&block)?;
        *self.tip.lock().unwrap() = block.hash.clone();

        info!("Appended block {}", hex::encode(&block.hash));
        Ok(block)
    }

    /// Gets the hash of the current tip
    pub fn tip(&self) -> Vec<u8> {
        self.tip.lock().unwrap().clone()
    }

    /// Gets a block by its hash
    ///
    /// # Arguments
    ///
    /// * `hash` - The hash of the block
    ///
    /// # Returns
    ///
    /// The block, or [`LedgerError::BlockNotFound`] if it is not stored
    pub fn block(&self, hash: &[u8]) -> Result<Block, LedgerError> {
        self.store
            .block(hash)?
            .ok_or_else(|| LedgerError::BlockNotFound(hex::encode(hash)))
    }

    /// Iterates over the chain from the tip back to the genesis block
    pub fn iter(&self) -> ChainIterator<'_> {
        ChainIterator {
            store: &self.store,
            next_hash: self.tip(),
        }
    }

    /// Re-checks the proof-of-work and hash linkage of every stored block
    ///
    /// # Returns
    ///
    /// true if every block's stored hash matches its own header material and
    /// meets the difficulty target. A missing parent surfaces as
    /// [`LedgerError::BlockNotFound`].
    pub fn validate_chain(&self) -> Result<bool, LedgerError> {
        for block in self.iter() {
            let block = block?;
            let pow = ProofOfWork::new(&block, self.difficulty_bits);
            if !pow.validate() || block.hash != pow.block_hash() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Iterator walking a chain from the tip towards the genesis block
///
/// Each step fetches the block for the current hash and then follows its
/// `prev_block_hash` link; the walk ends after the genesis block's empty
/// link.
pub struct ChainIterator<'a> {
    store: &'a LedgerStore,
    next_hash: Vec<u8>,
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<Block, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_hash.is_empty() {
            return None;
        }

        match self.store.block(&self.next_hash) {
            Ok(Some(block)) => {
                self.next_hash = block.prev_block_hash.clone();
                Some(Ok(block))
            }
            Ok(None) => {
                let missing = hex::encode(&self.next_hash);
                self.next_hash.clear();
                Some(Err(LedgerError::BlockNotFound(missing)))
            }
            Err(err) => {
                self.next_hash.clear();
                Some(Err(err.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reduced difficulty keeps each mined block to a few hundred attempts.
    fn test_config(dir: &std::path::Path) -> LedgerConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        LedgerConfig {
            data_dir: dir.to_path_buf(),
            difficulty_bits: 8,
        }
    }

    fn tagged_tx(seed: u8) -> Transaction {
        let mut tx = Transaction::new_coinbase("miner-1", "");
        tx.id = vec![seed; 32];
        tx
    }

    #[test]
    fn test_create_mines_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::create("miner-1", "main", &test_config(dir.path())).unwrap();

        let genesis = ledger.block(&ledger.tip()).unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.transactions.len(), 1);
        assert!(genesis.transactions[0].is_coinbase());
        assert!(ProofOfWork::new(&genesis, 8).validate());
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let _ledger = Ledger::create("miner-1", "main", &config).unwrap();

        match Ledger::create("miner-1", "main", &config) {
            Err(LedgerError::AlreadyExists(id)) => assert_eq!(id, "main"),
            other => panic!("expected AlreadyExists, got {:?}", other),
        }
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = tempfile::tempdir().unwrap();

        match Ledger::open("nope", &test_config(dir.path())) {
            Err(LedgerError::NotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_difficulty_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            data_dir: dir.path().to_path_buf(),
            difficulty_bits: 0,
        };

        assert!(matches!(
            Ledger::create("miner-1", "main", &config),
            Err(LedgerError::InvalidDifficulty(0))
        ));
    }

    #[test]
    fn test_add_block_advances_tip() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::create("miner-1", "main", &test_config(dir.path())).unwrap();

        let tip_before = ledger.tip();
        let block = ledger.add_block(vec![tagged_tx(1)]).unwrap();

        assert_eq!(block.prev_block_hash, tip_before);
        assert_eq!(ledger.tip(), block.hash);
        // The sentinel and the block entry both landed in the store.
        assert_eq!(ledger.store.tip_hash().unwrap().unwrap(), block.hash);
        assert_eq!(ledger.store.block(&block.hash).unwrap().unwrap(), block);
    }

    #[test]
    fn test_open_recovers_tip() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let tip = {
            let ledger = Ledger::create("miner-1", "main", &config).unwrap();
            ledger.add_block(vec![tagged_tx(1)]).unwrap();
            ledger.tip()
        };

        let reopened = Ledger::open("main", &config).unwrap();
        assert_eq!(reopened.tip(), tip);
    }

    #[test]
    fn test_iterator_walks_to_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::create("miner-1", "main", &test_config(dir.path())).unwrap();

        let first = ledger.add_block(vec![tagged_tx(1)]).unwrap();
        let second = ledger.add_block(vec![tagged_tx(2)]).unwrap();

        let blocks: Vec<Block> = ledger.iter().map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], second);
        assert_eq!(blocks[1], first);
        assert!(blocks[2].is_genesis());

        // Every non-genesis block links to the block that follows it in the walk.
        assert_eq!(blocks[0].prev_block_hash, blocks[1].hash);
        assert_eq!(blocks[1].prev_block_hash, blocks[2].hash);
    }

    #[test]
    fn test_validate_chain() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::create("miner-1", "main", &test_config(dir.path())).unwrap();

        ledger.add_block(vec![tagged_tx(1)]).unwrap();
        assert!(ledger.validate_chain().unwrap());
    }

    #[test]
    fn test_validate_chain_detects_forgery() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::create("miner-1", "main", &test_config(dir.path())).unwrap();

        // Append a block that skipped the mining search entirely.
        let forged = Block {
            timestamp: 1_700_000_000,
            transactions: vec![tagged_tx(9)],
            prev_block_hash: ledger.tip(),
            hash: vec![0xff; 32],
            nonce: 0,
        };
        ledger.store.put_block_and_tip(&forged).unwrap();
        *ledger.tip.lock().unwrap() = forged.hash.clone();

        assert!(!ledger.validate_chain().unwrap());
    }

    #[test]
    fn test_add_block_with_stopped_token_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::create("miner-1", "main", &test_config(dir.path())).unwrap();

        let token = StopToken::new();
        token.stop();

        let tip_before = ledger.tip();
        match ledger.add_block_with(vec![tagged_tx(1)], &token) {
            Err(LedgerError::Pow(PowError::Cancelled)) => {}
            other => panic!("expected cancellation, got {:?}", other),
        }
        // A cancelled append leaves the tip untouched.
        assert_eq!(ledger.tip(), tip_before);
    }
}
