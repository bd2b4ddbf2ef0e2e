use std::path::{Path, PathBuf};

use log::info;
use sled::transaction::TransactionError;
use sled::{Db, Tree};
use thiserror::Error;

use super::block::Block;

/// Tree holding blocks keyed by their hash, plus the tip sentinel.
const BLOCKS_TREE: &str = "blocks";

/// Reserved key pointing at the hash of the current tip. Block hashes are
/// 32 bytes, so the single-byte key can never collide with one.
const TIP_KEY: &[u8] = b"l";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Failed to serialize block {key}: {message}")]
    Serialization { key: String, message: String },

    #[error("Failed to deserialize block {key}: {message}")]
    Deserialization { key: String, message: String },

    #[error("Atomic commit failed: {0}")]
    Transaction(String),
}

/// Durable storage for a single chain
///
/// One sled database per chain id, holding the block tree and the tip
/// sentinel. The store never updates or deletes a block; the only mutation
/// is [`LedgerStore::put_block_and_tip`].
pub struct LedgerStore {
    /// The database instance
    db: Db,

    /// Tree for blocks and the tip sentinel
    blocks: Tree,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore").finish()
    }
}

/// Resolves the database directory for a chain id
fn db_path(data_dir: &Path, chain_id: &str) -> PathBuf {
    data_dir.join(format!("blockchain_{}", chain_id))
}

impl LedgerStore {
    /// Checks whether a store already exists for the given chain id
    pub fn exists(data_dir: &Path, chain_id: &str) -> bool {
        db_path(data_dir, chain_id).exists()
    }

    /// Opens (or creates) the store for the given chain id
    ///
    /// # Arguments
    ///
    /// * `data_dir` - The directory holding per-chain databases
    /// * `chain_id` - The chain identifier
    ///
    /// # Returns
    ///
    /// A new LedgerStore instance
    pub fn open(data_dir: &Path, chain_id: &str) -> Result<Self, StorageError> {
        let path = db_path(data_dir, chain_id);
        let db = sled::open(&path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;

        info!("Opened ledger store at {}", path.display());

        Ok(Self { db, blocks })
    }

    /// Persists a block and advances the tip sentinel in one atomic commit
    ///
    /// Writes `hash -> serialized block` and `tip sentinel -> hash` inside a
    /// single tree transaction, so the pair is either fully applied or not
    /// applied at all.
    ///
    /// # Arguments
    ///
    /// * `block` - The block to persist; becomes the new tip
    pub fn put_block_and_tip(&self, block: &Block) -> Result<(), StorageError> {
        let key = hex::encode(&block.hash);
        let encoded = block.serialize().map_err(|e| StorageError::Serialization {
            key: key.clone(),
            message: e.to_string(),
        })?;

        let result: Result<(), TransactionError<()>> = self.blocks.transaction(|tx| {
            tx.insert(block.hash.as_slice(), encoded.as_slice())?;
            tx.insert(TIP_KEY, block.hash.as_slice())?;
            Ok(())
        });

        result.map_err(|err| match err {
            TransactionError::Storage(e) => StorageError::Database(e),
            TransactionError::Abort(()) => {
                StorageError::Transaction(format!("Commit of block {} aborted", key))
            }
        })?;

        self.db.flush()?;

        info!("Persisted block {} as the new tip", key);
        Ok(())
    }

    /// Gets a block by its hash
    ///
    /// # Arguments
    ///
    /// * `hash` - The hash of the block
    ///
    /// # Returns
    ///
    /// The block, or None if no block with that hash is stored
    pub fn block(&self, hash: &[u8]) -> Result<Option<Block>, StorageError> {
        match self.blocks.get(hash)? {
            Some(value) => {
                let block =
                    Block::deserialize(&value).map_err(|e| StorageError::Deserialization {
                        key: hex::encode(hash),
                        message: e.to_string(),
                    })?;
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    /// Gets the hash of the current tip
    ///
    /// # Returns
    ///
    /// The tip hash, or None if the store was never initialized
    pub fn tip_hash(&self) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blocks.get(TIP_KEY)?.map(|value| value.to_vec()))
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
