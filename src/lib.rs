// powchain
//
// A single-node, append-only ledger of proof-of-work blocks:
// - Block structure and hash chaining
// - Proof-of-work search and verification
// - Durable sled-backed storage with an atomic tip pointer
// - Coinbase transaction stub
//
// Networking, signatures, and spendable-balance tracking are left to callers.

pub mod block;
pub mod ledger;
pub mod pow;
pub mod storage;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use ledger::{ChainIterator, Ledger, LedgerConfig, LedgerError, DEFAULT_DIFFICULTY_BITS};
pub use pow::{bits_to_target, PowError, ProofOfWork, StopToken, MAX_NONCE};
pub use storage::{LedgerStore, StorageError};
pub use transaction::{Transaction, TxInput, TxOutput, SUBSIDY};
