use serde::{Deserialize, Serialize};

/// Reward paid to the coinbase output of every mined block.
pub const SUBSIDY: i64 = 10;

/// Represents a transaction input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Id of the transaction whose output is being spent; empty for coinbase
    pub txid: Vec<u8>,

    /// Index of the referenced output; -1 for coinbase
    pub vout: i32,

    /// Script that unlocks the referenced output
    pub script_sig: String,
}

/// Represents a transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Amount of coins carried by this output
    pub value: i64,

    /// Script that locks the output to its owner
    pub script_pub_key: String,
}

/// Represents a transaction consumed by block construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Digest identifying the transaction.
    ///
    /// Left empty by [`Transaction::new_coinbase`]: no id derivation scheme
    /// is defined yet, and nothing in this crate depends on id uniqueness.
    pub id: Vec<u8>,

    /// Ordered list of inputs
    pub vin: Vec<TxInput>,

    /// Ordered list of outputs
    pub vout: Vec<TxOutput>,
}

impl Transaction {
    /// Creates a new coinbase transaction (mining reward)
    ///
    /// # Arguments
    ///
    /// * `to` - The address receiving the reward output
    /// * `data` - Arbitrary memo stored in the input script; defaults to a
    ///   templated string referencing `to` when empty
    ///
    /// # Returns
    ///
    /// A new Transaction instance with one placeholder input and one reward output
    pub fn new_coinbase(to: &str, data: &str) -> Self {
        let data = if data.is_empty() {
            format!("Reward to '{}'", to)
        } else {
            data.to_string()
        };

        let txin = TxInput {
            txid: Vec::new(),
            vout: -1,
            script_sig: data,
        };
        let txout = TxOutput {
            value: SUBSIDY,
            script_pub_key: to.to_string(),
        };

        Transaction {
            id: Vec::new(),
            vin: vec![txin],
            vout: vec![txout],
        }
    }

    /// Checks if the transaction is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == -1
    }
}
