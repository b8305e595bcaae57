//! Chain data as seen by the scanner, and the record it persists.
//!
//! Narrow views of the alloy RPC types, holding only the fields the pipeline
//! reads.
use std::collections::BTreeMap;

use alloy::primitives::{Address, Bytes, B256, U256};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A block fetched with its full transaction list. Immutable once fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: B256,
    /// Unix seconds.
    pub timestamp: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block timestamp rendered as ISO-8601 UTC, e.g. `2024-03-01T12:00:00Z`.
    pub fn iso_timestamp(&self) -> String {
        i64::try_from(self.timestamp)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract-creation transactions.
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: U256,
    pub gas_price: Option<u128>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub status: bool,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub logs_count: usize,
}

/// One confirmed contract deployment. `contract_address` is the dedup key of
/// every [`StorageSink`](crate::storage::StorageSink).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractCreationRecord {
    pub tx_hash: B256,
    pub block_number: u64,
    pub creator_address: Address,
    pub contract_address: Address,
    pub creation_timestamp: String,
    pub init_code_hash: B256,
    pub gas_used: u64,
    pub status: bool,
    pub logs_count: usize,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl From<alloy::rpc::types::Transaction> for Transaction {
    fn from(tx: alloy::rpc::types::Transaction) -> Self {
        Self {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            input: tx.input,
            value: tx.value,
            gas_price: tx.gas_price,
        }
    }
}

impl From<alloy::rpc::types::Block> for Block {
    fn from(block: alloy::rpc::types::Block) -> Self {
        let transactions = block
            .transactions
            .as_transactions()
            .map(|txs| txs.iter().cloned().map(Transaction::from).collect())
            .unwrap_or_default();

        Self {
            number: block.header.number,
            hash: block.header.hash,
            timestamp: block.header.timestamp,
            gas_used: block.header.gas_used as u64,
            gas_limit: block.header.gas_limit as u64,
            transactions,
        }
    }
}

impl From<alloy::rpc::types::TransactionReceipt> for Receipt {
    fn from(receipt: alloy::rpc::types::TransactionReceipt) -> Self {
        Self {
            status: receipt.status(),
            gas_used: receipt.gas_used as u64,
            contract_address: receipt.contract_address,
            logs_count: receipt.inner.logs().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_timestamp_is_utc_seconds() {
        let block = Block {
            number: 1,
            hash: B256::ZERO,
            timestamp: 1_700_000_000,
            gas_used: 0,
            gas_limit: 0,
            transactions: vec![],
        };
        assert_eq!(block.iso_timestamp(), "2023-11-14T22:13:20Z");
    }

    #[test]
    fn record_serializes_addresses_as_hex() {
        let record = ContractCreationRecord {
            tx_hash: B256::repeat_byte(0x11),
            block_number: 7,
            creator_address: Address::repeat_byte(0x22),
            contract_address: Address::repeat_byte(0xab),
            creation_timestamp: "2023-11-14T22:13:20Z".into(),
            init_code_hash: B256::ZERO,
            gas_used: 21_000,
            status: true,
            logs_count: 0,
            metadata: BTreeMap::new(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json["contract_address"],
            "0xabababababababababababababababababababab"
        );
        let back: ContractCreationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
