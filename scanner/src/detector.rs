//! Two-phase detection of contract deployments.
//!
//! A cheap look at the transaction decides whether it is a *candidate*; only
//! candidates cost a receipt fetch, and only a receipt carrying a created
//! contract address *confirms* one.
//!
//! The prefix list is small and hardcoded. Deployments whose init code starts
//! differently (other compilers, unusual optimizer output) and that are not
//! plain recipient-less transactions go undetected.
use std::collections::BTreeMap;

use alloy::primitives::keccak256;
use serde_json::json;

use crate::types::{Block, ContractCreationRecord, Receipt, Transaction};

/// Init code preambles recognised as constructor bytecode.
pub const CONSTRUCTOR_PREFIXES: &[&[u8]] = &[
    // solc >= 0.4.22: PUSH1 0x80 PUSH1 0x40 MSTORE
    &[0x60, 0x80, 0x60, 0x40, 0x52],
    // older solc: PUSH1 0x60 PUSH1 0x40 MSTORE
    &[0x60, 0x60, 0x60, 0x40, 0x52],
];

/// Why a transaction was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    MissingRecipient,
    ConstructorPrefix,
}

impl Candidate {
    pub fn as_str(self) -> &'static str {
        match self {
            Candidate::MissingRecipient => "missing_recipient",
            Candidate::ConstructorPrefix => "constructor_prefix",
        }
    }
}

/// Phase one. Every recipient-less transaction is a candidate.
pub fn candidate(tx: &Transaction) -> Option<Candidate> {
    if tx.to.is_none() {
        Some(Candidate::MissingRecipient)
    } else if !tx.input.is_empty()
        && CONSTRUCTOR_PREFIXES
            .iter()
            .any(|prefix| tx.input.starts_with(prefix))
    {
        Some(Candidate::ConstructorPrefix)
    } else {
        None
    }
}

pub fn is_candidate(tx: &Transaction) -> bool {
    candidate(tx).is_some()
}

/// Phase two. Produces a record only if the receipt names a created contract.
pub fn confirm(
    block: &Block,
    tx: &Transaction,
    receipt: &Receipt,
) -> Option<ContractCreationRecord> {
    let contract_address = receipt.contract_address.filter(|a| !a.is_zero())?;

    let mut metadata = BTreeMap::new();
    metadata.insert("value_wei".to_owned(), json!(tx.value.to_string()));
    metadata.insert("init_code_size".to_owned(), json!(tx.input.len()));
    if let Some(gas_price) = tx.gas_price {
        metadata.insert("gas_price_wei".to_owned(), json!(gas_price.to_string()));
        metadata.insert(
            "deployment_cost_wei".to_owned(),
            json!((gas_price.saturating_mul(receipt.gas_used as u128)).to_string()),
        );
    }
    if let Some(reason) = candidate(tx) {
        metadata.insert("detected_by".to_owned(), json!(reason.as_str()));
    }

    Some(ContractCreationRecord {
        tx_hash: tx.hash,
        block_number: block.number,
        creator_address: tx.from,
        contract_address,
        creation_timestamp: block.iso_timestamp(),
        init_code_hash: keccak256(&tx.input),
        gas_used: receipt.gas_used,
        status: receipt.status,
        logs_count: receipt.logs_count,
        metadata,
    })
}
