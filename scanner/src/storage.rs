use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;

use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::types::ContractCreationRecord;

/// Result of a bulk insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// This many records were new.
    Inserted(usize),
    /// Every record was already present. Not an error.
    AlreadyExists,
}

/// Idempotent destination of confirmed records, keyed by contract address.
pub trait StorageSink: Send + Sync {
    /// Inserts the records whose contract address is not yet stored.
    fn store_batch(
        &self,
        records: Vec<ContractCreationRecord>,
    ) -> impl Future<Output = Result<StoreOutcome, StoreError>> + Send;

    /// Whether `number` was already fully ingested.
    fn block_exists(&self, number: u64) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Remembers that `number` was fully ingested.
    fn mark_block_ingested(
        &self,
        number: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Keeps records in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<Address, ContractCreationRecord>,
    blocks: BTreeSet<u64>,
    store_calls: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<ContractCreationRecord> {
        let mut records = self
            .state
            .lock()
            .await
            .records
            .values()
            .cloned()
            .collect::<Vec<_>>();
        records.sort_by_key(|r| (r.block_number, r.contract_address));
        records
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of `store_batch` calls received.
    pub async fn store_calls(&self) -> usize {
        self.state.lock().await.store_calls
    }
}

impl StorageSink for MemorySink {
    async fn store_batch(
        &self,
        records: Vec<ContractCreationRecord>,
    ) -> Result<StoreOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.store_calls += 1;
        let mut inserted = 0;
        for record in records {
            if !state.records.contains_key(&record.contract_address) {
                state.records.insert(record.contract_address, record);
                inserted += 1;
            }
        }
        Ok(outcome(inserted))
    }

    async fn block_exists(&self, number: u64) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.blocks.contains(&number))
    }

    async fn mark_block_ingested(&self, number: u64) -> Result<(), StoreError> {
        self.state.lock().await.blocks.insert(number);
        Ok(())
    }
}

fn outcome(inserted: usize) -> StoreOutcome {
    if inserted == 0 {
        StoreOutcome::AlreadyExists
    } else {
        StoreOutcome::Inserted(inserted)
    }
}

/// One line of a [`JsonLinesSink`] file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Line {
    Contract(ContractCreationRecord),
    Block { number: u64 },
}

/// Appends records to a JSON-lines file. Existing keys and ingested heights
/// are loaded on open, so re-running over the same range stores nothing twice.
pub struct JsonLinesSink {
    state: Mutex<FileState>,
}

struct FileState {
    file: tokio::fs::File,
    contracts: std::collections::HashSet<Address>,
    blocks: BTreeSet<u64>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut contracts = std::collections::HashSet::new();
        let mut blocks = BTreeSet::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(existing) => {
                for (index, line) in existing.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Line>(line) {
                        Ok(Line::Contract(record)) => {
                            contracts.insert(record.contract_address);
                        }
                        Ok(Line::Block { number }) => {
                            blocks.insert(number);
                        }
                        Err(e) => warn!(
                            "skipping malformed line {} of {}: {e}",
                            index + 1,
                            path.display()
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(
            "opened {} ({} contracts, {} blocks already stored)",
            path.display(),
            contracts.len(),
            blocks.len()
        );

        Ok(Self {
            state: Mutex::new(FileState {
                file,
                contracts,
                blocks,
            }),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.contracts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl StorageSink for JsonLinesSink {
    async fn store_batch(
        &self,
        records: Vec<ContractCreationRecord>,
    ) -> Result<StoreOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let mut buffer = Vec::new();
        let mut fresh = Vec::new();
        for record in records {
            if state.contracts.contains(&record.contract_address)
                || fresh.contains(&record.contract_address)
            {
                continue;
            }
            fresh.push(record.contract_address);
            serde_json::to_writer(&mut buffer, &Line::Contract(record))?;
            buffer.push(b'\n');
        }

        if !fresh.is_empty() {
            state.file.write_all(&buffer).await?;
            state.file.flush().await?;
            state.contracts.extend(fresh.iter().copied());
        }
        Ok(outcome(fresh.len()))
    }

    async fn block_exists(&self, number: u64) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.blocks.contains(&number))
    }

    async fn mark_block_ingested(&self, number: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.blocks.insert(number) {
            let mut line = serde_json::to_vec(&Line::Block { number })?;
            line.push(b'\n');
            state.file.write_all(&line).await?;
            state.file.flush().await?;
        }
        Ok(())
    }
}

const CSV_HEADER: [&str; 6] = [
    "Block Number",
    "Transaction Hash",
    "Contract Address",
    "Creator Address",
    "Timestamp",
    "Gas Used",
];

/// One row of a [`CsvSink`] file.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "Block Number")]
    block_number: u64,
    #[serde(rename = "Transaction Hash")]
    tx_hash: B256,
    #[serde(rename = "Contract Address")]
    contract_address: Address,
    #[serde(rename = "Creator Address")]
    creator_address: Address,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Gas Used")]
    gas_used: u64,
}

impl From<&ContractCreationRecord> for CsvRow {
    fn from(record: &ContractCreationRecord) -> Self {
        Self {
            block_number: record.block_number,
            tx_hash: record.tx_hash,
            contract_address: record.contract_address,
            creator_address: record.creator_address,
            timestamp: record.creation_timestamp.clone(),
            gas_used: record.gas_used,
        }
    }
}

/// Appends one row per contract to a CSV file. Existing rows are loaded on
/// open.
///
/// Only contracts are written, so a height counts as ingested across reopens
/// only if it has a stored row. Heights without deployments are remembered
/// for the life of the sink.
pub struct CsvSink {
    state: Mutex<FileState>,
}

impl CsvSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut contracts = std::collections::HashSet::new();
        let mut blocks = BTreeSet::new();
        let mut needs_header = true;
        match tokio::fs::read(path).await {
            Ok(existing) => {
                needs_header = existing.is_empty();
                let mut reader = csv::Reader::from_reader(existing.as_slice());
                for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
                    match row {
                        Ok(row) => {
                            contracts.insert(row.contract_address);
                            blocks.insert(row.block_number);
                        }
                        Err(e) => warn!(
                            "skipping malformed row {} of {}: {e}",
                            index + 1,
                            path.display()
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        if needs_header {
            let mut writer = csv_writer();
            writer.write_record(CSV_HEADER)?;
            file.write_all(&finish_csv(writer)?).await?;
            file.flush().await?;
        }
        info!(
            "opened {} ({} contracts already stored)",
            path.display(),
            contracts.len()
        );

        Ok(Self {
            state: Mutex::new(FileState {
                file,
                contracts,
                blocks,
            }),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.contracts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new())
}

fn finish_csv(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, StoreError> {
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

impl StorageSink for CsvSink {
    async fn store_batch(
        &self,
        records: Vec<ContractCreationRecord>,
    ) -> Result<StoreOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let mut writer = csv_writer();
        let mut fresh = Vec::new();
        for record in &records {
            if state.contracts.contains(&record.contract_address)
                || fresh.iter().any(|(address, _)| *address == record.contract_address)
            {
                continue;
            }
            writer.serialize(CsvRow::from(record))?;
            fresh.push((record.contract_address, record.block_number));
        }

        if !fresh.is_empty() {
            let rows = finish_csv(writer)?;
            state.file.write_all(&rows).await?;
            state.file.flush().await?;
            for (address, block) in &fresh {
                state.contracts.insert(*address);
                state.blocks.insert(*block);
            }
        }
        Ok(outcome(fresh.len()))
    }

    async fn block_exists(&self, number: u64) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.blocks.contains(&number))
    }

    async fn mark_block_ingested(&self, number: u64) -> Result<(), StoreError> {
        self.state.lock().await.blocks.insert(number);
        Ok(())
    }
}
