//! Chain RPC Module
//!
//! Reads the collection contract over JSON-RPC: chain head, contract logs
//! for a block range, a token's live gene and block timestamps.
//! Every call is bounded by a timeout; the point reads (gene, block time)
//! are retried with exponential backoff, log queries are not.

use std::future::{Future, IntoFuture};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind, Filter, Log};
use alloy::sol;
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Default timeout for a single RPC call
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default number of retries for point reads
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Initial backoff delay between retries
pub const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff delay between retries
pub const MAX_BACKOFF_MS: u64 = 5_000;

sol! {
    #[sol(rpc)]
    contract Polymorph {
        function geneOf(uint256 tokenId) external view returns (uint256 gene);
    }
}

/// Errors that can occur while talking to the chain
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Invalid RPC URL: {0}")]
    InvalidUrl(String),

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("RPC call timed out after {0}ms")]
    Timeout(u64),

    #[error("Contract call failed: {0}")]
    ContractCall(String),

    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Log is missing {0}")]
    MissingField(&'static str),
}

impl RpcError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Transport(_) | RpcError::Timeout(_) | RpcError::BlockNotFound(_)
        )
    }
}

/// A contract log with its chain position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub block_number: u64,
    pub tx_index: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

impl RawLog {
    /// Convert a log returned by the node, which must be mined
    pub fn from_rpc(log: &Log) -> Result<Self, RpcError> {
        Ok(Self {
            block_number: log.block_number.ok_or(RpcError::MissingField("block_number"))?,
            tx_index: log
                .transaction_index
                .ok_or(RpcError::MissingField("transaction_index"))?,
            tx_hash: log
                .transaction_hash
                .ok_or(RpcError::MissingField("transaction_hash"))?,
            log_index: log.log_index.ok_or(RpcError::MissingField("log_index"))?,
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
        })
    }

    /// Transaction hash with 0x prefix
    pub fn tx_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.tx_hash))
    }
}

/// Read access to the chain needed by the indexer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current chain head
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Contract logs in `[from, to]`, both inclusive
    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, RpcError>;

    /// Live gene of a token
    async fn gene_of(&self, token_id: U256) -> Result<U256, RpcError>;

    /// Unix timestamp of a block
    async fn block_timestamp(&self, block: u64) -> Result<u64, RpcError>;
}

/// Configuration for the RPC client
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// HTTP endpoint of the node
    pub url: String,
    /// Address of the collection contract
    pub contract: Address,
    /// Timeout per call in milliseconds
    pub timeout_ms: u64,
    /// Retries for point reads
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>, contract: Address) -> Self {
        Self {
            url: url.into(),
            contract,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }

    /// Calculate backoff delay for a given attempt number
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_backoff_ms * 2u64.pow(attempt.min(10));
        Duration::from_millis(delay_ms.min(self.max_backoff_ms))
    }
}

/// JSON-RPC client over HTTP
#[derive(Clone)]
pub struct RpcClient {
    provider: RootProvider<Http<Client>>,
    config: RpcConfig,
}

impl RpcClient {
    /// Create a client for the configured endpoint
    pub fn new(config: RpcConfig) -> Result<Self, RpcError> {
        let url = config
            .url
            .parse()
            .map_err(|_| RpcError::InvalidUrl(config.url.clone()))?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(Self { provider, config })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Run a call under the configured timeout
    async fn timed<T, E, F>(&self, call: F) -> Result<T, RpcError>
    where
        E: std::fmt::Display,
        F: IntoFuture<Output = Result<T, E>>,
    {
        match timeout(Duration::from_millis(self.config.timeout_ms), call).await {
            Ok(result) => result.map_err(|e| RpcError::Transport(e.to_string())),
            Err(_) => Err(RpcError::Timeout(self.config.timeout_ms)),
        }
    }

    /// Retry a point read on transient failures
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt + 1,
                        self.config.max_retries,
                        delay,
                        e
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn block_number(&self) -> Result<u64, RpcError> {
        self.timed(self.provider.get_block_number()).await
    }

    async fn logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, RpcError> {
        let filter = Filter::new()
            .address(self.config.contract)
            .from_block(from)
            .to_block(to);

        let logs: Vec<Log> = self.timed(self.provider.get_logs(&filter)).await?;
        debug!("Fetched {} logs for blocks {}..={}", logs.len(), from, to);

        logs.iter().map(RawLog::from_rpc).collect()
    }

    async fn gene_of(&self, token_id: U256) -> Result<U256, RpcError> {
        let contract = Polymorph::new(self.config.contract, &self.provider);
        let contract = &contract;
        let timeout_ms = self.config.timeout_ms;
        self.with_retry("geneOf", || async move {
            match timeout(Duration::from_millis(timeout_ms), contract.geneOf(token_id).call()).await {
                Ok(Ok(ret)) => Ok(ret.gene),
                Ok(Err(e)) => Err(RpcError::ContractCall(e.to_string())),
                Err(_) => Err(RpcError::Timeout(timeout_ms)),
            }
        })
        .await
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64, RpcError> {
        self.with_retry("getBlockByNumber", || async move {
            let found = self
                .timed(self.provider.get_block_by_number(
                    BlockNumberOrTag::Number(block),
                    BlockTransactionsKind::Hashes,
                ))
                .await?;
            found
                .map(|b| b.header.timestamp)
                .ok_or(RpcError::BlockNotFound(block))
        })
        .await
    }
}
