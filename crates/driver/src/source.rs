//! The source module holds the [BlockSource] trait, the low-level accessor over the base chain,
//! and its implementation on top of an ethers [Middleware].

use crate::{BlockId, BlockRecord};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    providers::Middleware,
    types::{Block, BlockNumber, H256},
};
use std::sync::Arc;

/// Describes a data source that can provide block identifiers from the base chain. Implementations
/// are shared between concurrent watchers and must be safe for concurrent use.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Returns the block at `height`, or `None` if the source does not know it (yet). A "not
    /// found" answer has no side effects.
    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>>;

    /// Returns the latest mined block.
    async fn latest_block(&self) -> Result<BlockRecord>;
}

/// A [BlockSource] backed by an ethers [Middleware], e.g. a websocket [ethers::providers::Provider].
#[derive(Debug, Clone)]
pub struct ProviderBlockSource<M> {
    provider: Arc<M>,
}

impl<M> ProviderBlockSource<M> {
    /// Creates a new [ProviderBlockSource].
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }
}

/// Converts a block returned by the node into a [BlockRecord]. Pending blocks, which carry
/// neither a number nor a hash, have no record.
pub fn record_from_block(block: &Block<H256>) -> Option<BlockRecord> {
    Some(BlockRecord {
        id: BlockId {
            height: block.number?.as_u64(),
            header_hash: block.hash?,
        },
        parent_hash: block.parent_hash,
    })
}

#[async_trait]
impl<M: Middleware + 'static> BlockSource for ProviderBlockSource<M> {
    async fn block_by_height(&self, height: u64) -> Result<Option<BlockRecord>> {
        let block = self
            .provider
            .get_block(height)
            .await
            .map_err(|e| anyhow!("Error fetching block {}: {}", height, e))?;
        Ok(block.as_ref().and_then(record_from_block))
    }

    async fn latest_block(&self) -> Result<BlockRecord> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| anyhow!("Error fetching latest block: {}", e))?
            .ok_or(anyhow!("Latest block not found"))?;
        record_from_block(&block).ok_or(anyhow!("Latest block is still pending"))
    }
}
