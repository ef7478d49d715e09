use crate::WatchError;
use ethers::{
    prelude::{k256::ecdsa::SigningKey, SignerMiddleware},
    providers::{Provider, Ws},
    signers::Wallet,
    types::H256,
};
use serde::{Deserialize, Serialize};

/// The [SignerMiddlewareWS] type is the websocket provider that signs the transactions it sends.
pub type SignerMiddlewareWS = SignerMiddleware<Provider<Ws>, Wallet<SigningKey>>;

/// The [BlockId] identifies a base chain block by its height and header hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// The height of the block.
    pub height: u64,
    /// The hash of the block header.
    pub header_hash: H256,
}

/// A [BlockRecord] is a [BlockId] together with the parent hash recorded in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// The identifier of the block.
    pub id: BlockId,
    /// The header hash of the block's parent.
    pub parent_hash: H256,
}

/// The element type of a block subscription. Terminal failures are delivered in-band as the last
/// element before the subscription closes.
pub type MaybeBlockId = Result<BlockId, WatchError>;
