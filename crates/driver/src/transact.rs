//! Sending contract calls from the validator's signing identity and waiting for their receipts.

use crate::TransactionAuth;
use anyhow::{anyhow, Result};
use ethers::{
    abi::Detokenize,
    contract::ContractCall,
    providers::Middleware,
    types::{TransactionReceipt, U64},
};
use std::time::Duration;

/// The default number of receipt polls before a transaction is abandoned.
pub const DEFAULT_RECEIPT_RETRIES: usize = 12;

/// The default delay between two receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Sends `call` from the identity guarded by `auth` and polls for its receipt.
///
/// The identity stays claimed until the receipt is in, so the nonce of the next transaction is
/// never reused.
///
/// ### Returns
/// - `Ok(TransactionReceipt)`: The transaction was mined and succeeded.
/// - `Err(anyhow::Error)`: The transaction could not be sent, was dropped, or reverted.
pub(crate) async fn send_and_confirm<M, D>(
    call: ContractCall<M, D>,
    auth: &TransactionAuth,
    receipt_retries: usize,
    poll_interval: Duration,
    name: &str,
) -> Result<TransactionReceipt>
where
    M: Middleware + 'static,
    D: Detokenize,
{
    let guard = auth.acquire().await;

    let call = call.from(guard.address());
    let pending = call
        .send()
        .await
        .map_err(|e| anyhow!("Failed to call {}: {}", name, e))?;
    tracing::info!(target: "transactions", "Sent {} transaction {:?}", name, *pending);

    let receipt = pending
        .interval(poll_interval)
        .retries(receipt_retries)
        .await?
        .ok_or(anyhow!("{} transaction was dropped", name))?;
    check_status(&receipt, name)?;
    Ok(receipt)
}

/// Fails if `receipt` records a reverted transaction.
fn check_status(receipt: &TransactionReceipt, name: &str) -> Result<()> {
    match receipt.status {
        Some(status) if status == U64::from(1) => Ok(()),
        Some(_) => Err(anyhow!(
            "{} transaction {:?} reverted",
            name,
            receipt.transaction_hash
        )),
        // Receipts from before byzantium carry no status.
        None => Ok(()),
    }
}
