// Entitlement check: does a wallet still hold the access credential?
//
// The credential is an ERC-1155 pass; holding any positive balance
// across the configured token ids counts. The chain is reached through
// a minimal `eth_call` JSON-RPC probe -- no contract tooling, just the
// ABI-encoded balanceOf(address,uint256) call.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::EntitlementConfig;

/// Function selector for `balanceOf(address,uint256)`.
const BALANCE_OF_SELECTOR: &str = "00fdd58e";

/// External check that a wallet holds the required credential.
#[async_trait]
pub trait EntitlementCheck: Send + Sync {
    async fn has_credential(&self, wallet: &str) -> anyhow::Result<bool>;
}

/// Every wallet is entitled. Used when no entitlement contract is
/// configured, and as the default in tests.
pub struct AllowAll;

#[async_trait]
impl EntitlementCheck for AllowAll {
    async fn has_credential(&self, _wallet: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// JSON-RPC backed entitlement check.
pub struct RpcEntitlement {
    http: reqwest::Client,
    rpc_url: String,
    contract_address: String,
    token_ids: Vec<u64>,
}

impl RpcEntitlement {
    pub fn new(rpc_url: String, contract_address: String, token_ids: Vec<u64>) -> Self {
        RpcEntitlement {
            http: reqwest::Client::new(),
            rpc_url,
            contract_address,
            token_ids,
        }
    }

    async fn balance_of(&self, wallet: &str, token_id: u64) -> anyhow::Result<u128> {
        let data = encode_balance_of(wallet, token_id)?;
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{ "to": self.contract_address, "data": data }, "latest"],
        });

        let response: Value = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .context("eth_call request failed")?
            .json()
            .await
            .context("eth_call response was not JSON")?;

        if let Some(err) = response.get("error") {
            return Err(anyhow!("eth_call returned error: {err}"));
        }
        let result = response
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("eth_call response missing result"))?;

        parse_quantity(result)
    }
}

#[async_trait]
impl EntitlementCheck for RpcEntitlement {
    async fn has_credential(&self, wallet: &str) -> anyhow::Result<bool> {
        let mut total: u128 = 0;
        for &token_id in &self.token_ids {
            let balance = self.balance_of(wallet, token_id).await?;
            debug!(wallet, token_id, balance, "entitlement balance");
            total = total.saturating_add(balance);
        }
        Ok(total > 0)
    }
}

/// Build the checker the config asks for.
pub fn build_checker(config: &EntitlementConfig) -> Arc<dyn EntitlementCheck> {
    if config.enabled {
        Arc::new(RpcEntitlement::new(
            config.rpc_url.clone(),
            config.contract_address.clone(),
            config.token_ids.clone(),
        ))
    } else {
        Arc::new(AllowAll)
    }
}

/// ABI-encode a `balanceOf(address,uint256)` call.
fn encode_balance_of(wallet: &str, token_id: u64) -> anyhow::Result<String> {
    let addr = wallet.strip_prefix("0x").unwrap_or(wallet);
    if addr.len() > 40 || !addr.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("invalid wallet address: {wallet}"));
    }
    Ok(format!(
        "0x{BALANCE_OF_SELECTOR}{:0>64}{:064x}",
        addr.to_ascii_lowercase(),
        token_id
    ))
}

/// Parse an eth_call hex quantity. Balances larger than u128 are clamped;
/// only positivity matters to the caller.
fn parse_quantity(hex: &str) -> anyhow::Result<u128> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    if digits.is_empty() {
        return Ok(0);
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!("invalid hex quantity: {hex}"));
    }
    let trimmed = digits.trim_start_matches('0');
    if trimmed.len() > 32 {
        return Ok(u128::MAX);
    }
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16).context("hex quantity out of range")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
