use alloy_primitives::{hex, Address};
use alloy_sol_types::{sol, SolCall};
use reqwest::Client;
use serde_json::Value;

use super::{check_status, SourceError};

sol! {
    interface IUniswapV2Factory {
        function getPair(address tokenA, address tokenB) external view returns (address pair);
    }

    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }

    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256 balance);
    }

    /// Symbiosis nerve (stable swap) pool.
    interface ISymbiosisPool {
        function getTokenIndex(address token) external view returns (uint8 index);
        function getTokenBalance(uint8 index) external view returns (uint256 balance);
    }
}

/// Read-only contract calls over JSON-RPC `eth_call`.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http_client: Client,
    rpc_url: String,
}

impl RpcClient {
    pub fn new(http_client: Client, rpc_url: impl Into<String>) -> Self {
        Self {
            http_client,
            rpc_url: rpc_url.into(),
        }
    }

    pub async fn call<C: SolCall>(&self, to: Address, call: &C) -> Result<C::Return, SourceError> {
        let output = self.eth_call(to, &call.abi_encode()).await?;
        if output.is_empty() {
            return Err(SourceError::Rpc(format!("{} returned no data from {to:#x}", C::SIGNATURE)));
        }
        C::abi_decode_returns(&output).map_err(|e| SourceError::Parse(format!("{}: {e}", C::SIGNATURE)))
    }

    async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Vec<u8>, SourceError> {
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_call",
            "params": [
                {
                    "to": format!("{to:#x}"),
                    "data": hex::encode_prefixed(data)
                },
                "latest"
            ],
            "id": 1
        });

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request_body)
            .send()
            .await?;
        let response_json: Value = check_status(response)?.json().await?;

        decode_result(&response_json)
    }
}

fn decode_result(response: &Value) -> Result<Vec<u8>, SourceError> {
    if let Some(error) = response.get("error") {
        return Err(SourceError::Rpc(error.to_string()));
    }

    let result = response
        .get("result")
        .and_then(Value::as_str)
        .ok_or(SourceError::Missing("result"))?;

    hex::decode(result).map_err(|e| SourceError::Parse(e.to_string()))
}
