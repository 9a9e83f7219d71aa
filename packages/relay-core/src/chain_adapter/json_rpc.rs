use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{json, Value};
use std::time::Duration;

use super::{ChainReader, ChainWriter};
use crate::{
    config::ChainConfig,
    types::{ChainId, PartialSignature, ReportContext, TransactionResult},
    Error,
};

const REQUEST_TIMEOUT: u64 = 15;

/// Reader and writer for a chain gateway speaking JSON-RPC 2.0.
///
/// The gateway owns transaction encoding; this handler only ships the
/// report, the context and the signatures, and reads back a status string.
pub struct JsonRpcHandler {
    chain_id: ChainId,
    rpc_url: String,
    contract_address: String,
    client: reqwest::Client,
}

impl JsonRpcHandler {
    pub fn new(config: &ChainConfig) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT))
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            chain_id: config.chain_id,
            rpc_url: config.rpc_url.clone(),
            contract_address: config.contract_address.clone(),
            client,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let result: Value = response
            .json()
            .await
            .map_err(|e| Error::Chain(e.to_string()))?;

        if let Some(error) = result.get("error") {
            return Err(Error::Chain(format!("{} failed: {}", method, error)));
        }

        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }
}

fn parse_status(status: &str) -> Option<TransactionResult> {
    match status {
        "success" | "mined" => Some(TransactionResult::Success),
        "pending" => Some(TransactionResult::Pending),
        "notExist" | "not_exist" => Some(TransactionResult::NotExist),
        "fail" | "failed" => Some(TransactionResult::Fail),
        _ => None,
    }
}

#[async_trait]
impl ChainWriter for JsonRpcHandler {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn send_commit_transaction(
        &self,
        ctx: &ReportContext,
        signatures: &[PartialSignature],
        report: &[u8],
    ) -> Result<Option<String>, Error> {
        let signatures: Vec<Value> = signatures
            .iter()
            .map(|s| json!({ "index": s.index, "signature": hex::encode(&s.signature) }))
            .collect();
        let result = self
            .call(
                "relay_sendCommitTransaction",
                json!([{
                    "contract": self.contract_address,
                    "context": hex::encode(ctx.to_bytes()?),
                    "report": hex::encode(report),
                    "signatures": signatures,
                }]),
            )
            .await?;

        match result.as_str() {
            Some(tx_id) if !tx_id.is_empty() => {
                debug!("[{}] Commit transaction sent: {}", ctx, tx_id);
                Ok(Some(tx_id.to_string()))
            }
            _ => {
                warn!("[{}] Gateway returned no transaction id", ctx);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ChainReader for JsonRpcHandler {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn get_transaction_result(&self, transaction_id: &str) -> Result<TransactionResult, Error> {
        let result = self
            .call("relay_getTransactionResult", json!([transaction_id]))
            .await?;
        let status = result.as_str().unwrap_or_default();
        parse_status(status)
            .ok_or_else(|| Error::Chain(format!("Unknown transaction status: {:?}", result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainFamily, KeyringConfig};
    use mockito::Matcher;
    use tokio_test::{assert_err, assert_ok};

    fn config(url: String) -> ChainConfig {
        ChainConfig {
            chain_id: 2,
            name: "gateway".to_string(),
            family: ChainFamily::Evm,
            rpc_url: url,
            contract_address: "0xramp".to_string(),
            keyring: KeyringConfig {
                secret_key: String::new(),
                peer_public_keys: vec![],
            },
        }
    }

    fn context() -> ReportContext {
        ReportContext {
            message_id: "M1".to_string(),
            sender: "alice".to_string(),
            receiver: "bob".to_string(),
            source_chain_id: 1,
            target_chain_id: 2,
            epoch: 0,
            round_id: 0,
        }
    }

    #[tokio::test]
    async fn test_send_commit_transaction() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "relay_sendCommitTransaction",
                "params": [{ "contract": "0xramp", "report": "0102" }]
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0xtx"}"#)
            .create_async()
            .await;

        let handler = JsonRpcHandler::new(&config(server.url())).unwrap();
        let signatures = vec![PartialSignature { index: 0, signature: vec![0xaa] }];
        let tx = handler.send_commit_transaction(&context(), &signatures, &[1, 2]).await;
        assert_eq!(assert_ok!(tx), Some("0xtx".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_transaction_id_is_refusal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":""}"#)
            .create_async()
            .await;

        let handler = JsonRpcHandler::new(&config(server.url())).unwrap();
        let tx = handler.send_commit_transaction(&context(), &[], &[1]).await;
        assert_eq!(assert_ok!(tx), None);
    }

    #[tokio::test]
    async fn test_rpc_error_is_chain_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"boom"}}"#)
            .create_async()
            .await;

        let handler = JsonRpcHandler::new(&config(server.url())).unwrap();
        assert_err!(handler.get_transaction_result("0xtx").await);
    }

    #[tokio::test]
    async fn test_transaction_statuses() {
        let mut server = mockito::Server::new_async().await;
        for (tx, status) in [("0x1", "pending"), ("0x2", "mined"), ("0x3", "notExist"), ("0x4", "failed")] {
            server
                .mock("POST", "/")
                .match_body(Matcher::PartialJson(json!({ "params": [tx] })))
                .with_body(format!(r#"{{"jsonrpc":"2.0","id":1,"result":"{}"}}"#, status))
                .create_async()
                .await;
        }

        let handler = JsonRpcHandler::new(&config(server.url())).unwrap();
        assert_eq!(handler.get_transaction_result("0x1").await.unwrap(), TransactionResult::Pending);
        assert_eq!(handler.get_transaction_result("0x2").await.unwrap(), TransactionResult::Success);
        assert_eq!(handler.get_transaction_result("0x3").await.unwrap(), TransactionResult::NotExist);
        assert_eq!(handler.get_transaction_result("0x4").await.unwrap(), TransactionResult::Fail);
    }
}
