//! [`ChainApi`] over JSON-RPC.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use polyload_types::{
    AccountId, Block, BlockHash, ClientConfig, EventRecord, ExtrinsicHash, Header, PolyloadError,
    Result, SignedBlock, TransactionStatus, constants,
};
use serde_json::json;

use crate::api::{ChainApi, Subscription};
use crate::events::{EventDecoder, JsonEventDecoder};
use crate::ws::WsClient;

/// A node reached over WebSocket.
#[derive(Clone)]
pub struct RpcClient {
    ws: WsClient,
    decoder: Arc<dyn EventDecoder>,
}

impl RpcClient {
    /// Connect using the endpoint and timeout from `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let ws = WsClient::connect(
            &config.endpoint,
            config.request_timeout_ms.map(Duration::from_millis),
        )
        .await?;
        Ok(Self::new(ws))
    }

    #[must_use]
    pub fn new(ws: WsClient) -> Self {
        Self {
            ws,
            decoder: Arc::new(JsonEventDecoder),
        }
    }

    /// Replace the `System.Events` decoder.
    #[must_use]
    pub fn with_event_decoder(mut self, decoder: Arc<dyn EventDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    #[must_use]
    pub fn transport(&self) -> &WsClient {
        &self.ws
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient").field("ws", &self.ws).finish_non_exhaustive()
    }
}

#[async_trait]
impl ChainApi for RpcClient {
    async fn account_next_index(&self, account: &AccountId) -> Result<u64> {
        self.ws
            .request("system_accountNextIndex", json!([account.to_hex()]))
            .await
    }

    async fn submit_extrinsic(&self, extrinsic_hex: &str) -> Result<ExtrinsicHash> {
        self.ws
            .request("author_submitExtrinsic", json!([extrinsic_hex]))
            .await
            .map_err(into_submission_error)
    }

    async fn submit_and_watch(&self, extrinsic_hex: &str) -> Result<Subscription<TransactionStatus>> {
        self.ws
            .subscribe(
                "author_submitAndWatchExtrinsic",
                json!([extrinsic_hex]),
                "author_unwatchExtrinsic",
            )
            .await
            .map_err(into_submission_error)
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>> {
        self.ws
            .subscribe("chain_subscribeNewHeads", json!([]), "chain_unsubscribeNewHeads")
            .await
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>> {
        self.ws.request("chain_getBlockHash", json!([number])).await
    }

    async fn block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        let signed: Option<SignedBlock> = self
            .ws
            .request("chain_getBlock", json!([hash.to_hex()]))
            .await?;
        Ok(signed.map(|s| s.block))
    }

    async fn block_events(&self, hash: &BlockHash) -> Result<Vec<EventRecord>> {
        let raw: Option<String> = self
            .ws
            .request(
                "state_getStorage",
                json!([constants::SYSTEM_EVENTS_STORAGE_KEY, hash.to_hex()]),
            )
            .await?;
        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        let bytes = hex::decode(raw.strip_prefix("0x").unwrap_or(&raw)).map_err(|e| {
            PolyloadError::UnexpectedResponse {
                method: "state_getStorage".into(),
                reason: e.to_string(),
            }
        })?;
        self.decoder.decode(&bytes)
    }

    async fn pending_extrinsics(&self) -> Result<Vec<String>> {
        self.ws.request("author_pendingExtrinsics", json!([])).await
    }
}

/// Pool rejections arrive as JSON-RPC errors; surface them as submission
/// failures.
fn into_submission_error(err: PolyloadError) -> PolyloadError {
    match err {
        PolyloadError::Rpc { code, message, .. } => PolyloadError::Submission {
            reason: format!("{code}: {message}"),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_errors_become_submission_errors() {
        let err = into_submission_error(PolyloadError::Rpc {
            method: "author_submitExtrinsic".into(),
            code: 1014,
            message: "Priority is too low".into(),
        });
        assert!(matches!(err, PolyloadError::Submission { ref reason } if reason.contains("1014")));
        let err = into_submission_error(PolyloadError::RequestTimeout {
            method: "x".into(),
        });
        assert!(matches!(err, PolyloadError::RequestTimeout { .. }));
    }
}
