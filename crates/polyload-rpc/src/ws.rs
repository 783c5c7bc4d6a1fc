//! # WebSocket transport
//!
//! One connection, one background I/O task. Callers never touch the socket:
//! they send a command over an mpsc channel and wait on a oneshot for the
//! answer.
//!
//! ```text
//!   caller ──Command──▶ ┌─────────┐ ──text frame──▶ node
//!                       │ I/O task│
//!   caller ◀─oneshot─── └────┬────┘ ◀─response / notification── node
//!                            │
//!   Subscription ◀── sink ───┘  (routed by subscription id)
//! ```
//!
//! Subscription sinks are registered by the I/O task itself when it
//! processes the subscribe response, so notifications that follow the
//! response in the same read burst are never lost. Notifications for a
//! subscription id with no sink are dropped. A subscribe reply that arrives
//! after its caller gave up is cancelled on the node right away.
//!
//! When the connection closes, every pending oneshot and every sink is
//! dropped: outstanding requests resolve as `ConnectionFailed` and open
//! subscriptions end.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use polyload_types::{PolyloadError, Result};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::api::{CancelFn, Subscription};
use crate::jsonrpc::{self, ErrorObject, Incoming, Request};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Delivers one notification payload; returns `false` once the receiving
/// side is gone.
type Sink = Box<dyn FnMut(Value) -> bool + Send>;

enum Command {
    Call {
        id: u64,
        method: String,
        params: Value,
        reply: oneshot::Sender<Result<Value>>,
    },
    Subscribe {
        id: u64,
        method: String,
        params: Value,
        unsubscribe: &'static str,
        sink: Sink,
        reply: oneshot::Sender<Result<String>>,
    },
    DropSink {
        subscription: String,
    },
}

enum Pending {
    Call {
        method: String,
        reply: oneshot::Sender<Result<Value>>,
    },
    Subscribe {
        method: String,
        unsubscribe: &'static str,
        sink: Sink,
        reply: oneshot::Sender<Result<String>>,
    },
}

/// A subscription the node opened for a caller that is no longer waiting.
struct Orphan {
    subscription: String,
    unsubscribe: &'static str,
}

struct Inner {
    endpoint: String,
    commands: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
    request_timeout: Option<Duration>,
}

impl Inner {
    fn closed(&self) -> PolyloadError {
        PolyloadError::ConnectionFailed {
            endpoint: self.endpoint.clone(),
            reason: "connection closed".into(),
        }
    }

    async fn await_reply<T>(&self, method: &str, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| PolyloadError::RequestTimeout {
                    method: method.to_string(),
                })?,
            None => rx.await,
        };
        outcome.map_err(|_| self.closed())?
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let (reply, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.commands
            .send(Command::Call {
                id,
                method: method.to_string(),
                params,
                reply,
            })
            .map_err(|_| self.closed())?;
        self.await_reply(method, rx).await
    }
}

/// JSON-RPC client over a single WebSocket connection.
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsClient")
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

impl WsClient {
    /// Connect to `endpoint` and spawn the I/O task.
    pub async fn connect(endpoint: &str, request_timeout: Option<Duration>) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| PolyloadError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(PolyloadError::InvalidEndpoint(format!(
                "{endpoint}: unsupported scheme {}",
                url.scheme()
            )));
        }
        let (stream, _) =
            connect_async(url.as_str())
                .await
                .map_err(|e| PolyloadError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
        info!(endpoint = %url, "connected to node");

        let (commands, mailbox) = mpsc::unbounded_channel();
        let next_id = Arc::new(AtomicU64::new(1));
        tokio::spawn(run_io(
            stream,
            mailbox,
            Arc::clone(&next_id),
            endpoint.to_string(),
        ));

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.to_string(),
                commands,
                next_id,
                request_timeout,
            }),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Issue one request and decode its result.
    pub async fn request<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        let value = self.inner.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| PolyloadError::UnexpectedResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Open a subscription. `unsubscribe_method` is called with the
    /// subscription id when the handle is cancelled.
    pub async fn subscribe<T>(
        &self,
        method: &str,
        params: Value,
        unsubscribe_method: &'static str,
    ) -> Result<Subscription<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let item_method = method.to_string();
        let sink: Sink = Box::new(move |value: Value| {
            let item = serde_json::from_value::<T>(value).map_err(|e| {
                PolyloadError::UnexpectedResponse {
                    method: item_method.clone(),
                    reason: e.to_string(),
                }
            });
            tx.send(item).is_ok()
        });

        let (reply, reply_rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .commands
            .send(Command::Subscribe {
                id,
                method: method.to_string(),
                params,
                unsubscribe: unsubscribe_method,
                sink,
                reply,
            })
            .map_err(|_| self.inner.closed())?;
        let subscription = self.inner.await_reply(method, reply_rx).await?;
        debug!(%method, %subscription, "subscribed");

        let inner = Arc::clone(&self.inner);
        let sub_id = subscription.clone();
        let cancel: CancelFn = Box::new(move || {
            Box::pin(async move {
                // Stop routing first so late notifications are discarded.
                let _ = inner.commands.send(Command::DropSink {
                    subscription: sub_id.clone(),
                });
                inner.call(unsubscribe_method, json!([sub_id])).await?;
                Ok(())
            })
        });
        Ok(Subscription::new(subscription, rx, cancel))
    }
}

fn rpc_error(method: String, err: ErrorObject) -> PolyloadError {
    let message = match err.data {
        Some(Value::String(data)) => format!("{}: {data}", err.message),
        Some(data) => format!("{}: {data}", err.message),
        None => err.message,
    };
    PolyloadError::Rpc {
        method,
        code: err.code,
        message,
    }
}

async fn run_io(
    stream: WsStream,
    mut mailbox: mpsc::UnboundedReceiver<Command>,
    next_id: Arc<AtomicU64>,
    endpoint: String,
) {
    let (mut write, mut read) = stream.split();
    let mut pending: HashMap<u64, Pending> = HashMap::new();
    let mut sinks: HashMap<String, Sink> = HashMap::new();

    loop {
        tokio::select! {
            command = mailbox.recv() => {
                let Some(command) = command else {
                    debug!(%endpoint, "client dropped, closing connection");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                };
                let (id, method, params, entry) = match command {
                    Command::Call { id, method, params, reply } => {
                        let entry = Pending::Call { method: method.clone(), reply };
                        (id, method, params, entry)
                    }
                    Command::Subscribe { id, method, params, unsubscribe, sink, reply } => {
                        let entry = Pending::Subscribe {
                            method: method.clone(),
                            unsubscribe,
                            sink,
                            reply,
                        };
                        (id, method, params, entry)
                    }
                    Command::DropSink { subscription } => {
                        sinks.remove(&subscription);
                        continue;
                    }
                };
                let text = match serde_json::to_string(&Request::new(id, &method, &params)) {
                    Ok(text) => text,
                    Err(e) => {
                        fail(entry, PolyloadError::Serialization(e.to_string()));
                        continue;
                    }
                };
                trace!(%method, id, "-> request");
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(%endpoint, error = %e, "websocket write failed");
                    fail(entry, PolyloadError::ConnectionFailed {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    });
                    break;
                }
                pending.insert(id, entry);
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Some(orphan) = dispatch(&text, &mut pending, &mut sinks) else {
                            continue;
                        };
                        let id = next_id.fetch_add(1, Ordering::Relaxed);
                        let params = json!([orphan.subscription]);
                        let request = Request::new(id, orphan.unsubscribe, &params);
                        match serde_json::to_string(&request) {
                            Ok(text) => {
                                if let Err(e) = write.send(Message::Text(text)).await {
                                    warn!(%endpoint, error = %e, "websocket write failed");
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "could not encode unsubscribe"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%endpoint, "websocket connection closed by node");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%endpoint, error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        }
    }
    debug!(
        %endpoint,
        pending = pending.len(),
        subscriptions = sinks.len(),
        "I/O task exiting"
    );
}

fn fail(entry: Pending, err: PolyloadError) {
    match entry {
        Pending::Call { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        Pending::Subscribe { reply, .. } => {
            let _ = reply.send(Err(err));
        }
    }
}

/// Route one frame. Returns the subscription to cancel when a subscribe
/// reply found its caller gone.
fn dispatch(
    text: &str,
    pending: &mut HashMap<u64, Pending>,
    sinks: &mut HashMap<String, Sink>,
) -> Option<Orphan> {
    let incoming = match jsonrpc::classify(text) {
        Ok(incoming) => incoming,
        Err(reason) => {
            warn!(%reason, "ignoring malformed frame");
            return None;
        }
    };
    match incoming {
        Incoming::Response { id, result } => match pending.remove(&id) {
            Some(Pending::Call { method, reply }) => {
                let _ = reply.send(result.map_err(|e| rpc_error(method, e)));
            }
            Some(Pending::Subscribe {
                method,
                unsubscribe,
                sink,
                reply,
            }) => match result {
                Ok(id_value) => {
                    let key = jsonrpc::subscription_key(&id_value);
                    sinks.insert(key.clone(), sink);
                    if let Err(Ok(key)) = reply.send(Ok(key)) {
                        debug!(%method, subscription = %key, "subscriber gone, cancelling");
                        sinks.remove(&key);
                        return Some(Orphan {
                            subscription: key,
                            unsubscribe,
                        });
                    }
                }
                Err(e) => {
                    let _ = reply.send(Err(rpc_error(method, e)));
                }
            },
            None => debug!(id, "response for unknown request"),
        },
        Incoming::Notification {
            method,
            subscription,
            result,
        } => {
            let delivered = sinks.get_mut(&subscription).map(|sink| sink(result));
            match delivered {
                Some(true) => trace!(%method, %subscription, "<- notification"),
                Some(false) => {
                    sinks.remove(&subscription);
                }
                None => debug!(%method, %subscription, "notification for unknown subscription"),
            }
        }
    }
    None
}
