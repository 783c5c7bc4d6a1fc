//! # polyload-rpc
//!
//! The [`ChainApi`] trait every other crate talks to, and its JSON-RPC
//! implementation over a single WebSocket connection.
//!
//! - [`api`]: `ChainApi`, [`Subscription`]
//! - [`ws`]: connection, request/response correlation, subscription routing
//! - [`client`]: [`RpcClient`], the `ChainApi` implementation
//! - [`events`]: pluggable `System.Events` decoding
//! - [`jsonrpc`]: wire framing

pub mod api;
pub mod client;
pub mod events;
pub mod jsonrpc;
pub mod ws;

pub use api::{CancelFn, ChainApi, Subscription};
pub use client::RpcClient;
pub use events::{EventDecoder, JsonEventDecoder};
pub use ws::WsClient;
