#![forbid(unsafe_code)]
//! Request/response and notification RPC over Redis pub/sub channels.
//!
//! Clients invoke named methods on servers identified only by a logical
//! channel name; neither side knows the other's network address. Many
//! clients and many server instances can share one channel.
//!
//! ## Wire model
//! - Requests publish on `{prefix}:request:{channel}`; any server
//!   subscribed there may pick them up.
//! - Each client owns one response channel
//!   (`{prefix}:response:{host}:{pid}:{token}`) and multiplexes all of its
//!   in-flight requests over it, correlated by request id. The pending slot
//!   is registered before the request is published, so a reply can never
//!   outrun its waiter.
//! - Notifications carry an empty response channel and produce no reply,
//!   not even for handler failures.
//! - Delivery is at-most-once: no retries, no ordering across requests. A
//!   lost message, a server restart mid-handler, or a vanished reply all
//!   surface as a client-side [`RpcError::Timeout`].
//!
//! ## Surfaces
//! - [`RpcClient`]: [`send_request`](RpcClient::send_request) (typed via
//!   [`coerce_result`]), [`send_request_raw`](RpcClient::send_request_raw),
//!   `_with` variants adding a deadline and a
//!   [`CancellationToken`](tokio_util::sync::CancellationToken), and
//!   [`send_notification`](RpcClient::send_notification).
//! - [`RpcServer`]: [`register_handler`](RpcServer::register_handler) plus
//!   [`start_listening`](RpcServer::start_listening); inbound requests
//!   dispatch to [`Handler`] implementations on their own tasks, throttled
//!   by a permit pool of [`RpcOptions::max_concurrent_requests`].
//! - [`PubSubTransport`]: the transport seam. [`RedisTransport`] is the
//!   Redis-backed implementation; it reconnects transparently and restores
//!   subscriptions after connection loss.
//! - [`RpcOptions`]: endpoint, deadlines, permit-pool size, channel
//!   prefix; loadable from a TOML `[rpc]` table via
//!   [`RpcOptions::from_config_file`].
//!
//! ```rust,no_run
//! use redis_rpc::{RpcClient, RpcOptions};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RpcClient::connect(RpcOptions::default()).await?;
//! let sum: i64 = client
//!     .send_request("calculator", "Add", json!({ "a": 10, "b": 5 }))
//!     .await?;
//! assert_eq!(sum, 15);
//! client.shutdown().await;
//! # Ok(()) }
//! ```
//!
//! Failure responses travel as `{ code, message, details?, stackTrace? }`
//! records with stable integer codes and come back to the caller as typed
//! [`RpcError`] variants. Stack traces are transmitted only when
//! [`RpcOptions::include_stack_trace_in_errors`] is set.

mod channels;
mod client;
mod config;
mod envelope;
mod error;
mod handler;
mod registry;
mod server;
mod transport;

pub use channels::{request_channel, response_channel, DEFAULT_CHANNEL_PREFIX};
pub use client::RpcClient;
pub use config::{ConfigError, RpcOptions};
pub use envelope::{coerce_result, Request, Response};
pub use error::{
    ErrorInfo, RpcError, CODE_CONNECTION_ERROR, CODE_INTERNAL_ERROR, CODE_INVALID_PARAMETERS,
    CODE_METHOD_NOT_FOUND, CODE_SERIALIZATION_ERROR, CODE_TIMEOUT, CODE_UNKNOWN,
};
pub use handler::Handler;
pub use registry::{CorrelationRegistry, PendingReceiver};
pub use server::RpcServer;
pub use transport::{MessageHandler, PubSubTransport, RedisTransport};

#[cfg(test)]
mod tests;
