use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::Mutex, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    channels::{request_channel, response_channel},
    config::RpcOptions,
    envelope::{coerce_result, Request, Response},
    error::RpcError,
    registry::CorrelationRegistry,
    transport::{MessageHandler, PubSubTransport, RedisTransport},
};

/// RPC caller: multiplexes any number of in-flight requests over one shared
/// response channel, correlated by request id.
///
/// The response channel name is fixed at construction and reused for the
/// client's lifetime; its subscription is installed lazily by the first
/// request. Notifications require no subscription at all.
pub struct RpcClient {
    transport: Arc<dyn PubSubTransport>,
    options: RpcOptions,
    response_channel: String,
    registry: Arc<CorrelationRegistry>,
    subscription_gate: Mutex<()>,
    listening: AtomicBool,
    disposed: AtomicBool,
}

impl RpcClient {
    /// Connects a client to the Redis endpoint in `options`.
    pub async fn connect(options: RpcOptions) -> Result<Self, RpcError> {
        let transport = RedisTransport::connect(&options).await?;
        Ok(Self::with_transport(Arc::new(transport), options))
    }

    /// Builds a client on an existing transport.
    pub fn with_transport(transport: Arc<dyn PubSubTransport>, options: RpcOptions) -> Self {
        let response_channel = response_channel(&options.channel_prefix);
        Self {
            transport,
            options,
            response_channel,
            registry: Arc::new(CorrelationRegistry::new()),
            subscription_gate: Mutex::new(()),
            listening: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// The channel this client receives responses on.
    pub fn response_channel(&self) -> &str {
        &self.response_channel
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.registry.len()
    }

    /// Sends `method` to `channel` and coerces the result into `T`.
    pub async fn send_request<T: DeserializeOwned>(
        &self,
        channel: &str,
        method: &str,
        parameters: Value,
    ) -> Result<T, RpcError> {
        self.send_request_with(channel, method, parameters, None, None)
            .await
    }

    /// Typed request with an explicit deadline and/or cancellation.
    pub async fn send_request_with<T: DeserializeOwned>(
        &self,
        channel: &str,
        method: &str,
        parameters: Value,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<T, RpcError> {
        let raw = self
            .send_request_raw_with(channel, method, parameters, timeout, cancel)
            .await?;
        coerce_result(raw)
    }

    /// Sends `method` to `channel` and returns the raw JSON result.
    pub async fn send_request_raw(
        &self,
        channel: &str,
        method: &str,
        parameters: Value,
    ) -> Result<Value, RpcError> {
        self.send_request_raw_with(channel, method, parameters, None, None)
            .await
    }

    /// Raw request with an explicit deadline and/or cancellation.
    pub async fn send_request_raw_with(
        &self,
        channel: &str,
        method: &str,
        parameters: Value,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<Value, RpcError> {
        self.check_arguments(channel, method)?;
        self.ensure_subscribed().await?;

        let timeout = timeout.unwrap_or(self.options.default_timeout);
        let timeout_ms = timeout.as_millis() as u64;
        let request = Request::new(
            method,
            parameters,
            self.response_channel.clone(),
            Some(timeout_ms),
        );
        let id = request.id.clone();

        // Register before publishing: a server replying synchronously must
        // always find the slot.
        let slot = self.registry.register(&id)?;

        let published = match request.to_bytes() {
            Ok(payload) => {
                self.transport
                    .publish(
                        &request_channel(&self.options.channel_prefix, channel),
                        payload,
                    )
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = published {
            self.registry.remove(&id);
            return Err(err);
        }

        let cancel = cancel.unwrap_or_default();
        let outcome = tokio::select! {
            resolved = time::timeout(timeout, slot) => match resolved {
                Ok(Ok(resolution)) => resolution,
                Ok(Err(_closed)) => {
                    Err(RpcError::Connection("pending slot dropped".to_string()))
                }
                Err(_elapsed) => Err(RpcError::Timeout { timeout_ms }),
            },
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
        };
        self.registry.remove(&id);

        let response = outcome?;
        if response.success {
            Ok(response.result)
        } else {
            match response.error {
                Some(info) => Err(RpcError::from_error_info(info, method)),
                None => Err(RpcError::Unknown {
                    message: "failure response carried no error record".to_string(),
                }),
            }
        }
    }

    /// Publishes a fire-and-forget notification: no correlation entry, no
    /// response, returns once the transport has accepted the message.
    pub async fn send_notification(
        &self,
        channel: &str,
        method: &str,
        parameters: Value,
    ) -> Result<(), RpcError> {
        self.send_notification_with(channel, method, parameters, None)
            .await
    }

    /// Notification with an explicit cancellation.
    pub async fn send_notification_with(
        &self,
        channel: &str,
        method: &str,
        parameters: Value,
        cancel: Option<CancellationToken>,
    ) -> Result<(), RpcError> {
        self.check_arguments(channel, method)?;

        let request = Request::notification(method, parameters);
        let payload = request.to_bytes()?;
        let channel_name = request_channel(&self.options.channel_prefix, channel);
        let publish = self.transport.publish(&channel_name, payload);
        match cancel {
            Some(cancel) => tokio::select! {
                result = publish => result,
                _ = cancel.cancelled() => Err(RpcError::Cancelled),
            },
            None => publish.await,
        }
    }

    /// Rejects new calls, fails every outstanding one with a disposed
    /// error, and releases the response subscription.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.registry.cancel_all(|| RpcError::Disposed);
        if self.listening.load(Ordering::SeqCst) {
            if let Err(err) = self.transport.unsubscribe(&self.response_channel).await {
                debug!("unsubscribe during shutdown failed: {err}");
            }
        }
    }

    fn check_arguments(&self, channel: &str, method: &str) -> Result<(), RpcError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RpcError::Disposed);
        }
        if channel.trim().is_empty() {
            return Err(RpcError::EmptyChannel);
        }
        if method.trim().is_empty() {
            return Err(RpcError::EmptyMethod);
        }
        Ok(())
    }

    async fn ensure_subscribed(&self) -> Result<(), RpcError> {
        if self.listening.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _gate = self.subscription_gate.lock().await;
        if self.listening.load(Ordering::SeqCst) {
            return Ok(());
        }

        let registry = Arc::clone(&self.registry);
        let handler: MessageHandler = Arc::new(move |_channel, payload| {
            match Response::from_bytes(payload) {
                Ok(response) => {
                    let id = response.id.clone();
                    if !registry.complete(&id, response) {
                        debug!("dropping response for unknown request id `{id}`");
                    }
                }
                // One bad message must not poison the channel.
                Err(err) => warn!("discarding undecodable response: {err}"),
            }
        });
        self.transport
            .subscribe(&self.response_channel, handler)
            .await?;
        self.listening.store(true, Ordering::SeqCst);
        Ok(())
    }
}
