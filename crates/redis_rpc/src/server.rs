use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, PoisonError, RwLock,
    },
    time::Duration,
};

use serde_json::{json, Value};
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore},
    task::JoinError,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    channels::request_channel,
    config::RpcOptions,
    envelope::{Request, Response},
    error::RpcError,
    handler::Handler,
    transport::{MessageHandler, PubSubTransport, RedisTransport},
};

/// RPC servicer: dispatches inbound requests on a set of logical channels
/// to registered [`Handler`]s under a concurrency cap.
///
/// The transport callback never blocks: each inbound message is handed to
/// its own task, and that task's permit acquisition is where backpressure
/// takes effect.
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    transport: Arc<dyn PubSubTransport>,
    options: RpcOptions,
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
    listening: Mutex<HashSet<String>>,
    permits: Arc<Semaphore>,
    disposed: AtomicBool,
    shutdown: CancellationToken,
}

impl RpcServer {
    /// Connects a server to the Redis endpoint in `options`.
    pub async fn connect(options: RpcOptions) -> Result<Self, RpcError> {
        let transport = RedisTransport::connect(&options).await?;
        Ok(Self::with_transport(Arc::new(transport), options))
    }

    /// Builds a server on an existing transport.
    pub fn with_transport(transport: Arc<dyn PubSubTransport>, options: RpcOptions) -> Self {
        let permits = Arc::new(Semaphore::new(options.max_concurrent_requests));
        Self {
            inner: Arc::new(ServerInner {
                transport,
                options,
                handlers: RwLock::new(HashMap::new()),
                listening: Mutex::new(HashSet::new()),
                permits,
                disposed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Installs `handler` for every method it claims.
    ///
    /// Method lookup is case-insensitive; re-registering a method replaces
    /// the previous handler.
    pub fn register_handler(&self, handler: Arc<dyn Handler>) {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for method in handler.supported_methods() {
            handlers.insert(method.to_lowercase(), Arc::clone(&handler));
        }
    }

    /// Subscribes to the request channel of every logical channel not yet
    /// listened on.
    ///
    /// A channel that fails to subscribe is left out of the listening set
    /// and the failure is returned; channels subscribed before the failure
    /// stay active.
    pub async fn start_listening<I, S>(&self, channels: I) -> Result<(), RpcError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(RpcError::Disposed);
        }

        let mut listening = self.inner.listening.lock().await;
        for channel in channels {
            let channel = channel.as_ref();
            if channel.trim().is_empty() {
                return Err(RpcError::EmptyChannel);
            }
            if listening.contains(channel) {
                continue;
            }

            let subscription = request_channel(&self.inner.options.channel_prefix, channel);
            let handler = ServerInner::dispatch_handler(Arc::clone(&self.inner));
            self.inner.transport.subscribe(&subscription, handler).await?;
            listening.insert(channel.to_string());
        }
        Ok(())
    }

    /// Unsubscribes every listened channel and clears the set.
    pub async fn stop_listening(&self) {
        let mut listening = self.inner.listening.lock().await;
        for channel in listening.drain() {
            let subscription = request_channel(&self.inner.options.channel_prefix, &channel);
            if let Err(err) = self.inner.transport.unsubscribe(&subscription).await {
                debug!("unsubscribe of `{subscription}` failed: {err}");
            }
        }
    }

    /// Logical channels currently listened on, sorted.
    pub async fn listening_channels(&self) -> Vec<String> {
        let listening = self.inner.listening.lock().await;
        let mut channels: Vec<String> = listening.iter().cloned().collect();
        channels.sort();
        channels
    }

    /// Stops listening, signals in-flight handlers to cancel, and closes
    /// the permit pool.
    pub async fn shutdown(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_listening().await;
        self.inner.shutdown.cancel();
        self.inner.permits.close();
    }
}

impl ServerInner {
    fn dispatch_handler(inner: Arc<ServerInner>) -> MessageHandler {
        Arc::new(move |_channel, payload| {
            let inner = Arc::clone(&inner);
            let payload = payload.to_vec();
            // The transport callback must not block its dispatch loop; all
            // work, including waiting for a permit, happens on an
            // independently scheduled task.
            tokio::spawn(async move { inner.dispatch(payload).await });
        })
    }

    async fn dispatch(&self, payload: Vec<u8>) {
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            // Pool closed: the server is shutting down.
            Err(_closed) => return,
        };

        let request = match Request::from_bytes(&payload) {
            Ok(request) => request,
            Err(err) => {
                self.reply_to_undecodable(&payload, err).await;
                return;
            }
        };

        let response = self.invoke(&request, permit).await;

        if request.is_notification() {
            if let Some(error) = response.error.as_ref() {
                warn!(
                    method = %request.method,
                    "notification handler failed: {}", error.message
                );
            }
            return;
        }

        let outgoing = match response.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to encode response: {err}");
                return;
            }
        };
        if let Err(err) = self.transport.publish(&request.response_channel, outgoing).await {
            // Nowhere to report a failed response publish.
            warn!(
                channel = %request.response_channel,
                "failed to publish response: {err}"
            );
        }
    }

    async fn invoke(&self, request: &Request, permit: OwnedSemaphorePermit) -> Response {
        let include_stack = self.options.include_stack_trace_in_errors;
        let handler = {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            handlers.get(&request.method.to_lowercase()).cloned()
        };
        let Some(handler) = handler else {
            let err = RpcError::MethodNotFound {
                method: request.method.clone(),
            };
            return Response::failure(&request.id, err.to_error_info(include_stack));
        };

        let deadline = self.effective_deadline(request);
        let cancel = self.shutdown.child_token();
        let invocation = {
            let handler = Arc::clone(&handler);
            let method = request.method.clone();
            let params = request.parameters.clone();
            let cancel = cancel.clone();
            // The permit rides with the invocation, not the dispatch task: a
            // handler that outlives the deadline keeps its permit until it
            // actually stops, so the concurrency cap counts running handlers.
            tokio::spawn(async move {
                let _permit = permit;
                handler.handle(&method, params, cancel).await
            })
        };

        let outcome = tokio::select! {
            joined = invocation => match joined {
                Ok(result) => result,
                Err(join_error) => Err(panic_to_error(join_error, include_stack)),
            },
            _ = time::sleep(deadline) => {
                // Cooperative handlers observe the token and stop; a late
                // completion is discarded either way.
                cancel.cancel();
                Err(RpcError::Timeout {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        };

        match outcome {
            Ok(result) => Response::success(&request.id, result),
            Err(err) => Response::failure(&request.id, err.to_error_info(include_stack)),
        }
    }

    /// Server deadline for one request: the configured default, tightened
    /// by the request's advisory `timeoutMs` when that is smaller.
    fn effective_deadline(&self, request: &Request) -> Duration {
        let default = self.options.default_timeout;
        match request.timeout_ms {
            Some(advisory) if Duration::from_millis(advisory) < default => {
                Duration::from_millis(advisory)
            }
            _ => default,
        }
    }

    /// A request that fails to decode still gets a serialization-error
    /// reply when its response channel can be recovered from the raw JSON;
    /// otherwise it is dropped with a log.
    async fn reply_to_undecodable(&self, payload: &[u8], err: RpcError) {
        let recovered = serde_json::from_slice::<Value>(payload)
            .ok()
            .and_then(|value| {
                value
                    .get("responseChannel")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .filter(|channel| !channel.is_empty());
        let Some(channel) = recovered else {
            warn!("dropping undecodable request: {err}");
            return;
        };

        let include_stack = self.options.include_stack_trace_in_errors;
        let response = Response::failure("", err.to_error_info(include_stack));
        match response.to_bytes() {
            Ok(bytes) => {
                if let Err(publish_err) = self.transport.publish(&channel, bytes).await {
                    warn!("failed to publish serialization-error response: {publish_err}");
                }
            }
            Err(encode_err) => {
                warn!("failed to encode serialization-error response: {encode_err}");
            }
        }
    }
}

fn panic_to_error(join_error: JoinError, include_stack_trace: bool) -> RpcError {
    let (message, kind) = if join_error.is_panic() {
        let payload = join_error.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "handler panicked".to_string());
        (message, "panic")
    } else {
        ("handler task was cancelled".to_string(), "cancelled")
    };
    RpcError::Internal {
        message,
        details: Some(json!({ "type": kind })),
        stack_trace: include_stack_trace
            .then(|| std::backtrace::Backtrace::force_capture().to_string()),
    }
}
