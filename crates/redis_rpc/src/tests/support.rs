use super::*;

use std::{
    collections::HashMap,
    sync::{atomic::AtomicUsize, Mutex},
};

use async_trait::async_trait;

/// In-memory pub/sub fabric standing in for Redis: a publish delivers
/// synchronously to the channel's handler, and every publish is recorded
/// for inspection. Matches the trait contract of one handler per channel,
/// replaced on re-subscribe.
pub(super) struct InMemoryTransport {
    subscriptions: Mutex<HashMap<String, MessageHandler>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryTransport {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
        })
    }

    pub(super) fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }

    pub(super) fn publishes_to(&self, channel: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == channel)
            .count()
    }

    pub(super) fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }

    pub(super) fn published_channels(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl PubSubTransport for InMemoryTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), RpcError> {
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), payload.clone()));
        let handler = self.subscriptions.lock().unwrap().get(channel).cloned();
        if let Some(handler) = handler {
            handler(channel, &payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<(), RpcError> {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(channel.to_string(), handler);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), RpcError> {
        self.subscriptions.lock().unwrap().remove(channel);
        Ok(())
    }
}

/// Arithmetic handler backing the end-to-end scenarios.
pub(super) struct CalculatorHandler;

#[async_trait]
impl Handler for CalculatorHandler {
    fn supported_methods(&self) -> Vec<String> {
        ["Add", "Divide", "Echo", "Sleepy", "Panicky"]
            .iter()
            .map(|name| name.to_string())
            .collect()
    }

    async fn handle(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        match method {
            "Add" => {
                let (a, b) = operands(&params)?;
                Ok(json!(a + b))
            }
            "Divide" => {
                let (a, b) = operands(&params)?;
                if b == 0 {
                    return Err(RpcError::invalid_parameters(
                        "Division by zero is not allowed",
                        json!({ "dividend": a, "divisor": b }),
                    ));
                }
                Ok(json!(a / b))
            }
            "Echo" => Ok(params),
            "Sleepy" => {
                let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(30_000);
                tokio::select! {
                    _ = time::sleep(Duration::from_millis(ms)) => Ok(json!("done")),
                    _ = cancel.cancelled() => Err(RpcError::Cancelled),
                }
            }
            "Panicky" => panic!("handler exploded"),
            other => Err(RpcError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }
}

fn operands(params: &Value) -> Result<(i64, i64), RpcError> {
    let a = params.get("a").and_then(Value::as_i64);
    let b = params.get("b").and_then(Value::as_i64);
    match (a, b) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(RpcError::invalid_parameters(
            "expected numeric fields `a` and `b`",
            None,
        )),
    }
}

/// Tracks the high-water mark of simultaneous invocations.
pub(super) struct GateHandler {
    pub(super) in_flight: AtomicUsize,
    pub(super) high_water: AtomicUsize,
}

impl GateHandler {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Handler for GateHandler {
    fn supported_methods(&self) -> Vec<String> {
        vec!["Gate".to_string()]
    }

    // Ignores the cancellation token on purpose: sleeps for the requested
    // `ms` (default 10) no matter what, so tests can model handlers that
    // outlive the server deadline.
    async fn handle(
        &self,
        _method: &str,
        params: Value,
        _cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(10);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        time::sleep(Duration::from_millis(ms)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(params)
    }
}

/// Records every invocation; fails when asked to.
pub(super) struct RecordingHandler {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingHandler {
    pub(super) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }

    pub(super) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    fn supported_methods(&self) -> Vec<String> {
        vec!["LogActivity".to_string(), "FailLoudly".to_string()]
    }

    async fn handle(
        &self,
        method: &str,
        params: Value,
        _cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        if method == "FailLoudly" {
            return Err(RpcError::internal("asked to fail"));
        }
        Ok(Value::Null)
    }
}

/// Answers every supported method with a fixed value.
pub(super) struct ConstHandler {
    pub(super) methods: Vec<String>,
    pub(super) reply: Value,
}

#[async_trait]
impl Handler for ConstHandler {
    fn supported_methods(&self) -> Vec<String> {
        self.methods.clone()
    }

    async fn handle(
        &self,
        _method: &str,
        _params: Value,
        _cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        Ok(self.reply.clone())
    }
}

/// Server + client pair wired over one in-memory transport, with the
/// calculator listening on the `calculator` channel.
pub(super) async fn calculator_fixture() -> (Arc<InMemoryTransport>, RpcServer, RpcClient) {
    calculator_fixture_with(RpcOptions::default()).await
}

pub(super) async fn calculator_fixture_with(
    options: RpcOptions,
) -> (Arc<InMemoryTransport>, RpcServer, RpcClient) {
    let transport = InMemoryTransport::new();
    let server = RpcServer::with_transport(transport.clone(), options.clone());
    server.register_handler(Arc::new(CalculatorHandler));
    server
        .start_listening(["calculator"])
        .await
        .expect("subscribe should succeed on the in-memory transport");
    let client = RpcClient::with_transport(transport.clone(), options);
    (transport, server, client)
}

/// Polls `condition` until it holds or a generous deadline passes.
pub(super) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
