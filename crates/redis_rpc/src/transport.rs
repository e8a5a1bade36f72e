use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tracing::{debug, warn};

use crate::{config::RpcOptions, error::RpcError};

/// Callback invoked for each message on a subscribed channel.
///
/// Handlers run inline on the transport's reader task and must not block;
/// anything heavier than completing a slot belongs on a spawned task.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Capability layer over a pub/sub primitive.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publishes `payload` on `channel`; completes once the transport has
    /// accepted the message. No retry on failure.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), RpcError>;

    /// Installs `handler` for messages on `channel`; completes once the
    /// subscription is active.
    ///
    /// A channel carries at most one handler: subscribing to a channel that
    /// already has one replaces the previous handler.
    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<(), RpcError>;

    /// Removes the handler for `channel`; completes when quiescent.
    async fn unsubscribe(&self, channel: &str) -> Result<(), RpcError>;
}

enum SubscriberCommand {
    Subscribe {
        channel: String,
        done: oneshot::Sender<Result<(), RpcError>>,
    },
    Unsubscribe {
        channel: String,
        done: oneshot::Sender<Result<(), RpcError>>,
    },
}

type HandlerTable = Arc<Mutex<HashMap<String, MessageHandler>>>;

fn lock_handlers(handlers: &HandlerTable) -> MutexGuard<'_, HashMap<String, MessageHandler>> {
    handlers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Redis-backed transport: a managed connection for publishes and one
/// dedicated pub/sub connection driven by a background reader task.
///
/// The managed connection reconnects transparently. The reader task
/// re-establishes the pub/sub connection on loss and re-subscribes every
/// channel in the handler table, so subscriptions survive reconnects;
/// messages published while disconnected are gone, per the at-most-once
/// contract.
pub struct RedisTransport {
    publisher: ConnectionManager,
    handlers: HandlerTable,
    commands: mpsc::UnboundedSender<SubscriberCommand>,
    reader: JoinHandle<()>,
}

impl RedisTransport {
    /// Connects both the publisher and subscriber halves to the endpoint in
    /// `options`.
    pub async fn connect(options: &RpcOptions) -> Result<Self, RpcError> {
        let client = redis::Client::open(options.redis_url()).map_err(connection_error)?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(connection_error)?;

        let handlers: HandlerTable = Arc::new(Mutex::new(HashMap::new()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(reader_task(client, Arc::clone(&handlers), command_rx));

        Ok(Self {
            publisher,
            handlers,
            commands: command_tx,
            reader,
        })
    }

    async fn send_command(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), RpcError>>) -> SubscriberCommand,
    ) -> Result<(), RpcError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(make(done_tx)).is_err() {
            return Err(RpcError::Connection(
                "subscriber task is no longer running".to_string(),
            ));
        }
        match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Connection(
                "subscriber task is no longer running".to_string(),
            )),
        }
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), RpcError> {
        let mut conn = self.publisher.clone();
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(connection_error)?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str, handler: MessageHandler) -> Result<(), RpcError> {
        // The handler must be routable before the subscription goes active;
        // the first message can arrive while `subscribe` is still in flight.
        lock_handlers(&self.handlers).insert(channel.to_string(), handler);

        let channel_name = channel.to_string();
        let result = self
            .send_command(|done| SubscriberCommand::Subscribe {
                channel: channel_name,
                done,
            })
            .await;
        if result.is_err() {
            lock_handlers(&self.handlers).remove(channel);
        }
        result
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), RpcError> {
        let channel_name = channel.to_string();
        let result = self
            .send_command(|done| SubscriberCommand::Unsubscribe {
                channel: channel_name,
                done,
            })
            .await;
        lock_handlers(&self.handlers).remove(channel);
        result
    }
}

impl Drop for RedisTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn reader_task(
    client: redis::Client,
    handlers: HandlerTable,
    mut commands: mpsc::UnboundedReceiver<SubscriberCommand>,
) {
    let mut backoff = Duration::from_millis(50);
    loop {
        let pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(err) => {
                warn!("pub/sub connect failed: {err}");
                reject_queued_commands(&mut commands, &err);
                time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
                continue;
            }
        };
        let (mut sink, mut stream) = pubsub.split();

        // Restore subscriptions that predate this connection.
        let channels: Vec<String> = lock_handlers(&handlers).keys().cloned().collect();
        let mut restored = true;
        for channel in channels {
            if let Err(err) = sink.subscribe(&channel).await {
                warn!("re-subscribe of `{channel}` failed: {err}");
                restored = false;
                break;
            }
        }
        if !restored {
            time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(5));
            continue;
        }
        backoff = Duration::from_millis(50);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SubscriberCommand::Subscribe { channel, done }) => {
                        let result = sink.subscribe(&channel).await.map_err(connection_error);
                        let _ = done.send(result);
                    }
                    Some(SubscriberCommand::Unsubscribe { channel, done }) => {
                        let result = sink.unsubscribe(&channel).await.map_err(connection_error);
                        let _ = done.send(result);
                    }
                    // Transport dropped; nothing left to serve.
                    None => return,
                },
                message = stream.next() => match message {
                    Some(message) => {
                        let channel = message.get_channel_name().to_string();
                        let handler = lock_handlers(&handlers).get(&channel).cloned();
                        match handler {
                            Some(handler) => handler(&channel, message.get_payload_bytes()),
                            None => debug!("dropping message on unhandled channel `{channel}`"),
                        }
                    }
                    None => {
                        warn!("pub/sub connection lost; reconnecting");
                        break;
                    }
                },
            }
        }
    }
}

fn reject_queued_commands(
    commands: &mut mpsc::UnboundedReceiver<SubscriberCommand>,
    err: &redis::RedisError,
) {
    while let Ok(command) = commands.try_recv() {
        let done = match command {
            SubscriberCommand::Subscribe { done, .. }
            | SubscriberCommand::Unsubscribe { done, .. } => done,
        };
        let _ = done.send(Err(RpcError::Connection(err.to_string())));
    }
}

fn connection_error(err: redis::RedisError) -> RpcError {
    RpcError::Connection(err.to_string())
}
