use crate::nats::client::PushConfig;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Raw payloads in transport order
pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Callback invoked once per received payload, on the dispatch task
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Opaque publish/subscribe primitive underneath the channel manager.
///
/// A subscription stream ending means the connection was lost.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<(), ChannelError>;
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError>;
    async fn close(&self);
}

/// Push channel errors
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelError {
    ConnectionFailed(String),
    ConnectionLost(String),
    NotConnected,
    SubscribeFailed(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::ConnectionFailed(e) => write!(f, "connection failed: {}", e),
            ChannelError::ConnectionLost(e) => write!(f, "connection lost: {}", e),
            ChannelError::NotConnected => write!(f, "not connected"),
            ChannelError::SubscribeFailed(e) => write!(f, "subscribe failed: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Lifecycle of the live-event subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    config: PushConfig,
    state_tx: watch::Sender<ChannelState>,
    errors_tx: broadcast::Sender<ChannelError>,
    /// Registered (topic, handler); re-subscribed after every connect
    subscription: Mutex<Option<(String, MessageHandler)>>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn set_state(&self, state: ChannelState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = ?previous, to = ?state, "Push channel state changed");
        }
    }

    fn state(&self) -> ChannelState {
        *self.state_tx.borrow()
    }

    fn registered(&self) -> Option<(String, MessageHandler)> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Owns the live-event subscription: connect, subscribe, dispatch,
/// reconnect and disconnect.
///
/// Messages reach the handler in transport order, one at a time, on a
/// background task. No de-duplication or replay happens here.
#[derive(Clone)]
pub struct PushChannelManager {
    inner: Arc<Inner>,
}

impl PushChannelManager {
    pub fn new(transport: Arc<dyn PushTransport>, config: PushConfig) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let (errors_tx, _) = broadcast::channel(16);

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state_tx,
                errors_tx,
                subscription: Mutex::new(None),
                dispatcher: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Connect to the transport and re-subscribe any registered handler.
    ///
    /// Failure (connect or subscribe) leaves the channel `Disconnected` and
    /// is not retried here; callers bound the call with their own timeout.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let registered = self.inner.registered().is_some();
        match self.inner.state() {
            ChannelState::Subscribed => return Ok(()),
            ChannelState::Connected if !registered => return Ok(()),
            // Connected but the earlier subscribe failed: only subscribe again
            ChannelState::Connected => {}
            ChannelState::Disconnected | ChannelState::Connecting => {
                self.inner.set_state(ChannelState::Connecting);
                if let Err(e) = self.inner.transport.connect().await {
                    self.inner.set_state(ChannelState::Disconnected);
                    error!(error = %e, "Push channel connect failed");
                    return Err(e);
                }
                self.inner.set_state(ChannelState::Connected);
            }
        }

        if registered {
            if let Err(e) = start_dispatch(&self.inner).await {
                // Start over on the next connect
                self.inner.transport.close().await;
                self.inner.set_state(ChannelState::Disconnected);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Register `handler` for `topic`.
    ///
    /// Subscribes immediately when connected, otherwise on the next
    /// successful `connect`. Replaces any previous registration.
    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: MessageHandler,
    ) -> Result<(), ChannelError> {
        let topic = topic.into();
        info!(topic = %topic, "Registering live event handler");
        *self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some((topic, handler));

        if matches!(
            self.inner.state(),
            ChannelState::Connected | ChannelState::Subscribed
        ) {
            start_dispatch(&self.inner).await?;
        }
        Ok(())
    }

    /// Release the connection and drop the registration. Idempotent.
    pub async fn disconnect(&self) {
        let dispatcher = self.inner.dispatcher.lock().await.take();
        if let Some(handle) = dispatcher {
            handle.abort();
            let _ = handle.await;
        }
        self.inner
            .subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        // The transport may still hold a client after the stream ended
        self.inner.transport.close().await;
        self.inner.set_state(ChannelState::Disconnected);
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.inner.state_tx.subscribe()
    }

    /// Asynchronous channel failures (connection lost, reconnect failures)
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ChannelError> {
        self.inner.errors_tx.subscribe()
    }

    pub fn topic(&self) -> &str {
        &self.inner.config.topic
    }
}

/// Subscribe the registered handler and spawn its dispatch task
async fn start_dispatch(inner: &Arc<Inner>) -> Result<(), ChannelError> {
    let Some((topic, handler)) = inner.registered() else {
        return Ok(());
    };

    let stream = inner.transport.subscribe(&topic).await.map_err(|e| {
        error!(topic = %topic, error = %e, "Subscribe failed");
        e
    })?;
    inner.set_state(ChannelState::Subscribed);

    let task = tokio::spawn(run_dispatch(Arc::clone(inner), topic, handler, stream));
    if let Some(previous) = inner.dispatcher.lock().await.replace(task) {
        previous.abort();
    }
    Ok(())
}

async fn run_dispatch(
    inner: Arc<Inner>,
    topic: String,
    handler: MessageHandler,
    mut stream: MessageStream,
) {
    loop {
        while let Some(payload) = stream.next().await {
            handler(payload);
        }

        warn!(topic = %topic, "Push channel stream ended, connection lost");
        inner.set_state(ChannelState::Disconnected);
        let _ = inner
            .errors_tx
            .send(ChannelError::ConnectionLost(format!("stream for '{}' ended", topic)));

        if !inner.config.auto_reconnect {
            return;
        }
        match reconnect(&inner, &topic).await {
            Some(next) => stream = next,
            None => return,
        }
    }
}

/// Retry connect + subscribe with the configured delays.
///
/// The last delay repeats once the list is exhausted. Gives up after
/// `max_reconnect_attempts` (0 = never).
async fn reconnect(inner: &Inner, topic: &str) -> Option<MessageStream> {
    let delays = &inner.config.reconnect_delays_seconds;
    let max_attempts = inner.config.max_reconnect_attempts;
    let mut attempt: u32 = 0;

    loop {
        if max_attempts > 0 && attempt >= max_attempts {
            error!(attempts = attempt, "Giving up on push channel reconnect");
            return None;
        }

        let delay = delays
            .get(attempt as usize)
            .or_else(|| delays.last())
            .copied()
            .unwrap_or(0);
        attempt += 1;

        debug!(attempt = attempt, delay_secs = delay, "Backing off before reconnect");
        tokio::time::sleep(Duration::from_secs(delay)).await;

        inner.set_state(ChannelState::Connecting);
        if let Err(e) = inner.transport.connect().await {
            inner.set_state(ChannelState::Disconnected);
            warn!(attempt = attempt, error = %e, "Reconnect attempt failed");
            let _ = inner.errors_tx.send(e);
            continue;
        }
        inner.set_state(ChannelState::Connected);

        match inner.transport.subscribe(topic).await {
            Ok(stream) => {
                inner.set_state(ChannelState::Subscribed);
                info!(attempt = attempt, topic = %topic, "Push channel reconnected");
                return Some(stream);
            }
            Err(e) => {
                inner.transport.close().await;
                inner.set_state(ChannelState::Disconnected);
                warn!(attempt = attempt, error = %e, "Resubscribe after reconnect failed");
                let _ = inner.errors_tx.send(e);
            }
        }
    }
}
