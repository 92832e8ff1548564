use crate::nats::channel::{ChannelError, MessageStream, PushTransport};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Push channel configuration
#[derive(Clone, Debug, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_url")]
    pub url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Upper bound the binary puts on a single `connect` call
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,
    #[serde(default = "default_reconnect_delays")]
    pub reconnect_delays_seconds: Vec<u64>,
    /// 0 = keep trying forever
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_push_url() -> String {
    std::env::var("HERDWATCH_PUSH_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

fn default_topic() -> String {
    "lora.data".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delays() -> Vec<u64> {
    vec![1, 2, 5, 10]
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            url: default_push_url(),
            topic: default_topic(),
            connect_timeout_seconds: default_connect_timeout(),
            auto_reconnect: default_auto_reconnect(),
            reconnect_delays_seconds: default_reconnect_delays(),
            max_reconnect_attempts: 0,
        }
    }
}

/// Push transport backed by a core NATS connection
pub struct NatsTransport {
    url: String,
    client: Mutex<Option<async_nats::Client>>,
}

impl NatsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PushTransport for NatsTransport {
    async fn connect(&self) -> Result<(), ChannelError> {
        info!("Connecting to NATS at {}", self.url);

        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or(ChannelError::NotConnected)?;

        let subscriber = client
            .subscribe(topic.to_string())
            .await
            .map_err(|e| ChannelError::SubscribeFailed(e.to_string()))?;

        debug!(topic = %topic, "Subscribed to NATS subject");

        Ok(Box::pin(subscriber.map(|message| {
            String::from_utf8_lossy(&message.payload).into_owned()
        })))
    }

    async fn close(&self) {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.flush().await {
                debug!(error = %e, "Flush before close failed");
            }
        }
    }
}
