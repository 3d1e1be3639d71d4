//! Override topic subscription.

use dynpool_core::config::RegistryConfig;
use dynpool_core::listener::OverrideSource;
use dynpool_core::registry::RegistryError;
use dynpool_types::{PoolConfig, RegistryKey};
use fred::clients::SubscriberClient;
use fred::prelude::*;
use fred::types::Message;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::DbError;
use crate::redis::client_builder;

/// Decode one override payload.
///
/// # Errors
///
/// Returns [`DbError::Serialization`] if `payload` is not a JSON pool record.
pub fn decode_override(payload: &str) -> Result<PoolConfig, DbError> {
    Ok(serde_json::from_str(payload)?)
}

/// [`OverrideSource`] fed by `DYNAMIC_THREAD_POOL_REDIS_TOPIC`.
///
/// The connection re-subscribes by itself after a reconnect.
pub struct RedisOverrideSource {
    subscriber: SubscriberClient,
    messages: broadcast::Receiver<Message>,
    resubscribe: JoinHandle<()>,
}

impl RedisOverrideSource {
    /// Open a dedicated subscriber connection and subscribe to the topic.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Redis`] if connecting or subscribing fails.
    pub async fn subscribe(settings: &RegistryConfig) -> Result<Self, DbError> {
        let topic = RegistryKey::DynamicThreadPoolTopic.as_str();
        let subscriber = client_builder(settings)?.build_subscriber_client()?;
        subscriber.init().await?;

        let messages = subscriber.message_rx();
        let resubscribe = subscriber.manage_subscriptions();
        subscriber.subscribe(topic).await?;

        info!(topic, "Subscribed to {}", RegistryKey::DynamicThreadPoolTopic.description());
        Ok(Self {
            subscriber,
            messages,
            resubscribe,
        })
    }

    /// Unsubscribe and close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Redis`] if the connection cannot be closed cleanly.
    pub async fn close(self) -> Result<(), DbError> {
        self.resubscribe.abort();
        self.subscriber.quit().await?;
        Ok(())
    }
}

impl OverrideSource for RedisOverrideSource {
    async fn next_override(&mut self) -> Option<Result<PoolConfig, RegistryError>> {
        let topic = RegistryKey::DynamicThreadPoolTopic.as_str();
        loop {
            match self.messages.recv().await {
                Ok(message) => {
                    if &*message.channel != topic {
                        continue;
                    }
                    let decoded = message
                        .value
                        .convert::<String>()
                        .map_err(DbError::from)
                        .and_then(|payload| decode_override(&payload));
                    return Some(decoded.map_err(RegistryError::from));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "override subscriber lagged, messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
