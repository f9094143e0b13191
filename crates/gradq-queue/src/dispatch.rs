//! Producer side: publish task messages onto the durable tasks queue.

use async_trait::async_trait;
use gradq_core::{TaskKind, TaskMessage, TaskPayload};
use lapin::options::{
    BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrokerConfig;

pub const CONTENT_TYPE: &str = "application/json";
const PERSISTENT: u8 = 2;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("could not connect to broker: {0}")]
    Connect(#[source] lapin::Error),
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("could not encode task message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("broker refused the message")]
    Nacked,
}

#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn publish(&self, message: TaskMessage) -> Result<(), DispatchError>;

    async fn enqueue(&self, kind: TaskKind, payload: TaskPayload) -> Result<(), DispatchError> {
        self.publish(TaskMessage::new(kind, payload)).await
    }
}

/// Declare the durable exchange, queue, and binding. Safe to repeat.
pub async fn declare_topology(channel: &Channel, config: &BrokerConfig) -> Result<(), lapin::Error> {
    channel
        .exchange_declare(
            &config.exchange,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_declare(
            &config.queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    channel
        .queue_bind(
            &config.queue,
            &config.exchange,
            &config.routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Connection options that drive lapin's I/O from the ambient tokio runtime.
/// Must be called from inside that runtime.
pub fn connection_properties() -> ConnectionProperties {
    ConnectionProperties::default()
        .with_executor(tokio_executor_trait::Tokio::current())
        .with_reactor(tokio_reactor_trait::Tokio)
}

/// Persistent JSON message properties, stamped with a fresh message id.
pub fn message_properties(message: &TaskMessage) -> BasicProperties {
    let mut props = BasicProperties::default()
        .with_delivery_mode(PERSISTENT)
        .with_content_type(ShortString::from(CONTENT_TYPE))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()));

    if let Some(ts) = message.ts {
        props = props.with_timestamp(ts.timestamp().max(0) as u64);
    }

    if !message.headers.is_empty() {
        let mut headers = FieldTable::default();
        for (key, value) in &message.headers {
            headers.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }
        props = props.with_headers(headers);
    }
    props
}

/// Publishes over a fresh connection per message; the connection is always closed.
#[derive(Debug, Clone)]
pub struct AmqpDispatcher {
    config: BrokerConfig,
}

impl AmqpDispatcher {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    async fn publish_on(&self, conn: &Connection, message: &TaskMessage) -> Result<(), DispatchError> {
        let body = message.encode()?;
        let channel = conn.create_channel().await?;
        declare_topology(&channel, &self.config).await?;
        channel.confirm_select(ConfirmSelectOptions::default()).await?;

        let confirmation = channel
            .basic_publish(
                &self.config.exchange,
                &self.config.routing_key,
                BasicPublishOptions::default(),
                &body,
                message_properties(message),
            )
            .await?
            .await?;
        if confirmation.is_nack() {
            return Err(DispatchError::Nacked);
        }
        Ok(())
    }
}

#[async_trait]
impl TaskDispatcher for AmqpDispatcher {
    async fn publish(&self, message: TaskMessage) -> Result<(), DispatchError> {
        let conn = Connection::connect(&self.config.url, connection_properties())
            .await
            .map_err(DispatchError::Connect)?;

        let result = self.publish_on(&conn, &message).await;
        if let Err(err) = conn.close(200, "publish complete").await {
            debug!(error = %err, "closing publisher connection failed");
        }

        match &result {
            Ok(()) => info!(kind = %message.kind, "task enqueued"),
            Err(err) => warn!(kind = %message.kind, error = %err, "task publish failed"),
        }
        result
    }
}
