//! Worker loop: one delivery at a time, settled as ack or reject-without-requeue.

use anyhow::Context;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use gradq_ingest::{Disposition, TaskRouter};
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use lapin::Connection;
use tracing::{field, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::dispatch::{connection_properties, declare_topology, DispatchError};
use crate::retry::retry_fixed;

pub const CONSUMER_TAG: &str = "gradq-worker";

/// The broker-facing half of a delivery.
#[async_trait]
pub trait InboundDelivery: Send + Sync {
    fn body(&self) -> &[u8];
    fn delivery_tag(&self) -> u64;
    async fn ack(&self) -> anyhow::Result<()>;
    /// Negative acknowledgement that discards the message.
    async fn reject(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl InboundDelivery for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    async fn ack(&self) -> anyhow::Result<()> {
        self.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(&self) -> anyhow::Result<()> {
        self.acker
            .nack(BasicNackOptions {
                requeue: false,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

/// Connect to the broker, retrying per the configured policy.
pub async fn connect_with_retry(config: &BrokerConfig) -> Result<Connection, DispatchError> {
    retry_fixed(config.connect_policy(), "broker connect", |attempt| async move {
        info!(attempt, "connecting to broker");
        Connection::connect(&config.url, connection_properties())
            .await
            .map_err(DispatchError::Connect)
    })
    .await
}

/// Settle one delivery according to the router's verdict.
pub async fn handle_delivery<D: InboundDelivery>(router: &TaskRouter, delivery: &D) -> anyhow::Result<Disposition> {
    let span = info_span!(
        "task",
        run_id = %Uuid::new_v4(),
        kind = field::Empty,
        delivery_tag = delivery.delivery_tag(),
    );

    async {
        let disposition = router.process(delivery.body()).await;
        match disposition {
            Disposition::Ack => {
                delivery.ack().await.context("acking delivery")?;
                info!("acked");
            }
            Disposition::Reject => {
                delivery.reject().await.context("rejecting delivery")?;
                warn!("rejected without requeue");
            }
        }
        Ok(disposition)
    }
    .instrument(span)
    .await
}

/// Drain `deliveries` sequentially. The next delivery is not pulled until the
/// current one is settled. The stream ending is an error: a worker only stops
/// when the broker drops its consumer.
pub async fn consume<S, D, E>(router: &TaskRouter, mut deliveries: S) -> anyhow::Result<()>
where
    S: Stream<Item = Result<D, E>> + Unpin,
    D: InboundDelivery,
    E: std::error::Error + Send + Sync + 'static,
{
    while let Some(delivery) = deliveries.next().await {
        let delivery = delivery.context("consumer stream failed")?;
        handle_delivery(router, &delivery).await?;
    }
    anyhow::bail!("consumer stream closed by broker")
}

/// Run the worker until the broker closes the consumer, which is reported as an
/// error. Failure to connect within the retry policy is an error too.
pub async fn run_worker(config: &BrokerConfig, router: &TaskRouter) -> anyhow::Result<()> {
    let conn = connect_with_retry(config)
        .await
        .context("broker unreachable after retries")?;
    let channel = conn.create_channel().await.context("opening channel")?;
    declare_topology(&channel, config)
        .await
        .context("declaring broker topology")?;
    channel
        .basic_qos(1, BasicQosOptions::default())
        .await
        .context("setting prefetch")?;

    let consumer = channel
        .basic_consume(
            &config.queue,
            CONSUMER_TAG,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("starting consumer")?;
    info!(queue = %config.queue, "worker waiting for tasks");

    consume(router, consumer)
        .await
        .with_context(|| format!("consumer for {} stopped", config.queue))
}
