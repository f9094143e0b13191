//! RabbitMQ plumbing: topology, the task dispatcher, and the worker loop.

pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod retry;

pub use config::BrokerConfig;
pub use consumer::{connect_with_retry, consume, handle_delivery, run_worker, InboundDelivery};
pub use dispatch::{connection_properties, declare_topology, message_properties, AmqpDispatcher, DispatchError, TaskDispatcher};
pub use retry::{retry_fixed, RetryPolicy};

pub const CRATE_NAME: &str = "gradq-queue";
