//! Work-queue abstraction.
//!
//! Publishing is fire-and-forget; consumption goes through a subscription
//! with a bounded prefetch window and explicit acknowledgement.

mod memory;
mod task;

pub use memory::MemoryBroker;
pub use task::TaskEnvelope;

use async_trait::async_trait;

use crate::error::BrokerError;

/// Arguments used when declaring a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    /// `x-max-priority`, 1 to 6.
    pub max_priority: Option<u8>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            max_priority: None,
        }
    }
}

/// A message handed out by a subscription and not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub queue: String,
    pub body: Vec<u8>,
}

/// A message broker holding named queues.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Redeclaring with identical options is a no-op.
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), BrokerError>;

    /// Append `body` to `queue`.
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), BrokerError>;

    /// Start consuming `queue` with at most `prefetch` unacknowledged deliveries.
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BrokerError>;
}

/// A consumer's view of one queue.
///
/// Deliveries still unacknowledged when the subscription is dropped return
/// to the queue.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message.
    async fn next(&mut self) -> Result<Delivery, BrokerError>;

    /// Remove an outstanding delivery from the queue for good.
    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}
