//! In-process broker.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

use super::{Broker, Delivery, QueueOptions, Subscription};
use crate::error::BrokerError;

#[derive(Default)]
struct QueueState {
    declared: bool,
    options: QueueOptions,
    ready: VecDeque<Vec<u8>>,
    unacked: HashMap<u64, Vec<u8>>,
    notify: Arc<Notify>,
    /// Upcoming publishes to fail, each with its error message.
    publish_failures: VecDeque<String>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    closed: bool,
}

/// A broker living in process memory.
///
/// Queues are FIFO; priority is recorded but not applied. Cloning shares the
/// underlying queues.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Queue state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` publishes to `queue` fail.
    pub fn fail_publishes(&self, queue: &str, count: usize, message: &str) {
        let mut state = self.lock();
        let q = state.queues.entry(queue.to_string()).or_default();
        q.publish_failures
            .extend(std::iter::repeat_n(message.to_string(), count));
    }

    /// Messages waiting in `queue`, oldest first.
    pub fn ready(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every waiting message in `queue`.
    #[cfg(test)]
    pub fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|q| q.ready.drain(..).collect())
            .unwrap_or_default()
    }

    /// Number of deliveries handed out on `queue` and not yet acknowledged.
    pub fn unacked(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, |q| q.unacked.len())
    }

    pub fn options(&self, queue: &str) -> Option<QueueOptions> {
        self.lock().queues.get(queue).map(|q| q.options.clone())
    }

    /// Reject every further operation and wake waiting subscribers.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        for q in state.queues.values() {
            q.notify.notify_waiters();
            q.notify.notify_one();
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, name: &str, options: &QueueOptions) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        match state.queues.get_mut(name) {
            Some(q) if q.declared && q.options != *options => Err(BrokerError::QueueMismatch {
                queue: name.to_string(),
            }),
            Some(q) => {
                q.declared = true;
                q.options = options.clone();
                Ok(())
            }
            None => {
                state.queues.insert(
                    name.to_string(),
                    QueueState {
                        declared: true,
                        options: options.clone(),
                        ..Default::default()
                    },
                );
                debug!(queue = name, ?options, "Queue declared");
                Ok(())
            }
        }
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), BrokerError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue {
                queue: queue.to_string(),
            })?;
        if let Some(message) = q.publish_failures.pop_front() {
            return Err(BrokerError::Unavailable {
                queue: queue.to_string(),
                message,
            });
        }
        q.ready.push_back(body);
        q.notify.notify_one();
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        let state = self.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue {
                queue: queue.to_string(),
            });
        }
        Ok(Box::new(MemorySubscription {
            broker: self.clone(),
            queue: queue.to_string(),
            prefetch: prefetch.max(1),
            outstanding: HashSet::new(),
        }))
    }
}

struct MemorySubscription {
    broker: MemoryBroker,
    queue: String,
    prefetch: u16,
    outstanding: HashSet<u64>,
}

impl MemorySubscription {
    /// Pop a ready message, or hand back the queue's notifier to wait on.
    fn try_take(&mut self) -> Result<Result<Delivery, Arc<Notify>>, BrokerError> {
        let mut state = self.broker.lock();
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let tag = state.next_tag + 1;
        let q = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| BrokerError::UnknownQueue {
                queue: self.queue.clone(),
            })?;

        let Some(body) = q.ready.pop_front() else {
            return Ok(Err(Arc::clone(&q.notify)));
        };
        q.unacked.insert(tag, body.clone());
        state.next_tag = tag;
        self.outstanding.insert(tag);

        Ok(Ok(Delivery {
            tag,
            queue: self.queue.clone(),
            body,
        }))
    }
}

impl Drop for MemorySubscription {
    /// Unacknowledged deliveries go back to the head of the queue.
    fn drop(&mut self) {
        if self.outstanding.is_empty() {
            return;
        }
        let mut tags: Vec<u64> = self.outstanding.drain().collect();
        tags.sort_unstable();

        let mut state = self.broker.lock();
        let Some(q) = state.queues.get_mut(&self.queue) else {
            return;
        };
        for tag in tags.into_iter().rev() {
            if let Some(body) = q.unacked.remove(&tag) {
                q.ready.push_front(body);
            }
        }
        q.notify.notify_one();
        debug!(queue = %self.queue, ready = q.ready.len(), "Returned unacknowledged deliveries");
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Result<Delivery, BrokerError> {
        if self.outstanding.len() >= usize::from(self.prefetch) {
            return Err(BrokerError::PrefetchExhausted {
                queue: self.queue.clone(),
                prefetch: self.prefetch,
            });
        }
        loop {
            match self.try_take()? {
                Ok(delivery) => return Ok(delivery),
                Err(notify) => notify.notified().await,
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        if !self.outstanding.remove(&delivery.tag) {
            return Err(BrokerError::UnknownDelivery {
                queue: self.queue.clone(),
                tag: delivery.tag,
            });
        }
        let mut state = self.broker.lock();
        if let Some(q) = state.queues.get_mut(&self.queue) {
            q.unacked.remove(&delivery.tag);
        }
        Ok(())
    }
}
