//! Wiring of broker, engine and workers from a [`Config`].

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use drift_core::{RunSummary, Worker, WorkerKey, run_workers};

use crate::alert::{AlertChannel, LogAlert, WebhookAlert};
use crate::config::Config;
use crate::consumer::{ConsumerSettings, ResolutionConsumer};
use crate::dlq::DeadLetterQueue;
use crate::engine::{ConfigStore, EngineLifecycle, ResolutionEngine};
use crate::error::{DriftError, WorkerError};
use crate::job::MappingJob;
use crate::publisher::{BackoffPolicy, ReliablePublisher, default_sender};
use crate::queue::Broker;
use crate::redo::RedoWorker;

/// Any worker the service runs.
pub enum ServiceWorker {
    Consumer(ResolutionConsumer),
    Redo(RedoWorker),
}

impl Worker for ServiceWorker {
    type Error = WorkerError;

    fn key(&self) -> &WorkerKey {
        match self {
            ServiceWorker::Consumer(worker) => worker.key(),
            ServiceWorker::Redo(worker) => worker.key(),
        }
    }

    async fn run(self) -> Result<(), WorkerError> {
        match self {
            ServiceWorker::Consumer(worker) => worker.run().await,
            ServiceWorker::Redo(worker) => worker.run().await,
        }
    }
}

/// Shared handles built once from configuration.
pub struct Service {
    config: Config,
    broker: Arc<dyn Broker>,
    lifecycle: Arc<EngineLifecycle>,
    dlq: Arc<DeadLetterQueue>,
    publisher: Arc<ReliablePublisher>,
    alert: Arc<dyn AlertChannel>,
}

impl Service {
    pub fn new(
        config: Config,
        broker: Arc<dyn Broker>,
        engine: Arc<dyn ResolutionEngine>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self, DriftError> {
        let mut lifecycle = EngineLifecycle::new(engine, store)
            .with_force_load(config.engine.force_load_config)
            .with_target(config.data_source.as_deref().unwrap_or("engine"));
        if let Some(path) = &config.engine.config_path {
            lifecycle = lifecycle.with_config_path(path);
        }

        let alert: Arc<dyn AlertChannel> = match &config.alert.webhook_url {
            Some(url) => Arc::new(WebhookAlert::new(
                url,
                Duration::from_secs(config.alert.timeout_secs),
            )?),
            None => Arc::new(LogAlert),
        };

        let dlq = Arc::new(DeadLetterQueue::new(
            broker.clone(),
            config.queue.dead_letter.clone(),
            config.consumer.daemon_name.clone(),
        ));
        let policy = BackoffPolicy {
            max_attempts: config.publisher.max_attempts,
            step: Duration::from_secs(config.publisher.backoff_step_secs),
        };
        let sender = config.publisher.sender.clone().unwrap_or_else(default_sender);
        let publisher = Arc::new(ReliablePublisher::new(
            broker.clone(),
            config.queue.primary.clone(),
            dlq.clone(),
            policy,
            sender,
        ));

        Ok(Self {
            config,
            broker,
            lifecycle: Arc::new(lifecycle),
            dlq,
            publisher,
            alert,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lifecycle(&self) -> &Arc<EngineLifecycle> {
        &self.lifecycle
    }

    pub fn publisher(&self) -> &Arc<ReliablePublisher> {
        &self.publisher
    }

    /// Declare the primary and dead-letter queues.
    pub async fn declare_queues(&self) -> Result<(), DriftError> {
        let options = self.config.queue.options();
        self.broker
            .declare_queue(&self.config.queue.primary, &options)
            .await?;
        self.broker
            .declare_queue(&self.config.queue.dead_letter, &options)
            .await?;
        Ok(())
    }

    pub fn mapping_job(&self) -> MappingJob {
        MappingJob::new(
            self.lifecycle.clone(),
            self.publisher.clone(),
            self.config.mapping.clone(),
        )
    }

    /// Consumer and redo workers, all stopping on `shutdown`.
    pub fn workers(&self, shutdown: CancellationToken) -> Vec<ServiceWorker> {
        let settings = ConsumerSettings {
            queue: self.config.queue.primary.clone(),
            prefetch: self.config.queue.prefetch,
            max_tries: self.config.consumer.max_tries,
            requeue_delay: self.config.consumer.requeue_delay(),
            daemon_name: self.config.consumer.daemon_name.clone(),
        };

        let consumers = (0..self.config.consumer.workers).map(|index| {
            ServiceWorker::Consumer(ResolutionConsumer::new(
                index,
                self.broker.clone(),
                self.lifecycle.clone(),
                self.publisher.clone(),
                self.dlq.clone(),
                self.alert.clone(),
                settings.clone(),
                shutdown.clone(),
            ))
        });

        let redo_count = if self.config.redo.enabled {
            self.config.redo.workers
        } else {
            0
        };
        let redo = (0..redo_count).map(|index| {
            ServiceWorker::Redo(RedoWorker::new(
                index,
                self.lifecycle.clone(),
                self.config.redo.idle_poll(),
                shutdown.clone(),
            ))
        });

        consumers.chain(redo).collect()
    }

    /// Bootstrap the engine, run every worker until shutdown, then save the
    /// engine configuration.
    pub async fn run(self, shutdown: CancellationToken) -> Result<RunSummary, DriftError> {
        self.declare_queues().await?;
        let recovery = self
            .lifecycle
            .bootstrap()
            .await
            .map_err(|source| WorkerError::Lifecycle { source })?;
        info!(?recovery, "Engine ready");

        let summary = run_workers(
            &self.config.metrics,
            &self.config.runtime,
            "worker",
            shutdown,
            |token| self.workers(token),
        )
        .await?;

        if let Err(e) = self.lifecycle.save_config().await {
            error!(error = %e, "Failed to save engine configuration");
        }
        self.dlq.finalize();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            panicked = summary.panicked,
            "Service stopped"
        );
        Ok(summary)
    }
}
