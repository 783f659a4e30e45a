//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus HTTP endpoint and recorder initialization

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test};

/// Emit an internal event as a metric.
///
/// ```ignore
/// use drift_core::emit;
/// use drift_core::metrics::events::TasksPublished;
///
/// emit!(TasksPublished { count: 1, queue: "load_senzing_q".into() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
