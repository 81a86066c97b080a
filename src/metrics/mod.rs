//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus HTTP server and initialization

pub mod events;
pub mod server;

pub use server::{MetricsHandle, init};

/// Emit an internal event.
///
/// Calls `InternalEvent::emit()` on the event, which records the
/// corresponding Prometheus metric.
///
/// ```ignore
/// use cnpjlake::metrics::events::BytesWritten;
///
/// emit!(BytesWritten { bytes: 1024 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
