//! In-process publish/subscribe event bus for the campaign core.
//!
//! The store announces every mutation on the bus; grids, charts, the
//! controller and any other view subscribe to the topics they care about.
//! Publishers and subscribers never hold references to each other.
//!
//! # Usage
//!
//! ```
//! use campaign_events::{EventBus, SubscriberError};
//! use campaign_types::{Event, Topic};
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe(
//!     Topic::DataLoaded,
//!     |event: &Event| {
//!         if let Event::DataLoaded { count, .. } = event {
//!             println!("{count} records loaded");
//!         }
//!         Ok::<(), SubscriberError>(())
//!     },
//!     Some("example"),
//! );
//!
//! let report = bus.publish(&Event::DataLoaded { count: 3, version: 1 });
//! assert_eq!(report.delivered, 1);
//! assert!(sub.unsubscribe());
//! ```

pub mod bus;

pub use bus::{BusStats, Callback, EventBus, PublishRecord, PublishReport, Subscription};

/// Failure reported by a subscriber callback.
///
/// The bus logs it and moves on to the next subscriber; it never reaches
/// the publisher.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SubscriberError {
    /// Human-readable description of what went wrong.
    pub message: String,
}

impl SubscriberError {
    /// Create an error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
