//! Events, projections and live query updates.
//!
//! Storage-agnostic contracts shared by the processing infrastructure and
//! the domain crates:
//! - `Event` / `EventEnvelope`: the unit read from the event log
//! - `Projection` / `HandlerRegistry`: read-model builders keyed by event type,
//!   staging each batch in a `ProjectionBatch` until it is committed
//! - `QueryUpdateHub`: fan-out of read-model updates to live subscribers

pub mod envelope;
pub mod event;
pub mod handler;
pub mod projection;
pub mod query_hub;
pub mod subscription;

pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::HandlerRegistry;
pub use projection::{Projection, ProjectionBatch, ProjectionError, ReplayStatus};
pub use query_hub::QueryUpdateHub;
pub use subscription::{QuerySubscription, SubscriptionId, SubscriptionQuery};
