//! Read-model projections.

pub mod bike_status;

pub use bike_status::BikeStatusProjection;
