//! Bike rental domain module.
//!
//! Events published by the rental write side, the bike status read-model
//! record folded from them, and the names of the queries it answers.

pub mod events;
pub mod queries;
pub mod status;

pub use events::{
    BikeInUse, BikeRegistered, BikeRequested, BikeReturned, RentalEvent, RequestRejected,
};
pub use queries::{BikeStatusNamedQueries, CountOfBikesByTypeQuery};
pub use status::{BikeStatus, RentalStatus};
