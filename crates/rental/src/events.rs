use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pedalstream_core::{DomainError, DomainResult};
use pedalstream_events::Event;

/// Aggregate type of every rental event stream.
pub const BIKE_AGGREGATE: &str = "rental.bike";

/// Event: a bike was added to the fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BikeRegistered {
    pub bike_id: String,
    pub bike_type: String,
    pub location: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a renter asked for a bike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BikeRequested {
    pub bike_id: String,
    pub renter: String,
    pub rental_reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the renter picked the bike up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BikeInUse {
    pub bike_id: String,
    pub renter: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the bike was returned at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BikeReturned {
    pub bike_id: String,
    pub location: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: a pending rental request was turned down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRejected {
    pub bike_id: String,
    pub rental_reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RentalEvent {
    BikeRegistered(BikeRegistered),
    BikeRequested(BikeRequested),
    BikeInUse(BikeInUse),
    BikeReturned(BikeReturned),
    RequestRejected(RequestRejected),
}

impl RentalEvent {
    pub const REGISTERED: &'static str = "rental.bike.registered";
    pub const REQUESTED: &'static str = "rental.bike.requested";
    pub const IN_USE: &'static str = "rental.bike.in_use";
    pub const RETURNED: &'static str = "rental.bike.returned";
    pub const REJECTED: &'static str = "rental.request.rejected";

    /// Every tag a rental event can carry.
    pub const ALL_TYPES: &'static [&'static str] = &[
        Self::REGISTERED,
        Self::REQUESTED,
        Self::IN_USE,
        Self::RETURNED,
        Self::REJECTED,
    ];

    pub fn bike_id(&self) -> &str {
        match self {
            RentalEvent::BikeRegistered(e) => &e.bike_id,
            RentalEvent::BikeRequested(e) => &e.bike_id,
            RentalEvent::BikeInUse(e) => &e.bike_id,
            RentalEvent::BikeReturned(e) => &e.bike_id,
            RentalEvent::RequestRejected(e) => &e.bike_id,
        }
    }

    /// Reject events that cannot be routed to a segment.
    pub fn validate(&self) -> DomainResult<()> {
        if self.bike_id().trim().is_empty() {
            return Err(DomainError::validation("bike_id must not be empty"));
        }
        Ok(())
    }
}

impl Event for RentalEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RentalEvent::BikeRegistered(_) => Self::REGISTERED,
            RentalEvent::BikeRequested(_) => Self::REQUESTED,
            RentalEvent::BikeInUse(_) => Self::IN_USE,
            RentalEvent::BikeReturned(_) => Self::RETURNED,
            RentalEvent::RequestRejected(_) => Self::REJECTED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RentalEvent::BikeRegistered(e) => e.occurred_at,
            RentalEvent::BikeRequested(e) => e.occurred_at,
            RentalEvent::BikeInUse(e) => e.occurred_at,
            RentalEvent::BikeReturned(e) => e.occurred_at,
            RentalEvent::RequestRejected(e) => e.occurred_at,
        }
    }

    fn partition_key(&self) -> &str {
        self.bike_id()
    }
}
