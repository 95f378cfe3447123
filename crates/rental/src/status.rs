use serde::{Deserialize, Serialize};

/// Rental state of a bike.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalStatus {
    Available,
    Requested,
    Rented,
}

/// Read-model record: current status of one bike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BikeStatus {
    pub bike_id: String,
    pub bike_type: String,
    pub location: String,
    pub renter: Option<String>,
    pub status: RentalStatus,
}

impl BikeStatus {
    pub fn new(
        bike_id: impl Into<String>,
        bike_type: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            bike_id: bike_id.into(),
            bike_type: bike_type.into(),
            location: location.into(),
            renter: None,
            status: RentalStatus::Available,
        }
    }

    pub fn requested_by(&mut self, renter: impl Into<String>) {
        self.renter = Some(renter.into());
        self.status = RentalStatus::Requested;
    }

    pub fn rented_by(&mut self, renter: impl Into<String>) {
        self.renter = Some(renter.into());
        self.status = RentalStatus::Rented;
    }

    pub fn returned_at(&mut self, location: impl Into<String>) {
        self.location = location.into();
        self.renter = None;
        self.status = RentalStatus::Available;
    }

    /// Human-readable description, e.g. "Requested by alice".
    pub fn description(&self) -> String {
        match (&self.status, &self.renter) {
            (RentalStatus::Requested, Some(r)) => format!("Requested by {r}"),
            (RentalStatus::Rented, Some(r)) => format!("Rented by {r}"),
            _ => format!("Available at {}", self.location),
        }
    }
}
