use serde::{Deserialize, Serialize};

/// Names of the bike status queries (also the live-subscription identities).
pub struct BikeStatusNamedQueries;

impl BikeStatusNamedQueries {
    pub const FIND_ALL: &'static str = "findAll";
    pub const FIND_AVAILABLE: &'static str = "findAvailable";
    pub const FIND_ONE: &'static str = "findOne";
}

/// Typed query: number of bikes of a given type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountOfBikesByTypeQuery {
    pub bike_type: String,
}
