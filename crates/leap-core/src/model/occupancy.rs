use serde::{Deserialize, Serialize};

/// Aggregated state of an occupancy group, as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OccupancyStatus {
    Occupied,
    Unoccupied,
    #[default]
    Unknown,
}

/// A logical grouping of occupancy sensors whose aggregated state is
/// reported as one value. On processor bridges these are synthesized
/// per area from the occupancy-sensor devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyGroup {
    pub id: u32,
    pub status: OccupancyStatus,
    pub sensor_ids: Vec<u32>,
    pub associated_area_id: Option<u32>,
}

impl OccupancyGroup {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            status: OccupancyStatus::Unknown,
            sensor_ids: Vec::new(),
            associated_area_id: None,
        }
    }
}
