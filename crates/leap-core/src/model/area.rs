use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::occupancy::OccupancyStatus;

/// A room or grouping in the bridge topology. Areas form a tree rooted
/// at the bridge's root area; an area whose parent is the root project
/// is a top-level area (`parent_id: None`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Area {
    pub id: u32,
    pub name: String,
    pub parent_id: Option<u32>,
    pub children: BTreeSet<u32>,
    pub control_station_ids: Vec<u32>,
    pub sensor_ids: Vec<u32>,
    pub occupancy_group_id: Option<u32>,
    /// Mirrors the status of the associated occupancy group, when any.
    pub occupancy: OccupancyStatus,
}

impl Area {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id: None,
            children: BTreeSet::new(),
            control_station_ids: Vec::new(),
            sensor_ids: Vec::new(),
            occupancy_group_id: None,
            occupancy: OccupancyStatus::Unknown,
        }
    }
}
