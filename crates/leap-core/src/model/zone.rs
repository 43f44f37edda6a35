use serde::{Deserialize, Serialize};

/// An output channel attached to a device. The zone map is the reverse
/// edge of `Device::zone_id`, used to route zone statuses back to the
/// owning device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: u32,
    pub device_id: u32,
}
