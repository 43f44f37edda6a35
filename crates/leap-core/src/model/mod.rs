// ── Bridge domain model ──
//
// Canonical representations of everything the bridge exposes. Entities
// refer to each other by numeric id (the final segment of the bridge
// href); the engine owns the maps and resolves links on demand.

mod area;
mod button;
mod device;
mod occupancy;
mod scene;
mod zone;

pub use area::Area;
pub(crate) use button::default_button_name;
pub use button::{Button, ButtonEvent, ButtonGroup};
pub use device::{derive_device_name, DeviceKind, Domain, FanSpeed, LedState};
pub use device::Device;
pub use occupancy::{OccupancyGroup, OccupancyStatus};
pub use scene::Scene;
pub use zone::Zone;
