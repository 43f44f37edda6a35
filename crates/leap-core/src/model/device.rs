// ── Device domain types ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Coarse classification of a bridge device, derived from the
/// bridge-reported `DeviceType` string via [`DeviceKind::for_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DeviceKind {
    Light,
    Switch,
    Fan,
    Cover,
    /// Pico and similar handheld remotes.
    Remote,
    /// Wall keypads on RA3/QSX control stations.
    Keypad,
    OccupancySensor,
    /// The bridge or processor itself.
    Processor,
    Unknown,
}

impl DeviceKind {
    /// Classify a bridge-reported device type string.
    pub fn for_type(device_type: &str) -> Self {
        match device_type {
            "WallDimmer" | "PlugInDimmer" | "InLineDimmer" | "SunnataDimmer"
            | "TempInWallPaddleDimmer" | "WallDimmerWithPreset" | "Dimmed" | "SpectrumTune" => {
                Self::Light
            }
            "WallSwitch" | "PlugInSwitch" | "OutdoorPlugInSwitch" | "InLineSwitch"
            | "SunnataSwitch" | "TempInWallPaddleSwitch" | "Switched" => Self::Switch,
            "CasetaFanSpeedController" | "MaestroFanSpeedController" | "FanSpeed" => Self::Fan,
            "SerenaHoneycombShade" | "SerenaRollerShade" | "TriathlonHoneycombShade"
            | "TriathlonRollerShade" | "QsWirelessShade" | "QsWirelessHorizontalSheerBlind"
            | "SerenaTiltOnlyWoodBlind" | "Shade" => Self::Cover,
            "Pico1Button" | "Pico2Button" | "Pico2ButtonRaiseLower" | "Pico3Button"
            | "Pico3ButtonRaiseLower" | "Pico4Button" | "Pico4ButtonScene" | "Pico4ButtonZone"
            | "Pico4Button2Group" | "FourGroupRemote" => Self::Remote,
            "SunnataKeypad" | "SunnataHybridKeypad" | "PalladiomKeypad" | "HomeownerKeypad" => {
                Self::Keypad
            }
            "RPSOccupancySensor" | "RPSCeilingMountedOccupancySensor" | "OccupancySensor" => {
                Self::OccupancySensor
            }
            "SmartBridge" | "SmartBridgePro" | "RadioRa2SelectMainRepeater"
            | "RadioRa3Processor" | "HomeworksQsxProcessor" => Self::Processor,
            _ => Self::Unknown,
        }
    }

    /// The user-facing domain this kind belongs to, if any.
    pub fn domain(&self) -> Option<Domain> {
        match self {
            Self::Light => Some(Domain::Light),
            Self::Switch => Some(Domain::Switch),
            Self::Fan => Some(Domain::Fan),
            Self::Cover => Some(Domain::Cover),
            Self::Remote | Self::OccupancySensor => Some(Domain::Sensor),
            Self::Keypad | Self::Processor | Self::Unknown => None,
        }
    }
}

/// User-facing device domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Domain {
    Light,
    Switch,
    Fan,
    Cover,
    Sensor,
}

/// Fan output level, in the bridge's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanSpeed {
    Off,
    Low,
    Medium,
    MediumHigh,
    High,
}

impl FanSpeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::MediumHigh => "MediumHigh",
            Self::High => "High",
        }
    }
}

/// State of a keypad button LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LedState {
    On,
    Off,
    #[default]
    Unknown,
}

// ── Device ──────────────────────────────────────────────────────────

/// A device known to the bridge. Output state (`current_state`,
/// `fan_speed`, `tilt`, `led_states`) is mutated in place as zone and
/// LED statuses stream in; everything else is set during bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: u32,
    /// Fully qualified name, "/"-joined.
    pub name: String,
    /// Leaf name: [`name`](Self::name) with the area prefix stripped.
    pub device_name: String,
    /// The bridge-reported type string, e.g. `"WallDimmer"`.
    pub device_type: String,
    pub kind: DeviceKind,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub area_id: Option<u32>,
    pub zone_id: Option<u32>,
    pub button_group_ids: Vec<u32>,
    pub occupancy_sensor_ids: Vec<u32>,
    pub button_led_ids: Vec<u32>,
    /// Output level 0-100, where the device has one.
    pub current_state: Option<i32>,
    pub fan_speed: Option<FanSpeed>,
    pub tilt: Option<i32>,
    pub led_states: BTreeMap<u32, LedState>,
    /// Type-specific fields the bridge reported beyond the common set,
    /// preserved verbatim.
    pub type_extras: serde_json::Map<String, serde_json::Value>,
}

impl Device {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            name: String::new(),
            device_name: String::new(),
            device_type: String::new(),
            kind: DeviceKind::Unknown,
            model: None,
            serial: None,
            area_id: None,
            zone_id: None,
            button_group_ids: Vec::new(),
            occupancy_sensor_ids: Vec::new(),
            button_led_ids: Vec::new(),
            current_state: None,
            fan_speed: None,
            tilt: None,
            led_states: BTreeMap::new(),
            type_extras: serde_json::Map::new(),
        }
    }

    pub fn domain(&self) -> Option<Domain> {
        self.kind.domain()
    }

    /// `true` when the output is on: level above zero, or a running fan.
    pub fn is_on(&self) -> bool {
        self.current_state.is_some_and(|level| level > 0)
            || self
                .fan_speed
                .is_some_and(|speed| speed != FanSpeed::Off)
    }
}

/// Strip bridge firmware's name decoration: if the fully qualified name
/// begins with the area's name followed by a separator, that prefix is
/// removed to yield the device name.
pub fn derive_device_name(full_name: &str, area_name: Option<&str>) -> String {
    if let Some(area) = area_name {
        if let Some(rest) = full_name.strip_prefix(area) {
            if let Some(rest) = rest.strip_prefix('/') {
                if !rest.is_empty() {
                    return rest.to_owned();
                }
            }
        }
    }
    full_name.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_types() {
        assert_eq!(DeviceKind::for_type("WallDimmer"), DeviceKind::Light);
        assert_eq!(DeviceKind::for_type("WallSwitch"), DeviceKind::Switch);
        assert_eq!(
            DeviceKind::for_type("CasetaFanSpeedController"),
            DeviceKind::Fan
        );
        assert_eq!(
            DeviceKind::for_type("SerenaRollerShade"),
            DeviceKind::Cover
        );
        assert_eq!(
            DeviceKind::for_type("Pico3ButtonRaiseLower"),
            DeviceKind::Remote
        );
        assert_eq!(DeviceKind::for_type("SmartBridge"), DeviceKind::Processor);
        assert_eq!(DeviceKind::for_type("SomethingNew"), DeviceKind::Unknown);
    }

    #[test]
    fn remotes_land_in_the_sensor_domain() {
        assert_eq!(
            DeviceKind::for_type("Pico2Button").domain(),
            Some(Domain::Sensor)
        );
        assert_eq!(DeviceKind::for_type("SmartBridge").domain(), None);
    }

    #[test]
    fn device_name_strips_area_prefix() {
        assert_eq!(
            derive_device_name("Living Room/Ceiling Light", Some("Living Room")),
            "Ceiling Light"
        );
    }

    #[test]
    fn device_name_keeps_unrelated_prefix() {
        assert_eq!(
            derive_device_name("Hallway/Ceiling Light", Some("Living Room")),
            "Hallway/Ceiling Light"
        );
        assert_eq!(derive_device_name("Ceiling Light", None), "Ceiling Light");
    }

    #[test]
    fn device_name_requires_a_separator_after_the_area() {
        // "Living Room2" merely shares a prefix with the area name.
        assert_eq!(
            derive_device_name("Living Room2/Lamp", Some("Living Room")),
            "Living Room2/Lamp"
        );
    }

    #[test]
    fn is_on_considers_level_and_fan() {
        let mut device = Device::new(2);
        assert!(!device.is_on());
        device.current_state = Some(50);
        assert!(device.is_on());
        device.current_state = Some(0);
        device.fan_speed = Some(FanSpeed::Low);
        assert!(device.is_on());
        device.fan_speed = Some(FanSpeed::Off);
        assert!(!device.is_on());
    }
}
