// ── Typed LEAP message bodies ──
//
// serde mirrors of the body shapes the bridge sends, decoded from the
// raw `Body` value once the URL tells us what to expect. Field names
// follow the wire exactly; unknown fields are ignored.

use serde::de::Deserializer;
use serde::Deserialize;

use crate::model::{ButtonEvent, FanSpeed, OccupancyStatus};

/// `{"href": "/device/12"}` — how the bridge links entities together.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct HrefRef {
    pub href: String,
}

// ── Project ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectBody {
    #[serde(rename = "Project")]
    pub project: ProjectDefinition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectDefinition {
    #[serde(rename = "ProductType")]
    pub product_type: String,
}

// ── Areas ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleAreaDefinition {
    #[serde(rename = "Areas", default)]
    pub areas: Vec<AreaDefinition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AreaDefinition {
    pub href: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Parent", default)]
    pub parent: Option<HrefRef>,
    #[serde(rename = "AssociatedOccupancyGroups", default)]
    pub occupancy_groups: Vec<OccupancyGroupRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OccupancyGroupRef {
    #[serde(rename = "OccupancyGroup", default)]
    pub occupancy_group: Option<HrefRef>,
    /// Some firmwares inline the href instead of nesting it.
    #[serde(default)]
    pub href: Option<String>,
}

// ── Devices ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleDeviceDefinition {
    #[serde(rename = "Devices", default)]
    pub devices: Vec<DeviceDefinition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OneDeviceDefinition {
    #[serde(rename = "Device")]
    pub device: DeviceDefinition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeviceDefinition {
    pub href: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "FullyQualifiedName", default)]
    pub fully_qualified_name: Option<Vec<String>>,
    #[serde(rename = "DeviceType", default)]
    pub device_type: Option<String>,
    #[serde(rename = "ModelNumber", default)]
    pub model: Option<String>,
    #[serde(rename = "SerialNumber", default, deserialize_with = "string_or_number")]
    pub serial: Option<String>,
    #[serde(rename = "LocalZones", default)]
    pub local_zones: Vec<HrefRef>,
    #[serde(rename = "AssociatedArea", default)]
    pub associated_area: Option<HrefRef>,
    #[serde(rename = "ButtonGroups", default)]
    pub button_groups: Vec<HrefRef>,
    #[serde(rename = "OccupancySensors", default)]
    pub occupancy_sensors: Vec<HrefRef>,
    /// Everything else the bridge sends for this device, so nothing is
    /// silently dropped.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Serial numbers arrive as strings on some firmwares and bare numbers
/// on others.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

// ── Buttons ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleButtonDefinition {
    #[serde(rename = "Buttons", default)]
    pub buttons: Vec<ButtonDefinition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ButtonDefinition {
    pub href: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "ButtonNumber", default)]
    pub button_number: Option<u32>,
    #[serde(rename = "Parent", default)]
    pub parent: Option<HrefRef>,
    #[serde(rename = "Engraving", default)]
    pub engraving: Option<Engraving>,
    #[serde(rename = "AssociatedLED", default)]
    pub associated_led: Option<HrefRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Engraving {
    #[serde(rename = "Text", default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleButtonGroupExpanded {
    #[serde(rename = "ButtonGroupsExpanded", default)]
    pub button_groups: Vec<ButtonGroupExpanded>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ButtonGroupExpanded {
    pub href: String,
    #[serde(rename = "Buttons", default)]
    pub buttons: Vec<ButtonDefinition>,
}

// ── Control stations (RA3/QSX) ──────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleControlStation {
    #[serde(rename = "ControlStations", default)]
    pub control_stations: Vec<ControlStation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ControlStation {
    #[serde(default)]
    pub href: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "AssociatedGangedDevices", default)]
    pub ganged_devices: Vec<GangedDevice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GangedDevice {
    #[serde(rename = "Device")]
    pub device: GangedDeviceRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GangedDeviceRef {
    pub href: String,
    #[serde(rename = "DeviceType", default)]
    pub device_type: Option<String>,
}

// ── Zones ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleZoneDefinition {
    #[serde(rename = "Zones", default)]
    pub zones: Vec<ZoneDefinition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ZoneDefinition {
    pub href: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "ControlType", default)]
    pub control_type: Option<String>,
    #[serde(rename = "Level", default)]
    pub level: Option<i32>,
    #[serde(rename = "FanSpeed", default)]
    pub fan_speed: Option<FanSpeed>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OneZoneStatus {
    #[serde(rename = "ZoneStatus")]
    pub zone_status: ZoneStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleZoneStatus {
    #[serde(rename = "ZoneStatuses", default)]
    pub zone_statuses: Vec<ZoneStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ZoneStatus {
    #[serde(rename = "Zone")]
    pub zone: HrefRef,
    #[serde(rename = "Level", default)]
    pub level: Option<i32>,
    #[serde(rename = "FanSpeed", default)]
    pub fan_speed: Option<FanSpeed>,
    #[serde(rename = "Tilt", default)]
    pub tilt: Option<i32>,
    /// Switch zones report `"On"`/`"Off"` instead of a level.
    #[serde(rename = "SwitchedLevel", default)]
    pub switched_level: Option<String>,
}

// ── Button events ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct OneButtonStatusEvent {
    #[serde(rename = "ButtonStatus")]
    pub button_status: ButtonStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ButtonStatus {
    #[serde(rename = "Button")]
    pub button: HrefRef,
    #[serde(rename = "ButtonEvent")]
    pub button_event: ButtonEventBody,
}

/// Some firmwares send the event without the surrounding ButtonStatus;
/// the button id then comes from the message URL.
#[derive(Debug, Deserialize)]
pub(crate) struct BareButtonEvent {
    #[serde(rename = "ButtonEvent")]
    pub button_event: ButtonEventBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ButtonEventBody {
    #[serde(rename = "EventType")]
    pub event_type: ButtonEvent,
}

// ── Occupancy ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleOccupancyGroupDefinition {
    #[serde(rename = "OccupancyGroups", default)]
    pub occupancy_groups: Vec<OccupancyGroupDefinition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OccupancyGroupDefinition {
    pub href: String,
    #[serde(rename = "AssociatedSensors", default)]
    pub associated_sensors: Vec<AssociatedSensor>,
    #[serde(rename = "AssociatedAreas", default)]
    pub associated_areas: Vec<AssociatedArea>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssociatedSensor {
    #[serde(rename = "OccupancySensor")]
    pub occupancy_sensor: HrefRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AssociatedArea {
    #[serde(rename = "Area")]
    pub area: HrefRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleOccupancyGroupStatus {
    #[serde(rename = "OccupancyGroupStatuses", default)]
    pub statuses: Vec<OccupancyGroupStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OccupancyGroupStatus {
    #[serde(rename = "OccupancyGroup")]
    pub occupancy_group: HrefRef,
    #[serde(rename = "OccupancyStatus")]
    pub occupancy_status: OccupancyStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleAreaStatus {
    #[serde(rename = "AreaStatuses", default)]
    pub statuses: Vec<AreaStatus>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AreaStatus {
    pub href: String,
    #[serde(rename = "OccupancyStatus", default)]
    pub occupancy_status: Option<OccupancyStatus>,
}

// ── LEDs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct OneLedStatus {
    #[serde(rename = "LEDStatus")]
    pub led_status: LedStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LedStatus {
    #[serde(rename = "LED")]
    pub led: HrefRef,
    #[serde(rename = "State")]
    pub state: String,
}

// ── Scenes ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct MultipleVirtualButtonDefinition {
    #[serde(rename = "VirtualButtons", default)]
    pub virtual_buttons: Vec<VirtualButtonDefinition>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VirtualButtonDefinition {
    pub href: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "IsProgrammed", default)]
    pub is_programmed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_definition_accepts_numeric_serial() {
        let device: DeviceDefinition = serde_json::from_value(json!({
            "href": "/device/2",
            "Name": "Ceiling Light",
            "FullyQualifiedName": ["Living Room", "Ceiling Light"],
            "DeviceType": "WallDimmer",
            "ModelNumber": "PD-6WCL-XX",
            "SerialNumber": 43359585,
            "LocalZones": [{"href": "/zone/1"}],
        }))
        .unwrap();

        assert_eq!(device.serial.as_deref(), Some("43359585"));
        assert_eq!(device.local_zones[0].href, "/zone/1");
    }

    #[test]
    fn device_definition_keeps_unrecognized_fields() {
        let device: DeviceDefinition = serde_json::from_value(json!({
            "href": "/device/2",
            "DeviceType": "WallDimmer",
            "AddressedState": "Addressed",
            "IsThisDevice": false,
        }))
        .unwrap();

        assert_eq!(device.extra["AddressedState"], "Addressed");
        assert_eq!(device.extra["IsThisDevice"], false);
        assert!(!device.extra.contains_key("DeviceType"));
    }

    #[test]
    fn control_station_carries_its_href() {
        let body: MultipleControlStation = serde_json::from_value(json!({
            "ControlStations": [{
                "href": "/controlstation/789",
                "Name": "Front Door Entry Wall",
                "AssociatedGangedDevices": [
                    {"Device": {"href": "/device/901", "DeviceType": "SunnataKeypad"}},
                ],
            }]
        }))
        .unwrap();

        assert_eq!(body.control_stations[0].href, "/controlstation/789");
        assert_eq!(
            body.control_stations[0].ganged_devices[0].device.href,
            "/device/901"
        );
    }

    #[test]
    fn zone_status_parses_fan_and_switch_forms() {
        let status: ZoneStatus = serde_json::from_value(json!({
            "Zone": {"href": "/zone/3"},
            "FanSpeed": "MediumHigh",
        }))
        .unwrap();
        assert_eq!(status.fan_speed, Some(FanSpeed::MediumHigh));
        assert_eq!(status.level, None);

        let status: ZoneStatus = serde_json::from_value(json!({
            "Zone": {"href": "/zone/6"},
            "SwitchedLevel": "On",
        }))
        .unwrap();
        assert_eq!(status.switched_level.as_deref(), Some("On"));
    }

    #[test]
    fn button_event_parses_both_shapes() {
        let full: OneButtonStatusEvent = serde_json::from_value(json!({
            "ButtonStatus": {
                "Button": {"href": "/button/101"},
                "ButtonEvent": {"EventType": "Press"},
            }
        }))
        .unwrap();
        assert_eq!(full.button_status.button_event.event_type, ButtonEvent::Press);

        let bare: BareButtonEvent = serde_json::from_value(json!({
            "ButtonEvent": {"EventType": "Release"},
        }))
        .unwrap();
        assert_eq!(bare.button_event.event_type, ButtonEvent::Release);
    }

    #[test]
    fn occupancy_statuses_decode() {
        let body: MultipleOccupancyGroupStatus = serde_json::from_value(json!({
            "OccupancyGroupStatuses": [
                {"OccupancyGroup": {"href": "/occupancygroup/2"}, "OccupancyStatus": "Occupied"},
            ]
        }))
        .unwrap();
        assert_eq!(body.statuses[0].occupancy_status, OccupancyStatus::Occupied);
    }
}
