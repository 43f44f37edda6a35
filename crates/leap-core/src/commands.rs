// ── LEAP command bodies ──
//
// Builders for the `Command` objects posted to `/…/commandprocessor`
// URLs. Shapes follow the wire captures from real bridges.

use std::time::Duration;

use serde_json::{json, Value};

use crate::model::FanSpeed;

pub(crate) fn go_to_level(level: u8) -> Value {
    json!({
        "CommandType": "GoToLevel",
        "Parameter": [{"Type": "Level", "Value": level}],
    })
}

/// `GoToDimmedLevel` — a level change with a fade, valid for lights.
pub(crate) fn go_to_dimmed_level(level: u8, fade_time: Duration) -> Value {
    json!({
        "CommandType": "GoToDimmedLevel",
        "DimmedLevelParameters": {
            "Level": level,
            "FadeTime": format_fade_time(fade_time),
        },
    })
}

pub(crate) fn go_to_fan_speed(speed: FanSpeed) -> Value {
    json!({
        "CommandType": "GoToFanSpeed",
        "FanSpeedParameters": {"FanSpeed": speed.as_str()},
    })
}

pub(crate) fn go_to_tilt(tilt: u8) -> Value {
    json!({
        "CommandType": "GoToTilt",
        "TiltParameters": {"Tilt": tilt},
    })
}

/// A bare command: `Raise`, `Lower`, `Stop`, `PressAndRelease`.
pub(crate) fn bare(command_type: &str) -> Value {
    json!({"CommandType": command_type})
}

/// Format a duration in the `hh:mm:ss` form LEAP expects, truncating
/// sub-second precision.
pub(crate) fn format_fade_time(fade_time: Duration) -> String {
    let total_seconds = fade_time.as_secs();
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
