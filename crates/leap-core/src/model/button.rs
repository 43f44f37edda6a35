use serde::{Deserialize, Serialize};

/// A button press phase, as delivered in button status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ButtonEvent {
    Press,
    #[default]
    Release,
}

/// A collection of buttons on a keypad or remote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonGroup {
    pub id: u32,
    pub parent_device_id: u32,
    pub button_ids: Vec<u32>,
}

/// A single physical button.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Button {
    pub id: u32,
    pub parent_device_id: u32,
    pub number: u32,
    pub name: String,
    pub engraving: Option<String>,
    pub led_id: Option<u32>,
    pub current_state: ButtonEvent,
}

impl Button {
    pub fn new(id: u32, parent_device_id: u32) -> Self {
        Self {
            id,
            parent_device_id,
            number: 0,
            name: String::new(),
            engraving: None,
            led_id: None,
            current_state: ButtonEvent::Release,
        }
    }
}

/// Default names for unengraved special buttons, per keypad model.
pub(crate) fn default_button_name(model: Option<&str>, number: u32) -> Option<&'static str> {
    // Sunnata and Palladiom keypads reserve high button numbers for the
    // raise/lower rocker.
    match (model, number) {
        (Some("RRST-W4B-XX"), 18) => Some("Raise"),
        (Some("RRST-W4B-XX"), 19) => Some("Lower"),
        (Some("RRST-W3RL-XX"), 18) => Some("Raise"),
        (Some("RRST-W3RL-XX"), 19) => Some("Lower"),
        (Some("HQWT-U-P4W"), 18) => Some("Raise"),
        (Some("HQWT-U-P4W"), 19) => Some("Lower"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_buttons_get_rocker_names() {
        assert_eq!(default_button_name(Some("RRST-W4B-XX"), 18), Some("Raise"));
        assert_eq!(default_button_name(Some("RRST-W4B-XX"), 19), Some("Lower"));
        assert_eq!(default_button_name(Some("RRST-W4B-XX"), 1), None);
        assert_eq!(default_button_name(None, 18), None);
    }
}
