use serde::{Deserialize, Serialize};

/// A bridge-side virtual button that triggers a stored action.
/// Activating it issues a press.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: u32,
    pub name: String,
}
